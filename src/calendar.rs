// src/calendar.rs
//! Month grids for a 7-column calendar view.
use chrono::{Datelike, Months, NaiveDate, Weekday};

pub const DAYS_PER_WEEK: usize = 7;

/// One slot of the month grid. Blank slots pad the first and last week and
/// carry no date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayCell {
    Blank,
    Day { day: u32, date: NaiveDate },
}

impl DayCell {
    pub const fn date(&self) -> Option<NaiveDate> {
        match self {
            DayCell::Blank => None,
            DayCell::Day { date, .. } => Some(*date),
        }
    }

    pub const fn is_blank(&self) -> bool {
        matches!(self, DayCell::Blank)
    }
}

/// First day of the given month, or `None` if the month is out of range.
pub fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = first_of_month(year, month)?;
    let next = first.checked_add_months(Months::new(1))?;
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

/// Moves `date` by `delta` calendar months. The day of month is kept where the
/// target month has it and clamped to the month's last day otherwise.
pub fn shift_month(date: NaiveDate, delta: i32) -> Option<NaiveDate> {
    let months = Months::new(delta.unsigned_abs());
    if delta >= 0 {
        date.checked_add_months(months)
    } else {
        date.checked_sub_months(months)
    }
}

/// Number of blank cells before day 1 when weeks start on `week_start`.
pub fn leading_blanks(first: NaiveDate, week_start: Weekday) -> usize {
    let first_idx = first.weekday().num_days_from_sunday();
    let start_idx = week_start.num_days_from_sunday();
    ((first_idx + 7 - start_idx) % 7) as usize
}

/// Builds the grid for the month containing `reference`.
///
/// The result always has a length divisible by 7: blanks before day 1 put it
/// in its weekday column, blanks after the last day complete the final week.
pub fn month_grid(reference: NaiveDate, week_start: Weekday) -> Vec<DayCell> {
    let first = reference.with_day(1).unwrap_or(reference);
    let Some(day_count) = days_in_month(first.year(), first.month()) else {
        return Vec::new();
    };

    let blanks = leading_blanks(first, week_start);
    let mut cells = Vec::with_capacity(blanks + day_count as usize + DAYS_PER_WEEK);
    cells.extend(std::iter::repeat(DayCell::Blank).take(blanks));
    cells.extend(
        first
            .iter_days()
            .take(day_count as usize)
            .map(|date| DayCell::Day { day: date.day(), date }),
    );
    while cells.len() % DAYS_PER_WEEK != 0 {
        cells.push(DayCell::Blank);
    }
    cells
}

/// Splits a grid into week rows.
pub fn rows(cells: &[DayCell]) -> impl Iterator<Item = &[DayCell]> {
    cells.chunks(DAYS_PER_WEEK)
}

/// Column headers in display order, starting at `week_start`.
pub fn weekday_headers(week_start: Weekday) -> [Weekday; DAYS_PER_WEEK] {
    let mut headers = [week_start; DAYS_PER_WEEK];
    let mut day = week_start;
    for slot in headers.iter_mut() {
        *slot = day;
        day = day.succ();
    }
    headers
}

/// A displayed month with previous/next navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarMonth {
    pub reference: NaiveDate,
    pub week_start: Weekday,
}

impl CalendarMonth {
    pub const fn new(reference: NaiveDate, week_start: Weekday) -> Self {
        Self {
            reference,
            week_start,
        }
    }

    /// Jumps straight to a year and month, e.g. from year/month pickers.
    pub fn jump_to(year: i32, month: u32, week_start: Weekday) -> Option<Self> {
        first_of_month(year, month).map(|reference| Self::new(reference, week_start))
    }

    pub fn year(&self) -> i32 {
        self.reference.year()
    }

    pub fn month(&self) -> u32 {
        self.reference.month()
    }

    #[must_use]
    pub fn previous(&self) -> Self {
        Self::new(
            shift_month(self.reference, -1).unwrap_or(self.reference),
            self.week_start,
        )
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self::new(
            shift_month(self.reference, 1).unwrap_or(self.reference),
            self.week_start,
        )
    }

    pub fn cells(&self) -> Vec<DayCell> {
        month_grid(self.reference, self.week_start)
    }

    pub fn title(&self) -> String {
        self.reference.format("%B %Y").to_string()
    }
}
