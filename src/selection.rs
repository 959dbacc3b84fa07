// src/selection.rs
use chrono::NaiveDate;
use std::time::{Duration, Instant};

pub const DEFAULT_DOUBLE_TAP_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// Plain tap; the date became the selected date.
    Selected(NaiveDate),
    /// Second tap on the same day inside the window. The caller opens the
    /// "add training set" flow for this date.
    DoubleTap(NaiveDate),
}

/// Tells single taps on calendar days apart from double taps.
///
/// There is no timer: an armed tap only matters if the next tap arrives
/// inside the window, otherwise that next tap starts over as a single tap.
#[derive(Debug, Clone)]
pub struct DateSelectionTracker {
    window: Duration,
    last_tap: Option<(Instant, NaiveDate)>,
    selected: NaiveDate,
}

impl DateSelectionTracker {
    pub const fn new(selected: NaiveDate) -> Self {
        Self::with_window(selected, DEFAULT_DOUBLE_TAP_WINDOW)
    }

    pub const fn with_window(selected: NaiveDate, window: Duration) -> Self {
        Self {
            window,
            last_tap: None,
            selected,
        }
    }

    pub const fn selected_date(&self) -> NaiveDate {
        self.selected
    }

    pub const fn is_armed(&self) -> bool {
        self.last_tap.is_some()
    }

    pub fn tap(&mut self, date: NaiveDate, now: Instant) -> TapOutcome {
        if let Some((at, last_date)) = self.last_tap {
            let within_window = now
                .checked_duration_since(at)
                .is_some_and(|elapsed| elapsed < self.window);
            if within_window && last_date == date {
                self.last_tap = None;
                return TapOutcome::DoubleTap(date);
            }
        }
        self.last_tap = Some((now, date));
        self.selected = date;
        TapOutcome::Selected(date)
    }
}
