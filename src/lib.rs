use anyhow::{bail, Context, Result};
// Use anyhow::Result as standard Result for service layer
use chrono::{NaiveDate, NaiveTime, Timelike};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// --- Declare modules ---
pub mod calendar;
mod config;
pub mod db;
pub mod images;
pub mod models;
pub mod selection;
pub mod store;
pub mod units;

// --- Expose public types ---
pub use calendar::{CalendarMonth, DayCell};
pub use config::{parse_color, Config, Error as ConfigError, StandardColor, Theme, WeekStart};
pub use db::{Error as DbError, KvStore};
pub use images::{Error as ImageError, ImageFormat, ImageLoader, ImageStore, LoadedImage};
pub use models::{
    Equipment, EquipmentId, Muscle, MuscleId, SetInfo, SubMuscle, SubMuscleId, TimeUnit,
    TrainingLog, TrainingLogId, TrainingSet, TrainingSetId,
};
pub use selection::{DateSelectionTracker, TapOutcome};
pub use store::{same_name, Error as StoreError, FitnessStore};
pub use units::{convert_from_kg, convert_to_kg, WeightUnit, KG_PER_LB};

const DEFAULT_MUSCLE_COLOR: &str = "#8E8E93";
const IMAGE_DIR_NAME: &str = "images";
/// Upper bound for identical sets logged in one entry.
pub const MAX_SETS_PER_ENTRY: u32 = 100;

/// Checks a `#RGB` / `#RRGGBB` color string.
pub fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn checked_color(color: Option<&str>) -> Result<String> {
    match color.map(str::trim) {
        None | Some("") => Ok(DEFAULT_MUSCLE_COLOR.to_string()),
        Some(c) if is_hex_color(c) => Ok(c.to_uppercase()),
        Some(c) => bail!(StoreError::InvalidValue {
            field: "color",
            reason: format!("'{c}' is not a hex color like #FF3B30"),
        }),
    }
}

#[derive(Default, Clone, Debug)]
pub struct AddEquipmentParams<'a> {
    pub name: &'a str,
    pub main_muscle: &'a str, // name or id
    pub sub_muscle: Option<&'a str>,
    pub location: Option<&'a str>,
    pub personal_record: Option<f64>, // in `unit`
    pub unit: Option<WeightUnit>,     // defaults to the preferred unit
}

#[derive(Default, Clone, Debug)]
pub struct EditEquipmentParams<'a> {
    pub new_name: Option<&'a str>,
    pub new_main_muscle: Option<&'a str>,
    pub new_sub_muscle: Option<Option<&'a str>>, // Some(None) clears
    pub new_location: Option<&'a str>,
    pub new_personal_record: Option<Option<f64>>, // Some(None) clears
    pub unit: Option<WeightUnit>,
}

#[derive(Clone, Debug)]
pub struct LogSetParams<'a> {
    pub equipment_identifier: &'a str,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub reps: Option<u32>, // falls back to the last edited reps
    pub weight: f64,
    pub unit: Option<WeightUnit>, // falls back to last used, then preferred unit
    pub set_count: u32,           // identical sets logged under one entry
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSet {
    pub log_id: TrainingLogId,
    pub set_id: TrainingSetId,
    pub new_personal_record: Option<f64>, // kg
}

/// A training set with its equipment resolved for display.
#[derive(Debug, Clone, PartialEq)]
pub struct DayEntry {
    pub set_id: TrainingSetId,
    pub equipment_id: EquipmentId,
    pub equipment_name: Option<String>, // None if the equipment is gone
    pub sets: Vec<SetInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentOverview {
    pub equipment: Equipment,
    pub muscle_name: Option<String>,
    pub sub_muscle_name: Option<String>,
    pub logged_sets: usize,
}

/// A month ready for display: the grid plus the days that have entries.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthView {
    pub month: CalendarMonth,
    pub cells: Vec<DayCell>,
    pub logged_days: BTreeSet<NaiveDate>,
}

impl MonthView {
    pub fn has_entries(&self, cell: &DayCell) -> bool {
        cell.date().is_some_and(|d| self.logged_days.contains(&d))
    }
}

pub struct AppService {
    pub config: Config,
    pub store: FitnessStore<Connection>,
    pub images: ImageStore,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppService {
    /// Initializes the application service.
    /// # Errors
    /// Returns `anyhow::Error` if config/db path determination, loading, or initialization fails.
    pub fn initialize() -> Result<Self> {
        let config_path =
            config::get_config_path().context("Failed to determine configuration file path")?;
        let config = config::load(&config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?;

        let db_path = db::get_db_path().context("Failed to determine database path")?;
        let conn = db::open_db(&db_path)
            .with_context(|| format!("Failed to open database at {db_path:?}"))?;
        db::init_db(&conn).context("Failed to initialize database schema")?;

        let image_dir = db::get_data_dir()
            .context("Failed to determine data directory")?
            .join(IMAGE_DIR_NAME);
        let images = ImageStore::open(&image_dir)
            .with_context(|| format!("Failed to open image directory {image_dir:?}"))?;

        let store = FitnessStore::open(conn);
        info!(
            muscles = store.muscles().len(),
            equipments = store.equipments().len(),
            logs = store.training_logs().len(),
            "loaded store"
        );

        Ok(Self {
            config,
            store,
            images,
            db_path,
            config_path,
        })
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Saves the current configuration state.
    /// # Errors
    /// Returns `ConfigError` if saving fails.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        config::save(&self.config_path, &self.config)
    }

    /// # Errors
    /// Returns `ConfigError` variants if saving fails.
    pub fn set_week_start(&mut self, week_start: WeekStart) -> Result<(), ConfigError> {
        self.config.week_start = week_start;
        self.save_config()
    }

    /// # Errors
    /// - `ConfigError::InvalidDoubleTapWindow` for out-of-range values.
    /// - `ConfigError` variants if saving fails.
    pub fn set_double_tap_window(&mut self, millis: u64) -> Result<(), ConfigError> {
        let previous = self.config.double_tap_window_ms;
        self.config.double_tap_window_ms = millis;
        if let Err(e) = self.config.validate() {
            self.config.double_tap_window_ms = previous;
            return Err(e);
        }
        self.save_config()
    }

    // --- Units ---

    pub const fn preferred_unit(&self) -> WeightUnit {
        self.store.preferred_weight_unit()
    }

    pub fn set_preferred_unit(&mut self, unit: WeightUnit) {
        self.store.set_preferred_weight_unit(unit);
    }

    /// Canonical kilograms converted to the preferred display unit.
    pub fn display_weight(&self, kg: f64) -> f64 {
        convert_from_kg(kg, self.preferred_unit())
    }

    // --- Muscles ---

    /// Resolves an identifier (id or name) to a muscle.
    /// # Errors
    /// `StoreError::MissingField` for an empty identifier, `NotFound` otherwise.
    pub fn resolve_muscle(&self, identifier: &str) -> Result<&Muscle> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            bail!(StoreError::MissingField("muscle"));
        }
        trimmed
            .parse::<MuscleId>()
            .ok()
            .and_then(|id| self.store.muscle(id))
            .or_else(|| self.store.muscle_by_name(trimmed))
            .ok_or_else(|| {
                StoreError::NotFound {
                    kind: "Muscle",
                    id: trimmed.to_string(),
                }
                .into()
            })
    }

    /// # Errors
    /// Invalid color, empty or duplicate name.
    pub fn add_muscle(&mut self, name: &str, color: Option<&str>) -> Result<MuscleId> {
        let color = checked_color(color)?;
        self.store
            .add_muscle(Muscle::new(name, color))
            .with_context(|| format!("Failed to add muscle '{}'", name.trim()))
    }

    /// # Errors
    /// Unknown muscle, invalid color, empty or duplicate name.
    pub fn edit_muscle(
        &mut self,
        identifier: &str,
        new_name: Option<&str>,
        new_color: Option<&str>,
    ) -> Result<()> {
        let mut muscle = self.resolve_muscle(identifier)?.clone();
        if let Some(name) = new_name {
            muscle.name = name.to_string();
        }
        if new_color.is_some() {
            muscle.color = checked_color(new_color)?;
        }
        self.store
            .update_muscle(muscle)
            .with_context(|| format!("Failed to update muscle '{identifier}'"))
    }

    /// # Errors
    /// Unknown muscle, or the muscle is still used by equipment.
    pub fn delete_muscle(&mut self, identifier: &str) -> Result<Muscle> {
        let id = self.resolve_muscle(identifier)?.id;
        self.store
            .delete_muscle(id)
            .with_context(|| format!("Failed to delete muscle '{identifier}'"))
    }

    /// # Errors
    /// Unknown muscle, invalid color, empty or duplicate sub-muscle name.
    pub fn add_sub_muscle(
        &mut self,
        muscle_identifier: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<SubMuscleId> {
        let muscle = self.resolve_muscle(muscle_identifier)?;
        let color = match color {
            Some(_) => checked_color(color)?,
            None => muscle.color.clone(),
        };
        let id = muscle.id;
        self.store
            .add_sub_muscle(id, SubMuscle::new(name, color))
            .with_context(|| format!("Failed to add sub-muscle '{}'", name.trim()))
    }

    fn resolve_sub_muscle(muscle: &Muscle, identifier: &str) -> Result<SubMuscleId> {
        let trimmed = identifier.trim();
        muscle
            .sub_muscles
            .iter()
            .find(|s| s.id.to_string() == trimmed || same_name(&s.name, trimmed))
            .map(|s| s.id)
            .ok_or_else(|| {
                StoreError::NotFound {
                    kind: "Sub-muscle",
                    id: format!("{trimmed} (in {})", muscle.name),
                }
                .into()
            })
    }

    /// # Errors
    /// Unknown muscle or sub-muscle, or the sub-muscle is still in use.
    pub fn delete_sub_muscle(&mut self, muscle_identifier: &str, sub_identifier: &str) -> Result<()> {
        let muscle = self.resolve_muscle(muscle_identifier)?;
        let muscle_id = muscle.id;
        let sub_id = Self::resolve_sub_muscle(muscle, sub_identifier)?;
        self.store
            .delete_sub_muscle(muscle_id, sub_id)
            .with_context(|| format!("Failed to delete sub-muscle '{sub_identifier}'"))
    }

    // --- Equipment ---

    /// Resolves an identifier (id or name) to an equipment entry.
    /// # Errors
    /// `StoreError::MissingField` for an empty identifier, `NotFound` otherwise.
    pub fn resolve_equipment(&self, identifier: &str) -> Result<&Equipment> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            bail!(StoreError::MissingField("equipment"));
        }
        trimmed
            .parse::<EquipmentId>()
            .ok()
            .and_then(|id| self.store.equipment(id))
            .or_else(|| self.store.equipment_by_name(trimmed))
            .ok_or_else(|| {
                StoreError::NotFound {
                    kind: "Equipment",
                    id: trimmed.to_string(),
                }
                .into()
            })
    }

    fn pr_to_kg(&self, pr: Option<f64>, unit: Option<WeightUnit>) -> Option<f64> {
        let unit = unit.unwrap_or_else(|| self.preferred_unit());
        pr.map(|w| convert_to_kg(w, unit))
    }

    /// Creates equipment. A location that isn't known yet is added to the
    /// location list.
    /// # Errors
    /// Unknown muscle/sub-muscle or invalid equipment data.
    pub fn add_equipment(&mut self, params: AddEquipmentParams) -> Result<EquipmentId> {
        let muscle = self.resolve_muscle(params.main_muscle)?;
        let sub_muscle = params
            .sub_muscle
            .map(|s| Self::resolve_sub_muscle(muscle, s))
            .transpose()?;

        let mut equipment = Equipment::new(params.name, muscle.id);
        equipment.sub_muscle = sub_muscle;
        equipment.location = params.location.unwrap_or_default().trim().to_string();
        equipment.personal_record = self.pr_to_kg(params.personal_record, params.unit);

        let location = equipment.location.clone();
        let id = self
            .store
            .add_equipment(equipment)
            .with_context(|| format!("Failed to add equipment '{}'", params.name.trim()))?;
        self.ensure_location(&location)?;
        Ok(id)
    }

    /// Adds a location named on an equipment that was just saved.
    fn ensure_location(&mut self, location: &str) -> Result<()> {
        if location.is_empty() || self.store.location_named(location).is_some() {
            return Ok(());
        }
        self.store
            .add_location(location)
            .with_context(|| format!("Failed to add location '{location}'"))
    }

    /// # Errors
    /// Unknown equipment, muscle or sub-muscle, or invalid new values.
    pub fn edit_equipment(&mut self, identifier: &str, params: EditEquipmentParams) -> Result<()> {
        let mut equipment = self.resolve_equipment(identifier)?.clone();

        if let Some(name) = params.new_name {
            equipment.name = name.to_string();
        }
        if let Some(muscle_ident) = params.new_main_muscle {
            let new_muscle = self.resolve_muscle(muscle_ident)?.id;
            if new_muscle != equipment.main_muscle {
                equipment.main_muscle = new_muscle;
                equipment.sub_muscle = None;
            }
        }
        if let Some(sub) = params.new_sub_muscle {
            equipment.sub_muscle = match sub {
                Some(s) => {
                    let muscle = self.store.muscle(equipment.main_muscle).ok_or_else(|| {
                        StoreError::NotFound {
                            kind: "Muscle",
                            id: equipment.main_muscle.to_string(),
                        }
                    })?;
                    Some(Self::resolve_sub_muscle(muscle, s)?)
                }
                None => None,
            };
        }
        if let Some(location) = params.new_location {
            equipment.location = location.trim().to_string();
        }
        if let Some(pr) = params.new_personal_record {
            equipment.personal_record = self.pr_to_kg(pr, params.unit);
        }

        let location = equipment.location.clone();
        self.store
            .update_equipment(equipment)
            .with_context(|| format!("Failed to update equipment '{identifier}'"))?;
        self.ensure_location(&location)
    }

    /// Deletes equipment and its stored image.
    /// # Errors
    /// Unknown equipment, or it still has logged training sets.
    pub fn delete_equipment(&mut self, identifier: &str) -> Result<Equipment> {
        let id = self.resolve_equipment(identifier)?.id;
        let removed = self
            .store
            .delete_equipment(id)
            .with_context(|| format!("Failed to delete equipment '{identifier}'"))?;
        if let Some(name) = &removed.image_name {
            if let Err(e) = self.images.remove(name) {
                tracing::warn!(image = %name, error = %e, "failed to remove equipment image");
            }
        }
        Ok(removed)
    }

    /// Copies an image into the image store and attaches it to the equipment,
    /// replacing (and deleting) any previous image. Returns the new file name.
    /// # Errors
    /// Unknown equipment or image I/O failure.
    pub fn set_equipment_image(&mut self, identifier: &str, source: &Path) -> Result<String> {
        let mut equipment = self.resolve_equipment(identifier)?.clone();
        let name = self
            .images
            .import(source)
            .with_context(|| format!("Failed to store image {source:?}"))?;
        let previous = equipment.image_name.replace(name.clone());
        self.store.update_equipment(equipment)?;
        if let Some(old) = previous {
            if let Err(e) = self.images.remove(&old) {
                tracing::warn!(image = %old, error = %e, "failed to remove replaced image");
            }
        }
        Ok(name)
    }

    /// # Errors
    /// Unknown equipment.
    pub fn clear_equipment_image(&mut self, identifier: &str) -> Result<bool> {
        let mut equipment = self.resolve_equipment(identifier)?.clone();
        let Some(old) = equipment.image_name.take() else {
            return Ok(false);
        };
        self.store.update_equipment(equipment)?;
        if let Err(e) = self.images.remove(&old) {
            tracing::warn!(image = %old, error = %e, "failed to remove image");
        }
        Ok(true)
    }

    /// Equipment with its taxonomy names resolved, sorted by name.
    pub fn equipment_overview(&self, location: Option<&str>) -> Vec<EquipmentOverview> {
        let mut rows: Vec<EquipmentOverview> = self
            .store
            .equipments()
            .iter()
            .filter(|e| location.map_or(true, |l| same_name(&e.location, l)))
            .map(|e| {
                let muscle = self.store.muscle(e.main_muscle);
                EquipmentOverview {
                    equipment: e.clone(),
                    muscle_name: muscle.map(|m| m.name.clone()),
                    sub_muscle_name: muscle
                        .zip(e.sub_muscle)
                        .and_then(|(m, sub)| m.sub_muscle(sub))
                        .map(|s| s.name.clone()),
                    logged_sets: self.store.sets_for_equipment(e.id).len(),
                }
            })
            .collect();
        rows.sort_by_key(|r| r.equipment.name.to_lowercase());
        rows
    }

    /// Starts background loads for every equipment image.
    pub fn image_loader(&self) -> Result<ImageLoader> {
        let mut loader = ImageLoader::new(self.images.clone());
        for equipment in self.store.equipments() {
            if let Some(name) = &equipment.image_name {
                loader
                    .request(equipment.id, name)
                    .with_context(|| format!("Failed to queue image for '{}'", equipment.name))?;
            }
        }
        Ok(loader)
    }

    // --- Locations ---

    /// # Errors
    /// Empty or duplicate location.
    pub fn add_location(&mut self, name: &str) -> Result<()> {
        self.store
            .add_location(name)
            .with_context(|| format!("Failed to add location '{}'", name.trim()))
    }

    /// # Errors
    /// Unknown location, empty or duplicate new name.
    pub fn rename_location(&mut self, old: &str, new: &str) -> Result<usize> {
        self.store
            .rename_location(old, new)
            .with_context(|| format!("Failed to rename location '{old}'"))
    }

    /// # Errors
    /// Unknown location.
    pub fn delete_location(&mut self, name: &str) -> Result<String> {
        self.store
            .delete_location(name)
            .with_context(|| format!("Failed to delete location '{name}'"))
    }

    // --- Training ---

    /// Logs sets on one equipment for a day and bumps the equipment's PR if
    /// the weight beats it. Remembers reps and unit for the next entry.
    /// # Errors
    /// No equipment given, unknown equipment, missing reps, invalid values.
    pub fn log_sets(&mut self, params: LogSetParams) -> Result<LoggedSet> {
        let equipment_id = self.resolve_equipment(params.equipment_identifier)?.id;
        let reps = params
            .reps
            .or_else(|| self.store.last_edited_reps())
            .ok_or(StoreError::MissingField("reps"))?;
        let unit = params
            .unit
            .or_else(|| self.store.last_used_weight_unit())
            .unwrap_or_else(|| self.preferred_unit());
        if !(1..=MAX_SETS_PER_ENTRY).contains(&params.set_count) {
            bail!(StoreError::InvalidValue {
                field: "set count",
                reason: format!("must be between 1 and {MAX_SETS_PER_ENTRY}"),
            });
        }

        let time = params.time.unwrap_or(NaiveTime::MIN);
        let info = SetInfo {
            reps,
            weight: convert_to_kg(params.weight, unit),
            weight_unit: unit,
            time: time.hour() * 60 + time.minute(),
            time_unit: TimeUnit::MinuteOfDay,
        };
        let set = TrainingSet::new(equipment_id, vec![info.clone(); params.set_count as usize]);
        let set_id = set.id;

        let log_id = self
            .store
            .add_training_set(&params.date, set)
            .context("Failed to log training set")?;
        debug!(%log_id, %set_id, "logged training set");

        let new_personal_record = self
            .store
            .bump_personal_record(equipment_id, info.weight)?
            .then_some(info.weight);
        self.store.set_last_edited_reps(reps);
        self.store.set_last_used_weight_unit(unit);

        Ok(LoggedSet {
            log_id,
            set_id,
            new_personal_record,
        })
    }

    /// # Errors
    /// Malformed id, or no set with that id.
    pub fn delete_training_set(&mut self, identifier: &str) -> Result<TrainingSet> {
        let id: TrainingSetId = identifier
            .parse()
            .with_context(|| format!("'{identifier}' is not a training set id"))?;
        self.store
            .delete_training_set(id)
            .context("Failed to delete training set")
    }

    /// Removes the whole log of `date`. Returns how many training sets went
    /// with it, zero if nothing was logged that day.
    /// # Errors
    /// Only if the store refuses the delete.
    pub fn clear_day(&mut self, date: NaiveDate) -> Result<usize> {
        let Some(log_id) = self.store.log_for_day(date).map(|l| l.id) else {
            return Ok(0);
        };
        let removed = self
            .store
            .delete_training_log(log_id)
            .with_context(|| format!("Failed to clear {date}"))?;
        Ok(removed.sets.len())
    }

    /// Everything logged on `date`, with equipment names resolved.
    pub fn day_entries(&self, date: NaiveDate) -> Vec<DayEntry> {
        self.store
            .log_for_day(date)
            .map(|log| {
                log.sets
                    .iter()
                    .map(|s| DayEntry {
                        set_id: s.id,
                        equipment_id: s.equipment,
                        equipment_name: self.store.equipment(s.equipment).map(|e| e.name.clone()),
                        sets: s.sets.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- Calendar ---

    pub fn calendar_month(&self, reference: NaiveDate) -> CalendarMonth {
        CalendarMonth::new(reference, self.config.week_start.into())
    }

    pub fn month_view(&self, month: CalendarMonth) -> MonthView {
        MonthView {
            month,
            cells: month.cells(),
            logged_days: self.store.logged_days_in_month(month.year(), month.month()),
        }
    }

    pub fn date_selection_tracker(&self, selected: NaiveDate) -> DateSelectionTracker {
        DateSelectionTracker::with_window(selected, self.config.double_tap_window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors() {
        assert!(is_hex_color("#FF3B30"));
        assert!(is_hex_color("#abc"));
        assert!(!is_hex_color("FF3B30"));
        assert!(!is_hex_color("#GG0000"));
        assert!(!is_hex_color("#FFFF"));
    }

    #[test]
    fn missing_color_gets_default() {
        assert_eq!(checked_color(None).unwrap(), DEFAULT_MUSCLE_COLOR);
        assert_eq!(checked_color(Some("#ff0000")).unwrap(), "#FF0000");
        assert!(checked_color(Some("red")).is_err());
    }
}
