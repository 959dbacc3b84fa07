// src/store.rs
use crate::db::KvStore;
use crate::models::{
    Equipment, EquipmentId, Muscle, MuscleId, SetInfo, SubMuscle, SubMuscleId, TimeUnit,
    TrainingLog, TrainingLogId, TrainingSet, TrainingSetId,
};
use crate::units::WeightUnit;
use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

pub const MUSCLES_KEY: &str = "muscles";
pub const EQUIPMENTS_KEY: &str = "equipments";
pub const TRAINING_LOGS_KEY: &str = "trainingLogs";
pub const LOCATIONS_KEY: &str = "locations";
pub const PREFERRED_WEIGHT_UNIT_KEY: &str = "preferredWeightUnit";
pub const LAST_EDITED_REPS_KEY: &str = "lastEditedReps";
pub const LAST_USED_WEIGHT_UNIT_KEY: &str = "lastUsedWeightUnit";

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} name '{name}' is already taken")]
    DuplicateName { kind: &'static str, name: String },
    #[error("{kind} '{name}' is still used by {count} {used_by}")]
    InUse {
        kind: &'static str,
        name: String,
        count: usize,
        used_by: &'static str,
    },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl Error {
    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Calendar day of any chrono date or date-time; time of day is dropped.
pub fn calendar_day<D: Datelike>(when: &D) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(when.year(), when.month(), when.day())
}

/// Name equality used for every user-entered name: trimmed, case-insensitive.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn required_name(value: &str, field: &'static str) -> Result<String, Error> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::MissingField(field));
    }
    Ok(trimmed.to_string())
}

fn validate_set_info(info: &SetInfo) -> Result<(), Error> {
    if info.reps == 0 {
        return Err(Error::InvalidValue {
            field: "reps",
            reason: "must be at least 1".to_string(),
        });
    }
    if !info.weight.is_finite() || info.weight <= 0.0 {
        return Err(Error::InvalidValue {
            field: "weight",
            reason: format!("must be a positive number, got {}", info.weight),
        });
    }
    if info.time_unit == TimeUnit::MinuteOfDay && info.time >= MINUTES_PER_DAY {
        return Err(Error::InvalidValue {
            field: "time",
            reason: format!("minute of day must be below {MINUTES_PER_DAY}, got {}", info.time),
        });
    }
    Ok(())
}

/// Owns every collection of the app and writes each one back to the key-value
/// store as a full snapshot right after it changes.
///
/// Reads never fail: missing or unreadable data loads as empty. Writes that
/// fail are logged and otherwise ignored, so in-memory state can run ahead of
/// what is stored.
pub struct FitnessStore<S: KvStore> {
    kv: S,
    muscles: Vec<Muscle>,
    equipments: Vec<Equipment>,
    training_logs: Vec<TrainingLog>, // sorted by date, one per day
    locations: Vec<String>,
    preferred_weight_unit: WeightUnit,
    last_edited_reps: Option<u32>,
    last_used_weight_unit: Option<WeightUnit>,
}

impl<S: KvStore> FitnessStore<S> {
    /// Empty store over `kv`; nothing is read until a `load_*` call.
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            muscles: Vec::new(),
            equipments: Vec::new(),
            training_logs: Vec::new(),
            locations: Vec::new(),
            preferred_weight_unit: WeightUnit::default(),
            last_edited_reps: None,
            last_used_weight_unit: None,
        }
    }

    /// Store with every collection loaded from `kv`.
    pub fn open(kv: S) -> Self {
        let mut store = Self::new(kv);
        store.load_all();
        store
    }

    pub const fn kv(&self) -> &S {
        &self.kv
    }

    // --- Persistence ---

    fn read_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.kv.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key, "no stored value");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "failed to read stored value, using default");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "stored value is corrupt, using default");
                None
            }
        }
    }

    fn write_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize value, not saved");
                return;
            }
        };
        match self.kv.set(key, &bytes) {
            Ok(()) => debug!(key, bytes = bytes.len(), "saved"),
            Err(e) => warn!(key, error = %e, "failed to save value"),
        }
    }

    pub fn load_all(&mut self) {
        self.load_muscles();
        self.load_equipments();
        self.load_training_logs();
        self.load_locations();
        self.load_preferences();
    }

    pub fn load_muscles(&mut self) {
        self.muscles = self.read_value(MUSCLES_KEY).unwrap_or_default();
    }

    pub fn load_equipments(&mut self) {
        self.equipments = self.read_value(EQUIPMENTS_KEY).unwrap_or_default();
    }

    /// Loads training logs, merging any logs that share a day.
    pub fn load_training_logs(&mut self) {
        let stored: Vec<TrainingLog> = self.read_value(TRAINING_LOGS_KEY).unwrap_or_default();
        let stored_count = stored.len();
        let mut merged: Vec<TrainingLog> = Vec::with_capacity(stored_count);
        for log in stored {
            if let Some(idx) = merged.iter().position(|l| l.date == log.date) {
                merged[idx].sets.extend(log.sets);
            } else {
                merged.push(log);
            }
        }
        merged.retain(|l| !l.sets.is_empty());
        if merged.len() != stored_count {
            debug!(stored_count, kept = merged.len(), "normalized stored training logs");
        }
        merged.sort_by_key(|l| l.date);
        self.training_logs = merged;
    }

    pub fn load_locations(&mut self) {
        self.locations = self.read_value(LOCATIONS_KEY).unwrap_or_default();
    }

    pub fn load_preferences(&mut self) {
        self.preferred_weight_unit = self
            .read_value(PREFERRED_WEIGHT_UNIT_KEY)
            .unwrap_or_default();
        self.last_edited_reps = self.read_value(LAST_EDITED_REPS_KEY);
        self.last_used_weight_unit = self.read_value(LAST_USED_WEIGHT_UNIT_KEY);
    }

    pub fn save_muscles(&self) {
        self.write_value(MUSCLES_KEY, &self.muscles);
    }

    pub fn save_equipments(&self) {
        self.write_value(EQUIPMENTS_KEY, &self.equipments);
    }

    pub fn save_training_logs(&self) {
        self.write_value(TRAINING_LOGS_KEY, &self.training_logs);
    }

    pub fn save_locations(&self) {
        self.write_value(LOCATIONS_KEY, &self.locations);
    }

    // --- Muscles ---

    pub fn muscles(&self) -> &[Muscle] {
        &self.muscles
    }

    pub fn muscle(&self, id: MuscleId) -> Option<&Muscle> {
        self.muscles.iter().find(|m| m.id == id)
    }

    pub fn muscle_by_name(&self, name: &str) -> Option<&Muscle> {
        self.muscles.iter().find(|m| same_name(&m.name, name))
    }

    fn check_muscle(&self, muscle: &mut Muscle) -> Result<(), Error> {
        muscle.name = required_name(&muscle.name, "muscle name")?;
        if let Some(other) = self
            .muscles
            .iter()
            .find(|m| m.id != muscle.id && same_name(&m.name, &muscle.name))
        {
            return Err(Error::DuplicateName {
                kind: "Muscle",
                name: other.name.clone(),
            });
        }
        for sub in &mut muscle.sub_muscles {
            sub.name = required_name(&sub.name, "sub-muscle name")?;
        }
        for (i, sub) in muscle.sub_muscles.iter().enumerate() {
            if muscle.sub_muscles[..i]
                .iter()
                .any(|prev| same_name(&prev.name, &sub.name))
            {
                return Err(Error::DuplicateName {
                    kind: "Sub-muscle",
                    name: sub.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn equipment_using_muscle(&self, id: MuscleId) -> usize {
        self.equipments.iter().filter(|e| e.main_muscle == id).count()
    }

    fn equipment_using_sub_muscle(&self, id: SubMuscleId) -> usize {
        self.equipments
            .iter()
            .filter(|e| e.sub_muscle == Some(id))
            .count()
    }

    /// # Errors
    /// `MissingField` for an empty name, `DuplicateName` if the name (or a
    /// sub-muscle name within it) is taken.
    pub fn add_muscle(&mut self, mut muscle: Muscle) -> Result<MuscleId, Error> {
        self.check_muscle(&mut muscle)?;
        let id = muscle.id;
        debug!(%id, name = %muscle.name, "adding muscle");
        self.muscles.push(muscle);
        self.save_muscles();
        Ok(id)
    }

    /// Replaces the muscle with the same id.
    /// # Errors
    /// `NotFound`, validation errors as in `add_muscle`, or `InUse` when a
    /// dropped sub-muscle is still referenced by equipment.
    pub fn update_muscle(&mut self, mut muscle: Muscle) -> Result<(), Error> {
        let idx = self
            .muscles
            .iter()
            .position(|m| m.id == muscle.id)
            .ok_or_else(|| Error::not_found("Muscle", muscle.id))?;
        self.check_muscle(&mut muscle)?;
        for dropped in self.muscles[idx]
            .sub_muscles
            .iter()
            .filter(|old| muscle.sub_muscle(old.id).is_none())
        {
            let count = self.equipment_using_sub_muscle(dropped.id);
            if count > 0 {
                return Err(Error::InUse {
                    kind: "Sub-muscle",
                    name: dropped.name.clone(),
                    count,
                    used_by: "equipment",
                });
            }
        }
        self.muscles[idx] = muscle;
        self.save_muscles();
        Ok(())
    }

    /// # Errors
    /// `NotFound`, or `InUse` while equipment still points at the muscle.
    pub fn delete_muscle(&mut self, id: MuscleId) -> Result<Muscle, Error> {
        let idx = self
            .muscles
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| Error::not_found("Muscle", id))?;
        let count = self.equipment_using_muscle(id);
        if count > 0 {
            return Err(Error::InUse {
                kind: "Muscle",
                name: self.muscles[idx].name.clone(),
                count,
                used_by: "equipment",
            });
        }
        let removed = self.muscles.remove(idx);
        self.save_muscles();
        Ok(removed)
    }

    /// # Errors
    /// `NotFound` for the parent, validation errors for the sub-muscle.
    pub fn add_sub_muscle(&mut self, muscle_id: MuscleId, sub: SubMuscle) -> Result<SubMuscleId, Error> {
        let mut muscle = self
            .muscle(muscle_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Muscle", muscle_id))?;
        let id = sub.id;
        muscle.sub_muscles.push(sub);
        self.update_muscle(muscle)?;
        Ok(id)
    }

    /// # Errors
    /// `NotFound` for either id, `InUse` while equipment references it.
    pub fn delete_sub_muscle(&mut self, muscle_id: MuscleId, sub_id: SubMuscleId) -> Result<(), Error> {
        let mut muscle = self
            .muscle(muscle_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Muscle", muscle_id))?;
        let before = muscle.sub_muscles.len();
        muscle.sub_muscles.retain(|s| s.id != sub_id);
        if muscle.sub_muscles.len() == before {
            return Err(Error::not_found("Sub-muscle", sub_id));
        }
        self.update_muscle(muscle)
    }

    /// Fills an empty taxonomy with a starter set of muscles. Returns whether
    /// anything was added.
    pub fn seed_default_muscles(&mut self) -> bool {
        if !self.muscles.is_empty() {
            return false;
        }
        self.muscles = vec![
            Muscle::new("Chest", "#FF3B30").with_sub_muscles(vec![
                SubMuscle::new("Upper Chest", "#FF6B60"),
                SubMuscle::new("Middle Chest", "#FF3B30"),
                SubMuscle::new("Lower Chest", "#C62828"),
            ]),
            Muscle::new("Back", "#007AFF").with_sub_muscles(vec![
                SubMuscle::new("Upper Back", "#4DA3FF"),
                SubMuscle::new("Lower Back", "#0051A8"),
            ]),
        ];
        self.save_muscles();
        true
    }

    // --- Equipment ---

    pub fn equipments(&self) -> &[Equipment] {
        &self.equipments
    }

    pub fn equipment(&self, id: EquipmentId) -> Option<&Equipment> {
        self.equipments.iter().find(|e| e.id == id)
    }

    pub fn equipment_by_name(&self, name: &str) -> Option<&Equipment> {
        self.equipments.iter().find(|e| same_name(&e.name, name))
    }

    fn check_equipment(&self, equipment: &mut Equipment) -> Result<(), Error> {
        equipment.name = required_name(&equipment.name, "equipment name")?;
        if let Some(other) = self
            .equipments
            .iter()
            .find(|e| e.id != equipment.id && same_name(&e.name, &equipment.name))
        {
            return Err(Error::DuplicateName {
                kind: "Equipment",
                name: other.name.clone(),
            });
        }
        equipment.location = match self.location_named(&equipment.location) {
            Some(stored) => stored.clone(),
            None => equipment.location.trim().to_string(),
        };
        let muscle = self
            .muscle(equipment.main_muscle)
            .ok_or_else(|| Error::not_found("Muscle", equipment.main_muscle))?;
        if let Some(sub_id) = equipment.sub_muscle {
            if muscle.sub_muscle(sub_id).is_none() {
                return Err(Error::InvalidValue {
                    field: "sub-muscle",
                    reason: format!("{sub_id} does not belong to muscle '{}'", muscle.name),
                });
            }
        }
        if let Some(pr) = equipment.personal_record {
            if !pr.is_finite() || pr < 0.0 {
                return Err(Error::InvalidValue {
                    field: "personal record",
                    reason: format!("must be a non-negative number, got {pr}"),
                });
            }
        }
        Ok(())
    }

    /// # Errors
    /// `MissingField` for an empty name, `NotFound` for an unknown muscle,
    /// `InvalidValue` for a sub-muscle of another muscle or a bad PR.
    pub fn add_equipment(&mut self, mut equipment: Equipment) -> Result<EquipmentId, Error> {
        self.check_equipment(&mut equipment)?;
        let id = equipment.id;
        debug!(%id, name = %equipment.name, "adding equipment");
        self.equipments.push(equipment);
        self.save_equipments();
        Ok(id)
    }

    /// Replaces the equipment with the same id.
    /// # Errors
    /// `NotFound`, or validation errors as in `add_equipment`.
    pub fn update_equipment(&mut self, mut equipment: Equipment) -> Result<(), Error> {
        let idx = self
            .equipments
            .iter()
            .position(|e| e.id == equipment.id)
            .ok_or_else(|| Error::not_found("Equipment", equipment.id))?;
        self.check_equipment(&mut equipment)?;
        self.equipments[idx] = equipment;
        self.save_equipments();
        Ok(())
    }

    /// # Errors
    /// `NotFound`, or `InUse` while training sets reference the equipment.
    pub fn delete_equipment(&mut self, id: EquipmentId) -> Result<Equipment, Error> {
        let idx = self
            .equipments
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| Error::not_found("Equipment", id))?;
        let count = self.sets_for_equipment(id).len();
        if count > 0 {
            return Err(Error::InUse {
                kind: "Equipment",
                name: self.equipments[idx].name.clone(),
                count,
                used_by: "training sets",
            });
        }
        let removed = self.equipments.remove(idx);
        self.save_equipments();
        Ok(removed)
    }

    /// Raises the equipment's PR to `weight_kg` if it beats the current one.
    /// Returns whether the PR changed.
    /// # Errors
    /// `NotFound` for an unknown equipment id.
    pub fn bump_personal_record(&mut self, id: EquipmentId, weight_kg: f64) -> Result<bool, Error> {
        let equipment = self
            .equipments
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::not_found("Equipment", id))?;
        if equipment.personal_record.is_some_and(|pr| pr >= weight_kg) {
            return Ok(false);
        }
        debug!(%id, weight_kg, "new personal record");
        equipment.personal_record = Some(weight_kg);
        self.save_equipments();
        Ok(true)
    }

    // --- Training logs ---

    pub fn training_logs(&self) -> &[TrainingLog] {
        &self.training_logs
    }

    pub fn log_for_day(&self, day: NaiveDate) -> Option<&TrainingLog> {
        self.training_logs
            .binary_search_by_key(&day, |l| l.date)
            .ok()
            .map(|idx| &self.training_logs[idx])
    }

    /// Days of the given month that have at least one logged set.
    pub fn logged_days_in_month(&self, year: i32, month: u32) -> BTreeSet<NaiveDate> {
        self.training_logs
            .iter()
            .filter(|l| l.date.year() == year && l.date.month() == month && !l.sets.is_empty())
            .map(|l| l.date)
            .collect()
    }

    /// Every training set done on the equipment, oldest day first.
    pub fn sets_for_equipment(&self, id: EquipmentId) -> Vec<(NaiveDate, &TrainingSet)> {
        self.training_logs
            .iter()
            .flat_map(|log| log.sets.iter().map(move |s| (log.date, s)))
            .filter(|(_, s)| s.equipment == id)
            .collect()
    }

    fn check_training_set(&self, set: &TrainingSet) -> Result<(), Error> {
        if self.equipment(set.equipment).is_none() {
            return Err(Error::not_found("Equipment", set.equipment));
        }
        if set.sets.is_empty() {
            return Err(Error::MissingField("sets"));
        }
        set.sets.iter().try_for_each(validate_set_info)
    }

    /// Adds `set` to the log of the calendar day of `when`, creating that log
    /// if the day has none yet.
    /// # Errors
    /// `NotFound` for unknown equipment, `MissingField`/`InvalidValue` for
    /// bad set data.
    pub fn add_training_set<D: Datelike>(&mut self, when: &D, set: TrainingSet) -> Result<TrainingLogId, Error> {
        let day = calendar_day(when).ok_or_else(|| Error::InvalidValue {
            field: "date",
            reason: "not a valid calendar day".to_string(),
        })?;
        self.check_training_set(&set)?;

        let log_id = match self.training_logs.binary_search_by_key(&day, |l| l.date) {
            Ok(idx) => {
                let log = &mut self.training_logs[idx];
                debug!(%day, log = %log.id, "appending training set to existing log");
                log.sets.push(set);
                log.id
            }
            Err(idx) => {
                let log = TrainingLog::new(day, vec![set]);
                let id = log.id;
                debug!(%day, log = %id, "creating training log");
                self.training_logs.insert(idx, log);
                id
            }
        };
        self.save_training_logs();
        Ok(log_id)
    }

    fn find_set(&self, id: TrainingSetId) -> Option<(usize, usize)> {
        self.training_logs.iter().enumerate().find_map(|(li, log)| {
            log.sets
                .iter()
                .position(|s| s.id == id)
                .map(|si| (li, si))
        })
    }

    pub fn training_set(&self, id: TrainingSetId) -> Option<(NaiveDate, &TrainingSet)> {
        self.find_set(id).map(|(li, si)| {
            let log = &self.training_logs[li];
            (log.date, &log.sets[si])
        })
    }

    /// Replaces the training set with the same id, in place.
    /// # Errors
    /// `NotFound`, or validation errors as in `add_training_set`.
    pub fn update_training_set(&mut self, set: TrainingSet) -> Result<(), Error> {
        let (li, si) = self
            .find_set(set.id)
            .ok_or_else(|| Error::not_found("Training set", set.id))?;
        self.check_training_set(&set)?;
        self.training_logs[li].sets[si] = set;
        self.save_training_logs();
        Ok(())
    }

    /// Removes a training set; a log left without sets is removed as well.
    /// Returns the removed set.
    /// # Errors
    /// `NotFound` if no log holds the set.
    pub fn delete_training_set(&mut self, id: TrainingSetId) -> Result<TrainingSet, Error> {
        let (li, si) = self
            .find_set(id)
            .ok_or_else(|| Error::not_found("Training set", id))?;
        let removed = self.training_logs[li].sets.remove(si);
        if self.training_logs[li].sets.is_empty() {
            let log = self.training_logs.remove(li);
            debug!(day = %log.date, log = %log.id, "removed empty training log");
        }
        self.save_training_logs();
        Ok(removed)
    }

    /// # Errors
    /// `NotFound` for an unknown log id.
    pub fn delete_training_log(&mut self, id: TrainingLogId) -> Result<TrainingLog, Error> {
        let idx = self
            .training_logs
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| Error::not_found("Training log", id))?;
        let removed = self.training_logs.remove(idx);
        self.save_training_logs();
        Ok(removed)
    }

    // --- Locations ---

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    fn location_index(&self, name: &str) -> Option<usize> {
        self.locations.iter().position(|l| same_name(l, name))
    }

    /// The stored spelling of a location, matched like every other name.
    pub fn location_named(&self, name: &str) -> Option<&String> {
        self.location_index(name).map(|idx| &self.locations[idx])
    }

    /// # Errors
    /// `MissingField` for an empty name, `DuplicateName` if it exists.
    pub fn add_location(&mut self, name: &str) -> Result<(), Error> {
        let name = required_name(name, "location")?;
        if let Some(idx) = self.location_index(&name) {
            return Err(Error::DuplicateName {
                kind: "Location",
                name: self.locations[idx].clone(),
            });
        }
        self.locations.push(name);
        self.save_locations();
        Ok(())
    }

    /// Renames a location and moves every equipment at it along. Returns the
    /// number of equipment entries that changed.
    /// # Errors
    /// `NotFound`, `MissingField`, or `DuplicateName` for a taken new name.
    pub fn rename_location(&mut self, old: &str, new: &str) -> Result<usize, Error> {
        let idx = self
            .location_index(old)
            .ok_or_else(|| Error::not_found("Location", old))?;
        let new = required_name(new, "location")?;
        if let Some(other) = self.location_index(&new).filter(|&i| i != idx) {
            return Err(Error::DuplicateName {
                kind: "Location",
                name: self.locations[other].clone(),
            });
        }
        let previous = std::mem::replace(&mut self.locations[idx], new.clone());
        self.save_locations();

        let mut moved = 0;
        for equipment in self.equipments.iter_mut().filter(|e| same_name(&e.location, &previous)) {
            equipment.location = new.clone();
            moved += 1;
        }
        if moved > 0 {
            self.save_equipments();
        }
        Ok(moved)
    }

    /// # Errors
    /// `NotFound` for an unknown location.
    pub fn delete_location(&mut self, name: &str) -> Result<String, Error> {
        let idx = self
            .location_index(name)
            .ok_or_else(|| Error::not_found("Location", name))?;
        let removed = self.locations.remove(idx);
        self.save_locations();
        Ok(removed)
    }

    // --- Preferences ---

    pub const fn preferred_weight_unit(&self) -> WeightUnit {
        self.preferred_weight_unit
    }

    pub fn set_preferred_weight_unit(&mut self, unit: WeightUnit) {
        self.preferred_weight_unit = unit;
        self.write_value(PREFERRED_WEIGHT_UNIT_KEY, &unit);
    }

    pub const fn last_edited_reps(&self) -> Option<u32> {
        self.last_edited_reps
    }

    pub fn set_last_edited_reps(&mut self, reps: u32) {
        self.last_edited_reps = Some(reps);
        self.write_value(LAST_EDITED_REPS_KEY, &reps);
    }

    pub const fn last_used_weight_unit(&self) -> Option<WeightUnit> {
        self.last_used_weight_unit
    }

    pub fn set_last_used_weight_unit(&mut self, unit: WeightUnit) {
        self.last_used_weight_unit = Some(unit);
        self.write_value(LAST_USED_WEIGHT_UNIT_KEY, &unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, KvStore};
    use rusqlite::Connection;

    /// Backend whose writes always fail and that never has data.
    struct BrokenKv;

    impl KvStore for BrokenKv {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, db::Error> {
            Err(db::Error::DataDir)
        }
        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), db::Error> {
            Err(db::Error::DataDir)
        }
        fn remove(&self, _key: &str) -> Result<(), db::Error> {
            Err(db::Error::DataDir)
        }
    }

    fn memory_store() -> FitnessStore<Connection> {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        FitnessStore::open(conn)
    }

    fn set_info(reps: u32, weight: f64) -> SetInfo {
        SetInfo {
            reps,
            weight,
            weight_unit: WeightUnit::Kg,
            time: 9 * 60,
            time_unit: TimeUnit::MinuteOfDay,
        }
    }

    fn store_with_bench() -> (FitnessStore<Connection>, EquipmentId) {
        let mut store = memory_store();
        let chest = store.add_muscle(Muscle::new("Chest", "#FF0000")).unwrap();
        let bench = store.add_equipment(Equipment::new("Bench Press", chest)).unwrap();
        (store, bench)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn empty_store_loads_empty_collections() {
        let store = memory_store();
        assert!(store.muscles().is_empty());
        assert!(store.equipments().is_empty());
        assert!(store.training_logs().is_empty());
        assert!(store.locations().is_empty());
        assert_eq!(store.preferred_weight_unit(), WeightUnit::Kg);
        assert_eq!(store.last_edited_reps(), None);
    }

    #[test]
    fn corrupt_data_loads_as_empty() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        conn.set(MUSCLES_KEY, b"{not json").unwrap();
        conn.set(PREFERRED_WEIGHT_UNIT_KEY, b"\"stone\"").unwrap();
        let store = FitnessStore::open(conn);
        assert!(store.muscles().is_empty());
        assert_eq!(store.preferred_weight_unit(), WeightUnit::Kg);
    }

    #[test]
    fn failed_writes_keep_in_memory_state() {
        let mut store = FitnessStore::open(BrokenKv);
        let id = store.add_muscle(Muscle::new("Legs", "#00FF00")).unwrap();
        assert_eq!(store.muscle(id).unwrap().name, "Legs");
        store.add_location("Home").unwrap();
        assert_eq!(store.locations(), ["Home".to_string()]);
    }

    #[test]
    fn muscle_names_are_unique_ignoring_case() {
        let mut store = memory_store();
        store.add_muscle(Muscle::new("Chest", "#FF0000")).unwrap();
        let err = store.add_muscle(Muscle::new("  chest ", "#00FF00")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "Muscle", .. }));
        assert_eq!(
            store.add_muscle(Muscle::new("   ", "#00FF00")).unwrap_err(),
            Error::MissingField("muscle name")
        );
    }

    #[test]
    fn duplicate_sub_muscles_are_rejected() {
        let mut store = memory_store();
        let id = store.add_muscle(Muscle::new("Back", "#0000FF")).unwrap();
        store.add_sub_muscle(id, SubMuscle::new("Lats", "#1111FF")).unwrap();
        let err = store.add_sub_muscle(id, SubMuscle::new("lats", "#2222FF")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "Sub-muscle", .. }));
        assert_eq!(store.muscle(id).unwrap().sub_muscles.len(), 1);
    }

    #[test]
    fn update_of_missing_id_is_not_found() {
        let mut store = memory_store();
        let err = store.update_muscle(Muscle::new("Ghost", "#000000")).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "Muscle", .. }));
        let err = store
            .update_equipment(Equipment::new("Ghost", MuscleId::new()))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "Equipment", .. }));
    }

    #[test]
    fn equipment_requires_known_muscle_and_matching_sub_muscle() {
        let mut store = memory_store();
        assert!(matches!(
            store.add_equipment(Equipment::new("Row", MuscleId::new())),
            Err(Error::NotFound { kind: "Muscle", .. })
        ));

        let chest = store
            .add_muscle(Muscle::new("Chest", "#F00").with_sub_muscles(vec![SubMuscle::new("Upper", "#F11")]))
            .unwrap();
        let back = store
            .add_muscle(Muscle::new("Back", "#00F").with_sub_muscles(vec![SubMuscle::new("Lats", "#11F")]))
            .unwrap();
        let lats = store.muscle(back).unwrap().sub_muscles[0].id;

        let mut fly = Equipment::new("Pec Fly", chest);
        fly.sub_muscle = Some(lats);
        assert!(matches!(
            store.add_equipment(fly),
            Err(Error::InvalidValue { field: "sub-muscle", .. })
        ));
    }

    #[test]
    fn muscle_in_use_cannot_be_deleted() {
        let (mut store, bench) = store_with_bench();
        let chest = store.equipment(bench).unwrap().main_muscle;
        assert!(matches!(store.delete_muscle(chest), Err(Error::InUse { count: 1, .. })));
        store.delete_equipment(bench).unwrap();
        store.delete_muscle(chest).unwrap();
        assert!(store.muscles().is_empty());
    }

    #[test]
    fn first_set_of_a_day_creates_a_log_and_second_appends() {
        let (mut store, bench) = store_with_bench();
        let morning = day(7).and_hms_opt(7, 30, 0).unwrap();
        let evening = day(7).and_hms_opt(19, 45, 0).unwrap();

        let first = store
            .add_training_set(&morning, TrainingSet::new(bench, vec![set_info(10, 60.0)]))
            .unwrap();
        assert_eq!(store.training_logs().len(), 1);
        assert_eq!(store.training_logs()[0].sets.len(), 1);

        let second = store
            .add_training_set(&evening, TrainingSet::new(bench, vec![set_info(8, 70.0)]))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.training_logs().len(), 1);
        assert_eq!(store.log_for_day(day(7)).unwrap().sets.len(), 2);
    }

    #[test]
    fn logs_stay_sorted_by_day() {
        let (mut store, bench) = store_with_bench();
        for d in [20, 3, 11] {
            store
                .add_training_set(&day(d), TrainingSet::new(bench, vec![set_info(5, 50.0)]))
                .unwrap();
        }
        let days: Vec<_> = store.training_logs().iter().map(|l| l.date).collect();
        assert_eq!(days, vec![day(3), day(11), day(20)]);
        assert_eq!(
            store.logged_days_in_month(2024, 5).into_iter().collect::<Vec<_>>(),
            days
        );
        assert!(store.logged_days_in_month(2024, 6).is_empty());
    }

    #[test]
    fn deleting_last_set_removes_log() {
        let (mut store, bench) = store_with_bench();
        let only = TrainingSet::new(bench, vec![set_info(10, 60.0)]);
        let only_id = only.id;
        store.add_training_set(&day(1), only).unwrap();

        store.delete_training_set(only_id).unwrap();
        assert!(store.training_logs().is_empty());
        assert!(matches!(
            store.delete_training_set(only_id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn deleting_one_of_several_sets_keeps_log() {
        let (mut store, bench) = store_with_bench();
        let a = TrainingSet::new(bench, vec![set_info(10, 60.0)]);
        let a_id = a.id;
        store.add_training_set(&day(2), a).unwrap();
        store
            .add_training_set(&day(2), TrainingSet::new(bench, vec![set_info(6, 80.0)]))
            .unwrap();

        store.delete_training_set(a_id).unwrap();
        let log = store.log_for_day(day(2)).unwrap();
        assert_eq!(log.sets.len(), 1);
        assert_eq!(log.sets[0].sets[0].reps, 6);
    }

    #[test]
    fn invalid_sets_are_rejected_without_saving() {
        let (mut store, bench) = store_with_bench();
        assert_eq!(
            store
                .add_training_set(&day(1), TrainingSet::new(bench, vec![]))
                .unwrap_err(),
            Error::MissingField("sets")
        );
        assert!(matches!(
            store.add_training_set(&day(1), TrainingSet::new(bench, vec![set_info(5, 0.0)])),
            Err(Error::InvalidValue { field: "weight", .. })
        ));
        assert!(matches!(
            store.add_training_set(&day(1), TrainingSet::new(bench, vec![set_info(0, 20.0)])),
            Err(Error::InvalidValue { field: "reps", .. })
        ));
        assert!(matches!(
            store.add_training_set(&day(1), TrainingSet::new(EquipmentId::new(), vec![set_info(5, 20.0)])),
            Err(Error::NotFound { kind: "Equipment", .. })
        ));
        assert!(store.training_logs().is_empty());
        assert_eq!(store.kv().get(TRAINING_LOGS_KEY).unwrap(), None);
    }

    #[test]
    fn update_training_set_replaces_in_place() {
        let (mut store, bench) = store_with_bench();
        let mut set = TrainingSet::new(bench, vec![set_info(10, 60.0)]);
        store.add_training_set(&day(4), set.clone()).unwrap();
        set.sets.push(set_info(8, 65.0));
        store.update_training_set(set.clone()).unwrap();
        let (date, stored) = store.training_set(set.id).unwrap();
        assert_eq!(date, day(4));
        assert_eq!(stored.sets.len(), 2);
    }

    #[test]
    fn equipment_with_history_cannot_be_deleted() {
        let (mut store, bench) = store_with_bench();
        store
            .add_training_set(&day(1), TrainingSet::new(bench, vec![set_info(5, 50.0)]))
            .unwrap();
        assert!(matches!(
            store.delete_equipment(bench),
            Err(Error::InUse { used_by: "training sets", .. })
        ));
    }

    #[test]
    fn personal_record_only_moves_up() {
        let (mut store, bench) = store_with_bench();
        assert!(store.bump_personal_record(bench, 80.0).unwrap());
        assert!(!store.bump_personal_record(bench, 75.0).unwrap());
        assert!(store.bump_personal_record(bench, 82.5).unwrap());
        assert_eq!(store.equipment(bench).unwrap().personal_record, Some(82.5));
    }

    #[test]
    fn duplicate_day_logs_are_merged_on_load() {
        let (store, bench) = store_with_bench();
        let logs = vec![
            TrainingLog::new(day(5), vec![TrainingSet::new(bench, vec![set_info(5, 40.0)])]),
            TrainingLog::new(day(1), vec![TrainingSet::new(bench, vec![set_info(5, 45.0)])]),
            TrainingLog::new(day(5), vec![TrainingSet::new(bench, vec![set_info(5, 50.0)])]),
        ];
        store
            .kv()
            .set(TRAINING_LOGS_KEY, &serde_json::to_vec(&logs).unwrap())
            .unwrap();

        let mut store = store;
        store.load_training_logs();
        assert_eq!(store.training_logs().len(), 2);
        assert_eq!(store.training_logs()[0].date, day(1));
        assert_eq!(store.log_for_day(day(5)).unwrap().sets.len(), 2);
    }

    #[test]
    fn locations_rename_moves_equipment() {
        let (mut store, bench) = store_with_bench();
        store.add_location("Garage").unwrap();
        assert!(matches!(
            store.add_location("garage"),
            Err(Error::DuplicateName { .. })
        ));
        let mut eq = store.equipment(bench).unwrap().clone();
        eq.location = "Garage".to_string();
        store.update_equipment(eq).unwrap();

        assert_eq!(store.rename_location("Garage", "Home Gym").unwrap(), 1);
        assert_eq!(store.locations(), ["Home Gym".to_string()]);
        assert_eq!(store.equipment(bench).unwrap().location, "Home Gym");

        store.delete_location("home gym").unwrap();
        assert!(store.locations().is_empty());
        assert!(matches!(
            store.delete_location("Garage"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn equipment_names_are_unique_ignoring_case() {
        let (mut store, bench) = store_with_bench();
        let chest = store.equipment(bench).unwrap().main_muscle;
        assert!(matches!(
            store.add_equipment(Equipment::new("  bench press ", chest)),
            Err(Error::DuplicateName { kind: "Equipment", .. })
        ));

        let squat = store.add_equipment(Equipment::new("Squat Rack", chest)).unwrap();
        let mut renamed = store.equipment(squat).unwrap().clone();
        renamed.name = "BENCH PRESS".to_string();
        assert!(matches!(
            store.update_equipment(renamed),
            Err(Error::DuplicateName { .. })
        ));
        // Keeping its own name is not a clash.
        let same = store.equipment(bench).unwrap().clone();
        store.update_equipment(same).unwrap();
        assert_eq!(store.equipments().len(), 2);
    }

    #[test]
    fn equipment_location_uses_stored_spelling() {
        let (mut store, bench) = store_with_bench();
        store.add_location("Home Gym").unwrap();
        let mut eq = store.equipment(bench).unwrap().clone();
        eq.location = " home gym".to_string();
        store.update_equipment(eq).unwrap();
        assert_eq!(store.equipment(bench).unwrap().location, "Home Gym");

        assert_eq!(store.rename_location("HOME GYM", "Garage").unwrap(), 1);
        assert_eq!(store.equipment(bench).unwrap().location, "Garage");
    }

    #[test]
    fn rename_moves_equipment_stored_with_other_case() {
        let (mut store, bench) = store_with_bench();
        let mut eq = store.equipment(bench).unwrap().clone();
        eq.location = "home gym".to_string();
        store.update_equipment(eq).unwrap();
        // Location added after the equipment, so the equipment kept its own spelling.
        store.add_location("Home Gym").unwrap();

        assert_eq!(store.rename_location("Home Gym", "Garage").unwrap(), 1);
        assert_eq!(store.equipment(bench).unwrap().location, "Garage");
    }

    #[test]
    fn deleting_a_log_removes_all_its_sets() {
        let (mut store, bench) = store_with_bench();
        let log_id = store
            .add_training_set(&day(3), TrainingSet::new(bench, vec![set_info(5, 80.0)]))
            .unwrap();
        store
            .add_training_set(&day(3), TrainingSet::new(bench, vec![set_info(5, 85.0)]))
            .unwrap();

        let removed = store.delete_training_log(log_id).unwrap();
        assert_eq!(removed.sets.len(), 2);
        assert!(store.log_for_day(day(3)).is_none());
        assert!(matches!(
            store.delete_training_log(log_id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn seeding_only_fills_empty_taxonomy() {
        let mut store = memory_store();
        assert!(store.seed_default_muscles());
        assert_eq!(store.muscles().len(), 2);
        assert!(!store.seed_default_muscles());
        assert_eq!(store.muscle_by_name("back").unwrap().sub_muscles.len(), 2);
    }

    #[test]
    fn preferences_persist_under_their_own_keys() {
        let mut store = memory_store();
        store.set_preferred_weight_unit(WeightUnit::Lb);
        store.set_last_edited_reps(12);
        store.set_last_used_weight_unit(WeightUnit::Lb);
        assert_eq!(
            store.kv().get(PREFERRED_WEIGHT_UNIT_KEY).unwrap().as_deref(),
            Some(&b"\"lb\""[..])
        );
        assert_eq!(store.kv().get(LAST_EDITED_REPS_KEY).unwrap().as_deref(), Some(&b"12"[..]));

        store.load_preferences();
        assert_eq!(store.preferred_weight_unit(), WeightUnit::Lb);
        assert_eq!(store.last_edited_reps(), Some(12));
        assert_eq!(store.last_used_weight_unit(), Some(WeightUnit::Lb));
    }
}
