// src/models.rs
use crate::units::WeightUnit;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Each entity kind gets its own id type so they can't be mixed up.
macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

entity_id!(MuscleId);
entity_id!(SubMuscleId);
entity_id!(EquipmentId);
entity_id!(TrainingSetId);
entity_id!(TrainingLogId);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubMuscle {
    pub id: SubMuscleId,
    pub name: String,
    pub color: String,
}

impl SubMuscle {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: SubMuscleId::new(),
            name: name.into(),
            color: color.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Muscle {
    pub id: MuscleId,
    pub name: String,
    pub color: String, // hex, e.g. "#FF3B30"
    #[serde(default)]
    pub sub_muscles: Vec<SubMuscle>,
}

impl Muscle {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: MuscleId::new(),
            name: name.into(),
            color: color.into(),
            sub_muscles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sub_muscles(mut self, sub_muscles: Vec<SubMuscle>) -> Self {
        self.sub_muscles = sub_muscles;
        self
    }

    pub fn sub_muscle(&self, id: SubMuscleId) -> Option<&SubMuscle> {
        self.sub_muscles.iter().find(|s| s.id == id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Equipment {
    pub id: EquipmentId,
    pub name: String,
    pub main_muscle: MuscleId,
    #[serde(default)]
    pub sub_muscle: Option<SubMuscleId>,
    #[serde(default)]
    pub image_name: Option<String>, // file name inside the image store, never a path
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub personal_record: Option<f64>, // kg
}

impl Equipment {
    pub fn new(name: impl Into<String>, main_muscle: MuscleId) -> Self {
        Self {
            id: EquipmentId::new(),
            name: name.into(),
            main_muscle,
            sub_muscle: None,
            image_name: None,
            location: String::new(),
            personal_record: None,
        }
    }
}

/// How `SetInfo::time` is to be read.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Minutes since midnight when the set was done.
    #[default]
    MinuteOfDay,
    Minutes,
    Seconds,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetInfo {
    pub reps: u32,
    pub weight: f64, // kg
    pub weight_unit: WeightUnit,
    pub time: u32,
    #[serde(default)]
    pub time_unit: TimeUnit,
}

impl SetInfo {
    /// Formats a minute-of-day time as `HH:MM`; durations get a unit suffix.
    pub fn time_label(&self) -> String {
        match self.time_unit {
            TimeUnit::MinuteOfDay => format!("{:02}:{:02}", self.time / 60, self.time % 60),
            TimeUnit::Minutes => format!("{} min", self.time),
            TimeUnit::Seconds => format!("{} s", self.time),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub id: TrainingSetId,
    pub equipment: EquipmentId,
    pub sets: Vec<SetInfo>,
}

impl TrainingSet {
    pub fn new(equipment: EquipmentId, sets: Vec<SetInfo>) -> Self {
        Self {
            id: TrainingSetId::new(),
            equipment,
            sets,
        }
    }

    /// Heaviest weight (kg) across the logged sets.
    pub fn max_weight(&self) -> Option<f64> {
        self.sets
            .iter()
            .map(|s| s.weight)
            .fold(None, |acc, w| Some(acc.map_or(w, |a: f64| a.max(w))))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingLog {
    pub id: TrainingLogId,
    pub date: NaiveDate,
    pub sets: Vec<TrainingSet>,
}

impl TrainingLog {
    pub fn new(date: NaiveDate, sets: Vec<TrainingSet>) -> Self {
        Self {
            id: TrainingLogId::new(),
            date,
            sets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let id = EquipmentId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
        let parsed: EquipmentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn equipment_tolerates_missing_optional_fields() {
        let muscle = MuscleId::new();
        let json = format!(r#"{{"id":"{}","name":"Row","main_muscle":"{}"}}"#, EquipmentId::new(), muscle);
        let eq: Equipment = serde_json::from_str(&json).unwrap();
        assert_eq!(eq.main_muscle, muscle);
        assert!(eq.image_name.is_none());
        assert!(eq.location.is_empty());
    }

    #[test]
    fn max_weight_picks_heaviest_set() {
        let set = |w| SetInfo {
            reps: 5,
            weight: w,
            weight_unit: WeightUnit::Kg,
            time: 600,
            time_unit: TimeUnit::MinuteOfDay,
        };
        let ts = TrainingSet::new(EquipmentId::new(), vec![set(60.0), set(82.5), set(70.0)]);
        assert_eq!(ts.max_weight(), Some(82.5));
        assert_eq!(TrainingSet::new(EquipmentId::new(), vec![]).max_weight(), None);
    }

    #[test]
    fn time_label_formats_minute_of_day() {
        let info = SetInfo {
            reps: 1,
            weight: 1.0,
            weight_unit: WeightUnit::Kg,
            time: 7 * 60 + 5,
            time_unit: TimeUnit::MinuteOfDay,
        };
        assert_eq!(info.time_label(), "07:05");
    }
}
