// src/units.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::EnumIter;

/// Kilograms in one pound. Exact by definition; the other direction is derived from it.
pub const KG_PER_LB: f64 = 0.453_592_37;

/// Display unit for weights. Stored weights are always kilograms.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kg,
    Lb,
}

impl WeightUnit {
    pub const fn label(self) -> &'static str {
        match self {
            WeightUnit::Kg => "kg",
            WeightUnit::Lb => "lb",
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<&str> for WeightUnit {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "kg" | "kgs" | "kilogram" | "kilograms" => Ok(WeightUnit::Kg),
            "lb" | "lbs" | "pound" | "pounds" => Ok(WeightUnit::Lb),
            _ => anyhow::bail!("Invalid weight unit: {}", value),
        }
    }
}

/// Converts a canonical kilogram value into `unit` for display.
#[must_use]
pub fn convert_from_kg(kg: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Kg => kg,
        WeightUnit::Lb => kg / KG_PER_LB,
    }
}

/// Converts a value entered in `unit` into canonical kilograms.
#[must_use]
pub fn convert_to_kg(value: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Kg => value,
        WeightUnit::Lb => value * KG_PER_LB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_kg_round_trips_through_pounds() {
        let lb = convert_from_kg(100.0, WeightUnit::Lb);
        assert!((lb - 220.462_262_185).abs() < 1e-6);
        let back = convert_to_kg(lb, WeightUnit::Lb);
        assert!((back - 100.0).abs() < 1e-9);
    }

    #[test]
    fn kg_is_identity() {
        assert_eq!(convert_from_kg(42.5, WeightUnit::Kg), 42.5);
        assert_eq!(convert_to_kg(42.5, WeightUnit::Kg), 42.5);
    }

    #[test]
    fn parses_unit_aliases() {
        assert_eq!(WeightUnit::try_from("LBS").unwrap(), WeightUnit::Lb);
        assert_eq!(WeightUnit::try_from(" kg ").unwrap(), WeightUnit::Kg);
        assert!(WeightUnit::try_from("stone").is_err());
    }

    #[test]
    fn serializes_as_short_label() {
        assert_eq!(serde_json::to_string(&WeightUnit::Lb).unwrap(), "\"lb\"");
        let unit: WeightUnit = serde_json::from_str("\"kg\"").unwrap();
        assert_eq!(unit, WeightUnit::Kg);
    }
}
