//! Robot classes
//!
//! A class scales a fixed set of simulation constants by multipliers.
//! Every class-dependent lookup goes through [`ClassTable::value`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

/// Name of the class every robot gets when it does not ask for one
pub const DEFAULT_CLASS: &str = "default";

/// Simulation constants a class is allowed to scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassField {
    BotMaxSpeed,
    BotAccRate,
    BotMinTurnRate,
    BotMaxTurnRate,
    BotArmor,
}

impl ClassField {
    fn base(self, sim: &SimConfig) -> f64 {
        match self {
            ClassField::BotMaxSpeed => sim.bot_max_speed,
            ClassField::BotAccRate => sim.bot_acc_rate,
            ClassField::BotMinTurnRate => sim.bot_min_turn_rate,
            ClassField::BotMaxTurnRate => sim.bot_max_turn_rate,
            ClassField::BotArmor => sim.bot_armor,
        }
    }
}

/// One (field, multiplier) entry of a class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassOverride {
    pub field: ClassField,
    pub multiplier: f64,
}

const fn ov(field: ClassField, multiplier: f64) -> ClassOverride {
    ClassOverride { field, multiplier }
}

/// Class name to override list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassTable(BTreeMap<String, Vec<ClassOverride>>);

impl Default for ClassTable {
    fn default() -> Self {
        use ClassField::*;

        let mut classes = BTreeMap::new();
        classes.insert(DEFAULT_CLASS.to_string(), Vec::new());
        // Slow, sluggish, hard to hurt
        classes.insert(
            "heavy".to_string(),
            vec![
                ov(BotMaxSpeed, 0.7),
                ov(BotAccRate, 0.55),
                ov(BotMinTurnRate, 0.923076923),
                ov(BotMaxTurnRate, 0.333333333),
                ov(BotArmor, 0.77),
            ],
        );
        // Fast, nimble, fragile
        classes.insert(
            "light".to_string(),
            vec![
                ov(BotMaxSpeed, 1.4),
                ov(BotAccRate, 1.25),
                ov(BotMinTurnRate, 1.2),
                ov(BotMaxTurnRate, 1.6666666666),
                ov(BotArmor, 1.33),
            ],
        );
        Self(classes)
    }
}

impl ClassTable {
    pub fn new(classes: BTreeMap<String, Vec<ClassOverride>>) -> Self {
        Self(classes)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.0.contains_key(class)
    }

    /// Multiplier for `field` in `class`, 1.0 when the class does not scale it
    pub fn multiplier(&self, field: ClassField, class: &str) -> f64 {
        self.0
            .get(class)
            .and_then(|overrides| overrides.iter().find(|o| o.field == field))
            .map(|o| o.multiplier)
            .unwrap_or(1.0)
    }

    /// Effective value of `field` for a robot of `class`
    pub fn value(&self, sim: &SimConfig, field: ClassField, class: &str) -> f64 {
        field.base(sim) * self.multiplier(field, class)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl SimConfig {
    /// Shorthand for `self.classes.value(self, field, class)`
    pub fn class_value(&self, field: ClassField, class: &str) -> f64 {
        self.classes.value(self, field, class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_class_is_unscaled() {
        let sim = SimConfig::default();
        assert_eq!(
            sim.class_value(ClassField::BotMaxSpeed, DEFAULT_CLASS),
            sim.bot_max_speed
        );
        assert_eq!(sim.class_value(ClassField::BotArmor, "unknown"), sim.bot_armor);
    }

    #[test]
    fn heavy_class_scales_fields() {
        let sim = SimConfig::default();
        assert!((sim.class_value(ClassField::BotMaxSpeed, "heavy") - 3.5).abs() < 1e-9);
        assert!((sim.class_value(ClassField::BotArmor, "heavy") - 0.77).abs() < 1e-9);
        assert!(sim.classes.contains("light"));
        assert!(!sim.classes.contains("medium"));
    }
}
