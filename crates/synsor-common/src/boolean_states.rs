//! Boolean state-string mappings.
//!
//! Hosts report many binary states as words (`on`/`off`, `home`/`not_home`,
//! `locked`/`unlocked`). The evaluator is initialized with a name map built
//! from these sets so that formulas like `binary_sensor.door == on` compare
//! correctly. The sets are configurable per engine; the defaults cover the
//! common host vocabulary.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

const DEFAULT_TRUE_STATES: &[&str] = &[
    "on", "true", "yes", "open", "home", "locked", "armed", "active", "connected", "charging",
    "detected", "wet", "motion", "occupied", "running", "heat", "cool",
];

const DEFAULT_FALSE_STATES: &[&str] = &[
    "off",
    "false",
    "no",
    "closed",
    "not_home",
    "away",
    "unlocked",
    "disarmed",
    "inactive",
    "disconnected",
    "discharging",
    "clear",
    "dry",
    "still",
    "idle",
    "standby",
];

static DEFAULTS: Lazy<BooleanStates> = Lazy::new(|| {
    BooleanStates::from_sets(
        DEFAULT_TRUE_STATES.iter().map(|s| s.to_string()).collect(),
        DEFAULT_FALSE_STATES.iter().map(|s| s.to_string()).collect(),
    )
});

/// A pair of truth-state string sets, read-only after construction.
#[derive(Debug, Clone)]
pub struct BooleanStates {
    true_states: HashSet<String>,
    false_states: HashSet<String>,
}

impl BooleanStates {
    pub fn from_sets(true_states: HashSet<String>, false_states: HashSet<String>) -> Self {
        Self {
            true_states,
            false_states,
        }
    }

    /// The process-wide default vocabulary.
    pub fn defaults() -> &'static BooleanStates {
        &DEFAULTS
    }

    /// Extend the defaults with host-configured states.
    pub fn with_overrides<I, J>(extra_true: I, extra_false: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        let mut states = DEFAULTS.clone();
        states.true_states.extend(extra_true);
        states.false_states.extend(extra_false);
        states
    }

    /// Map a state string to a boolean, if it is in either set.
    pub fn classify(&self, state: &str) -> Option<bool> {
        if self.true_states.contains(state) {
            Some(true)
        } else if self.false_states.contains(state) {
            Some(false)
        } else {
            None
        }
    }

    /// The full name → bool map handed to the evaluator, so bare words like
    /// `on` resolve to booleans inside formulas.
    pub fn name_map(&self) -> HashMap<String, bool> {
        let mut names = HashMap::with_capacity(self.true_states.len() + self.false_states.len());
        for s in &self.true_states {
            names.insert(s.clone(), true);
        }
        for s in &self.false_states {
            names.insert(s.clone(), false);
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_common_pairs() {
        let states = BooleanStates::defaults();
        assert_eq!(states.classify("on"), Some(true));
        assert_eq!(states.classify("off"), Some(false));
        assert_eq!(states.classify("home"), Some(true));
        assert_eq!(states.classify("not_home"), Some(false));
        assert_eq!(states.classify("heat_pump"), None);
    }

    #[test]
    fn overrides_extend_defaults() {
        let states =
            BooleanStates::with_overrides(vec!["present".to_string()], vec!["absent".to_string()]);
        assert_eq!(states.classify("present"), Some(true));
        assert_eq!(states.classify("absent"), Some(false));
        assert_eq!(states.classify("on"), Some(true));
    }

    #[test]
    fn name_map_contains_both_sets() {
        let map = BooleanStates::defaults().name_map();
        assert_eq!(map.get("locked"), Some(&true));
        assert_eq!(map.get("unlocked"), Some(&false));
    }
}
