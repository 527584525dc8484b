//! Compiled sensor configuration.
//!
//! The engine consumes an already-parsed config object: YAML ingestion and
//! schema validation live with the host. What arrives here is the compiled
//! shape — sensors, their formulas, variables and alternate-state handlers —
//! which `validate()` checks for the invariants the evaluator relies on.

use std::collections::{BTreeMap, BTreeSet};

use synsor_common::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The id the first (state-producing) formula of a sensor may carry instead
/// of the sensor's unique_id.
pub const MAIN_FORMULA_ID: &str = "main";

/// A variable binding in a formula or sensor scope.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Int(i64),
    Number(f64),
    Text(String),
    /// Reference to an entity, `domain.object`.
    Entity(String),
    /// A nested formula evaluated on demand.
    Computed(ComputedVariable),
}

impl VariableValue {
    /// The entity id this variable points at, if it is an entity alias.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            VariableValue::Entity(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<Value> {
        match self {
            VariableValue::Int(i) => Some(Value::Int(*i)),
            VariableValue::Number(n) => Some(Value::Number(*n)),
            VariableValue::Text(s) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }
}

/// A formula-valued variable with its own failure handling.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedVariable {
    pub formula: String,
    pub alternate_state_handler: Option<AlternateStateHandler>,
    /// When set, alternate states flow into the evaluator instead of
    /// short-circuiting to the handler; any operation touching an alternate
    /// yields that alternate.
    pub allow_unresolved_states: bool,
}

impl ComputedVariable {
    pub fn new<S: Into<String>>(formula: S) -> Self {
        Self {
            formula: formula.into(),
            alternate_state_handler: None,
            allow_unresolved_states: false,
        }
    }

    pub fn with_handler(mut self, handler: AlternateStateHandler) -> Self {
        self.alternate_state_handler = Some(handler);
        self
    }
}

/// One handler slot value: a literal, or a formula with local variables.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerValue {
    Literal(Value),
    Formula {
        formula: String,
        variables: BTreeMap<String, VariableValue>,
    },
}

impl HandlerValue {
    pub fn formula<S: Into<String>>(formula: S) -> Self {
        HandlerValue::Formula {
            formula: formula.into(),
            variables: BTreeMap::new(),
        }
    }
}

impl From<i64> for HandlerValue {
    fn from(v: i64) -> Self {
        HandlerValue::Literal(Value::Int(v))
    }
}

impl From<f64> for HandlerValue {
    fn from(v: f64) -> Self {
        HandlerValue::Literal(Value::Number(v))
    }
}

impl From<bool> for HandlerValue {
    fn from(v: bool) -> Self {
        HandlerValue::Literal(Value::Boolean(v))
    }
}

impl From<&str> for HandlerValue {
    fn from(v: &str) -> Self {
        HandlerValue::Literal(Value::Text(v.to_string()))
    }
}

/// Declared reactions to alternate-state inputs or results.
///
/// A populated slot — even one declaring the literal `None` — is an explicit
/// answer and takes priority over `fallback`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlternateStateHandler {
    pub none: Option<HandlerValue>,
    pub unknown: Option<HandlerValue>,
    pub unavailable: Option<HandlerValue>,
    pub fallback: Option<HandlerValue>,
}

impl AlternateStateHandler {
    pub fn with_none<H: Into<HandlerValue>>(mut self, v: H) -> Self {
        self.none = Some(v.into());
        self
    }

    pub fn with_unknown<H: Into<HandlerValue>>(mut self, v: H) -> Self {
        self.unknown = Some(v.into());
        self
    }

    pub fn with_unavailable<H: Into<HandlerValue>>(mut self, v: H) -> Self {
        self.unavailable = Some(v.into());
        self
    }

    pub fn with_fallback<H: Into<HandlerValue>>(mut self, v: H) -> Self {
        self.fallback = Some(v.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.none.is_none()
            && self.unknown.is_none()
            && self.unavailable.is_none()
            && self.fallback.is_none()
    }
}

/// One formula of a sensor. The first formula in a sensor produces the
/// sensor's state; the rest produce named attributes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaConfig {
    pub id: String,
    pub formula: String,
    pub variables: BTreeMap<String, VariableValue>,
    /// Static attributes attached verbatim to the published result.
    pub attributes: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
    pub alternate_state_handler: Option<AlternateStateHandler>,
}

impl FormulaConfig {
    pub fn new<I: Into<String>, F: Into<String>>(id: I, formula: F) -> Self {
        Self {
            id: id.into(),
            formula: formula.into(),
            variables: BTreeMap::new(),
            attributes: BTreeMap::new(),
            metadata: BTreeMap::new(),
            alternate_state_handler: None,
        }
    }

    pub fn with_variable<N: Into<String>>(mut self, name: N, value: VariableValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_handler(mut self, handler: AlternateStateHandler) -> Self {
        self.alternate_state_handler = Some(handler);
        self
    }
}

/// A synthetic sensor: a main formula plus attribute formulas.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub unique_id: String,
    pub entity_id: Option<String>,
    pub device_identifier: Option<String>,
    pub enabled: bool,
    /// Invariant: non-empty; element 0 is the main formula.
    pub formulas: Vec<FormulaConfig>,
    pub metadata: BTreeMap<String, Value>,
}

impl SensorConfig {
    pub fn new<I: Into<String>, F: Into<String>>(unique_id: I, main_formula: F) -> Self {
        let unique_id = unique_id.into();
        let main = FormulaConfig::new(MAIN_FORMULA_ID, main_formula);
        Self {
            unique_id,
            entity_id: None,
            device_identifier: None,
            enabled: true,
            formulas: vec![main],
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_entity_id<S: Into<String>>(mut self, entity_id: S) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_variable<N: Into<String>>(mut self, name: N, value: VariableValue) -> Self {
        self.formulas[0].variables.insert(name.into(), value);
        self
    }

    pub fn with_main_handler(mut self, handler: AlternateStateHandler) -> Self {
        self.formulas[0].alternate_state_handler = Some(handler);
        self
    }

    /// Append an attribute formula. The formula id follows the
    /// `<unique_id>_<attr_name>` convention.
    pub fn with_attribute<N: Into<String>, F: Into<String>>(mut self, name: N, formula: F) -> Self {
        let name = name.into();
        let id = format!("{}_{}", self.unique_id, name);
        self.formulas.push(FormulaConfig::new(id, formula));
        self
    }

    pub fn main_formula(&self) -> &FormulaConfig {
        &self.formulas[0]
    }

    pub fn attribute_formulas(&self) -> &[FormulaConfig] {
        &self.formulas[1..]
    }

    /// The attribute name an attribute-formula id encodes.
    pub fn attribute_name<'a>(&self, formula_id: &'a str) -> Option<&'a str> {
        formula_id
            .strip_prefix(self.unique_id.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
    }
}

/// Engine-wide settings carried by the config.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GlobalSettings {
    /// Variables visible to every sensor, shadowed by sensor-scope bindings.
    pub variables: BTreeMap<String, VariableValue>,
    /// Extra truth-state strings merged into the default boolean vocabulary.
    pub extra_true_states: Vec<String>,
    pub extra_false_states: Vec<String>,
}

/// Top-level compiled configuration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub global: GlobalSettings,
    pub sensors: Vec<SensorConfig>,
    /// `sensor_id -> referenced sensor_ids`, populated during compile.
    pub cross_sensor_references: BTreeMap<String, BTreeSet<String>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(mut self, sensor: SensorConfig) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn sensor(&self, unique_id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.unique_id == unique_id)
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|s| s.unique_id.as_str())
    }

    /// Structural validation: formula list invariants, id conventions,
    /// duplicate sensors, and formula syntax. Name-level validation (unknown
    /// references inside computed variables) happens at compile, where the
    /// domain list and sensor registry are known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.unique_id.as_str()) {
                return Err(ConfigError::DuplicateSensor {
                    unique_id: sensor.unique_id.clone(),
                });
            }
            if sensor.formulas.is_empty() {
                return Err(ConfigError::NoFormulas {
                    unique_id: sensor.unique_id.clone(),
                });
            }

            let main = &sensor.formulas[0];
            if main.id != MAIN_FORMULA_ID && main.id != sensor.unique_id {
                return Err(ConfigError::BadFormulaId {
                    unique_id: sensor.unique_id.clone(),
                    formula_id: main.id.clone(),
                });
            }

            for attr in sensor.attribute_formulas() {
                if sensor.attribute_name(&attr.id).is_none_or(str::is_empty) {
                    return Err(ConfigError::BadFormulaId {
                        unique_id: sensor.unique_id.clone(),
                        formula_id: attr.id.clone(),
                    });
                }
            }

            for formula in &sensor.formulas {
                Self::validate_formula_text(&sensor.unique_id, &formula.id, &formula.formula)?;
                for value in formula.variables.values() {
                    if let VariableValue::Computed(cv) = value {
                        Self::validate_formula_text(&sensor.unique_id, &formula.id, &cv.formula)?;
                        Self::validate_handler(
                            &sensor.unique_id,
                            &formula.id,
                            cv.alternate_state_handler.as_ref(),
                        )?;
                    }
                }
                Self::validate_handler(
                    &sensor.unique_id,
                    &formula.id,
                    formula.alternate_state_handler.as_ref(),
                )?;
            }
        }
        Ok(())
    }

    fn validate_formula_text(
        unique_id: &str,
        formula_id: &str,
        text: &str,
    ) -> Result<(), ConfigError> {
        synsor_parse::parse(text).map_err(|e| ConfigError::Syntax {
            unique_id: unique_id.to_string(),
            formula_id: formula_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn validate_handler(
        unique_id: &str,
        formula_id: &str,
        handler: Option<&AlternateStateHandler>,
    ) -> Result<(), ConfigError> {
        let Some(handler) = handler else {
            return Ok(());
        };
        for slot in [
            &handler.none,
            &handler.unknown,
            &handler.unavailable,
            &handler.fallback,
        ] {
            if let Some(HandlerValue::Formula { formula, .. }) = slot {
                Self::validate_formula_text(unique_id, formula_id, formula)?;
            }
        }
        Ok(())
    }
}

/// Compile-time configuration failures. These fail a reload loudly.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("sensor '{unique_id}' is declared more than once")]
    DuplicateSensor { unique_id: String },

    #[error("sensor '{unique_id}' has no formulas")]
    NoFormulas { unique_id: String },

    #[error("sensor '{unique_id}': formula id '{formula_id}' violates naming convention")]
    BadFormulaId {
        unique_id: String,
        formula_id: String,
    },

    #[error("sensor '{unique_id}', formula '{formula_id}': {message}")]
    Syntax {
        unique_id: String,
        formula_id: String,
        message: String,
    },

    #[error("sensor '{unique_id}', formula '{formula_id}': unknown reference '{name}'")]
    UnknownReference {
        unique_id: String,
        formula_id: String,
        name: String,
    },

    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("no entity domains configured")]
    MissingDomains,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config::new().with_sensor(
            SensorConfig::new("energy_total", "a + b")
                .with_variable("a", VariableValue::Int(1))
                .with_variable("b", VariableValue::Entity("sensor.meter".into())),
        )
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(minimal().validate(), Ok(()));
    }

    #[test]
    fn duplicate_sensor_rejected() {
        let config = minimal().with_sensor(SensorConfig::new("energy_total", "1"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateSensor { .. })
        ));
    }

    #[test]
    fn empty_formula_list_rejected() {
        let mut config = minimal();
        config.sensors[0].formulas.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoFormulas { .. })
        ));
    }

    #[test]
    fn attribute_id_convention_enforced() {
        let mut config = minimal();
        config.sensors[0]
            .formulas
            .push(FormulaConfig::new("wrong_prefix_doubled", "state * 2"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadFormulaId { .. })
        ));

        let config = minimal().with_sensor(
            SensorConfig::new("other", "1").with_attribute("doubled", "state * 2"),
        );
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn syntax_errors_fail_validation() {
        let config = Config::new().with_sensor(SensorConfig::new("s", "a +"));
        assert!(matches!(config.validate(), Err(ConfigError::Syntax { .. })));
    }

    #[test]
    fn handler_formulas_are_syntax_checked() {
        let handler = AlternateStateHandler::default()
            .with_unavailable(HandlerValue::formula("a * ("));
        let config =
            Config::new().with_sensor(SensorConfig::new("s", "a").with_main_handler(handler));
        assert!(matches!(config.validate(), Err(ConfigError::Syntax { .. })));
    }

    #[test]
    fn main_formula_id_may_be_unique_id() {
        let mut config = minimal();
        config.sensors[0].formulas[0].id = "energy_total".into();
        assert_eq!(config.validate(), Ok(()));
    }
}
