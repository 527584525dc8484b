//! Dependency extraction (C3).
//!
//! A pure pass over the classified AST of one formula, producing the set of
//! `(identifier, kind)` pairs the formula depends on — including the ones
//! hiding inside `metadata(...)` arguments, aggregation selectors, and
//! computed-variable formulas.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use synsor_common::{EngineError, EngineErrorKind};
use synsor_parse::{AstNode, AstNodeType, parse};

use crate::classify::{Classified, Classifier, STATE_TOKEN};
use crate::config::VariableValue;
use crate::selector;

/// What kind of thing a dependency identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKind {
    Attribute,
    Entity,
    CrossSensor,
    Variable,
    State,
    Collection,
}

/// One dependency of a formula.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dependency {
    pub identifier: String,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn new<S: Into<String>>(identifier: S, kind: DependencyKind) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
        }
    }
}

/// Aggregation functions whose first argument may be a collection selector.
pub const AGGREGATION_FUNCTIONS: &[&str] = &["sum", "avg", "mean", "count", "min", "max", "std", "var"];

/// Extraction inputs for one formula scope.
pub struct DependencyExtractor<'a> {
    pub classifier: &'a Classifier<'a>,
    /// Merged variable scope: globals, then sensor, then formula bindings.
    pub variables: &'a BTreeMap<String, VariableValue>,
    /// Attribute names of the current sensor whose formulas precede this one.
    pub attribute_names: &'a HashSet<String>,
    /// entity_id -> sensor unique_id, for synthetic sensors with entities.
    pub sensor_entity_ids: &'a BTreeMap<String, String>,
}

impl<'a> DependencyExtractor<'a> {
    /// Extract the dependency set of one formula AST.
    pub fn extract(&self, ast: &AstNode) -> Result<BTreeSet<Dependency>, EngineError> {
        let mut deps = BTreeSet::new();
        let mut visiting = HashSet::new();
        self.extract_into(ast, &mut deps, &mut visiting)?;
        Ok(deps)
    }

    fn extract_into(
        &self,
        ast: &AstNode,
        deps: &mut BTreeSet<Dependency>,
        visiting: &mut HashSet<String>,
    ) -> Result<(), EngineError> {
        // Names first.
        let mut names = Vec::new();
        ast.visit_names(|nv| names.push((nv.original.to_string(), self.classifier.classify(nv))));

        for (_, classified) in &names {
            match classified {
                Classified::State => {
                    deps.insert(Dependency::new(STATE_TOKEN, DependencyKind::State));
                }
                Classified::Entity { entity_id, .. } => {
                    deps.insert(Dependency::new(entity_id.clone(), DependencyKind::Entity));
                }
                Classified::Variable { name, .. } => {
                    let kind = if self.attribute_names.contains(name) {
                        DependencyKind::Attribute
                    } else {
                        DependencyKind::Variable
                    };
                    deps.insert(Dependency::new(name.clone(), kind));
                    self.extract_variable(name, deps, visiting)?;
                }
                Classified::CrossSensor { sensor_id } => {
                    deps.insert(Dependency::new(sensor_id.clone(), DependencyKind::CrossSensor));
                }
                Classified::Reserved(_) | Classified::Unresolved { .. } => {}
            }
        }

        // Then calls: metadata arguments and aggregation selectors.
        let mut calls: Vec<(String, Vec<AstNode>)> = Vec::new();
        ast.visit_calls(|name, args| calls.push((name.to_string(), args.to_vec())));

        for (name, args) in &calls {
            if name == "metadata" {
                self.extract_metadata_call(args, deps)?;
            } else if AGGREGATION_FUNCTIONS.contains(&name.as_str()) {
                self.extract_aggregation_call(args, deps)?;
            }
        }

        Ok(())
    }

    /// Follow a variable binding: entity aliases add an ENTITY dep, computed
    /// variables recurse into their own formula.
    fn extract_variable(
        &self,
        name: &str,
        deps: &mut BTreeSet<Dependency>,
        visiting: &mut HashSet<String>,
    ) -> Result<(), EngineError> {
        match self.variables.get(name) {
            Some(VariableValue::Entity(entity_id)) => {
                deps.insert(Dependency::new(entity_id.clone(), DependencyKind::Entity));
                Ok(())
            }
            Some(VariableValue::Computed(cv)) => {
                if !visiting.insert(name.to_string()) {
                    // Recursive computed variables compile to a cycle error
                    // rather than a stack overflow.
                    return Err(EngineError::new(EngineErrorKind::Circular).with_message(format!(
                        "computed variable '{name}' references itself"
                    )));
                }
                let ast = parse(&cv.formula).map_err(|e| {
                    EngineError::new(EngineErrorKind::Syntax)
                        .with_message(format!("computed variable '{name}': {e}"))
                })?;
                self.extract_into(&ast, deps, visiting)?;
                visiting.remove(name);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `metadata(first_arg, 'key')`: a variable pointing at a registered
    /// sensor's entity couples the two sensors, so record the CROSS_SENSOR
    /// edge alongside the VARIABLE dep the name walk already produced.
    fn extract_metadata_call(
        &self,
        args: &[AstNode],
        deps: &mut BTreeSet<Dependency>,
    ) -> Result<(), EngineError> {
        let Some(first) = args.first() else {
            return Err(EngineError::new(EngineErrorKind::Validation)
                .with_message("metadata() requires an entity or variable argument"));
        };

        if let Some(nv) = first.as_single_name() {
            if let Classified::Variable { name, .. } = self.classifier.classify(nv) {
                if let Some(VariableValue::Entity(entity_id)) = self.variables.get(&name) {
                    if let Some(sensor_id) = self.sensor_entity_ids.get(entity_id) {
                        deps.insert(Dependency::new(
                            sensor_id.clone(),
                            DependencyKind::CrossSensor,
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Aggregations over a literal selector string add a COLLECTION dep
    /// keyed on the canonical selector form.
    fn extract_aggregation_call(
        &self,
        args: &[AstNode],
        deps: &mut BTreeSet<Dependency>,
    ) -> Result<(), EngineError> {
        let Some(AstNodeType::Literal(synsor_common::Value::Text(raw))) =
            args.first().map(|a| &a.node_type)
        else {
            return Ok(());
        };
        if !selector::looks_like_selector(raw) {
            return Ok(());
        }

        let sel = selector::parse_selector(raw)?;
        deps.insert(Dependency::new(sel.canonical(), DependencyKind::Collection));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputedVariable;

    fn extract(
        formula: &str,
        variables: BTreeMap<String, VariableValue>,
        attribute_names: &[&str],
    ) -> Result<BTreeSet<Dependency>, EngineError> {
        let domains: HashSet<String> =
            ["sensor", "binary_sensor"].iter().map(|s| s.to_string()).collect();
        let sensor_ids: HashSet<String> =
            ["grid_power", "solar_power"].iter().map(|s| s.to_string()).collect();
        let var_names: HashSet<String> = variables.keys().cloned().collect();
        let in_scope = move |name: &str| var_names.contains(name);
        let classifier = Classifier::new(&domains, &in_scope, &sensor_ids);

        let sensor_entity_ids: BTreeMap<String, String> =
            [("sensor.grid_power".to_string(), "grid_power".to_string())].into();
        let attribute_names: HashSet<String> =
            attribute_names.iter().map(|s| s.to_string()).collect();

        let extractor = DependencyExtractor {
            classifier: &classifier,
            variables: &variables,
            attribute_names: &attribute_names,
            sensor_entity_ids: &sensor_entity_ids,
        };
        extractor.extract(&parse(formula).unwrap())
    }

    #[test]
    fn entity_and_variable_deps() {
        let vars: BTreeMap<String, VariableValue> =
            [("power".to_string(), VariableValue::Entity("sensor.p".into()))].into();
        let deps = extract("power + sensor.other * 2", vars, &[]).unwrap();
        assert!(deps.contains(&Dependency::new("power", DependencyKind::Variable)));
        // The entity alias is followed to its entity.
        assert!(deps.contains(&Dependency::new("sensor.p", DependencyKind::Entity)));
        assert!(deps.contains(&Dependency::new("sensor.other", DependencyKind::Entity)));
    }

    #[test]
    fn state_token_dep() {
        let deps = extract("state * 2", BTreeMap::new(), &[]).unwrap();
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            [Dependency::new("state", DependencyKind::State)]
        );
    }

    #[test]
    fn attribute_scope_changes_kind() {
        let vars: BTreeMap<String, VariableValue> =
            [("doubled".to_string(), VariableValue::Number(0.0))].into();
        let deps = extract("doubled + 1", vars, &["doubled"]).unwrap();
        assert!(deps.contains(&Dependency::new("doubled", DependencyKind::Attribute)));
    }

    #[test]
    fn cross_sensor_dep() {
        let deps = extract("grid_power + 1", BTreeMap::new(), &[]).unwrap();
        assert!(deps.contains(&Dependency::new("grid_power", DependencyKind::CrossSensor)));
    }

    #[test]
    fn metadata_on_sensor_entity_adds_cross_sensor() {
        let vars: BTreeMap<String, VariableValue> = [(
            "grid".to_string(),
            VariableValue::Entity("sensor.grid_power".into()),
        )]
        .into();
        let deps = extract("metadata(grid, 'last_changed')", vars, &[]).unwrap();
        assert!(deps.contains(&Dependency::new("grid", DependencyKind::Variable)));
        assert!(deps.contains(&Dependency::new("grid_power", DependencyKind::CrossSensor)));
    }

    #[test]
    fn aggregation_selector_dep() {
        let deps = extract("sum('device_class:power !sensor.a')", BTreeMap::new(), &[]).unwrap();
        assert!(deps.contains(&Dependency::new(
            "device_class:power !sensor.a",
            DependencyKind::Collection
        )));
    }

    #[test]
    fn scalar_min_is_not_a_collection() {
        let vars: BTreeMap<String, VariableValue> =
            [("a".to_string(), VariableValue::Int(1)), ("b".to_string(), VariableValue::Int(2))]
                .into();
        let deps = extract("min(a, b)", vars, &[]).unwrap();
        assert!(deps.iter().all(|d| d.kind != DependencyKind::Collection));
    }

    #[test]
    fn computed_variable_recursion() {
        let vars: BTreeMap<String, VariableValue> = [
            (
                "derived".to_string(),
                VariableValue::Computed(ComputedVariable::new("sensor.base * 2")),
            ),
        ]
        .into();
        let deps = extract("derived + 1", vars, &[]).unwrap();
        assert!(deps.contains(&Dependency::new("derived", DependencyKind::Variable)));
        assert!(deps.contains(&Dependency::new("sensor.base", DependencyKind::Entity)));
    }

    #[test]
    fn self_recursive_computed_variable_errors() {
        let vars: BTreeMap<String, VariableValue> = [(
            "loop_var".to_string(),
            VariableValue::Computed(ComputedVariable::new("loop_var + 1")),
        )]
        .into();
        let err = extract("loop_var", vars, &[]).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Circular);
    }

    #[test]
    fn bad_selector_fails_extraction() {
        assert!(extract("sum('state:>=')", BTreeMap::new(), &[]).is_err());
    }
}
