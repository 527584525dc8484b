//! In-memory host and evaluation fixtures for tests.
//!
//! `TestHost` plays the whole host side — data provider, state registry,
//! collection registry, output sink — with interior mutability so tests can
//! mutate the world between cycles. `FormulaFixture` is the smaller tool:
//! it evaluates a single formula against a prepared name → value view,
//! bypassing the engine driver entirely.

use std::collections::BTreeMap;
use std::sync::Mutex;

use rustc_hash::FxHashMap;
use synsor_common::{BooleanStates, EngineError, Value, classify_value};
use synsor_parse::parse;

use crate::interpreter::Interpreter;
use crate::selector::{Selector, SelectorKind, cached_regex};
use crate::traits::{
    CollectionResolver, DataProvider, EvaluationEnv, HostState, OutputSink, ProviderReading,
    SensorSnapshot, StateLookup,
};

/* ───────────────────────────── TestHost ─────────────────────────────── */

#[derive(Default)]
pub struct TestHost {
    provider: Mutex<FxHashMap<String, ProviderReading>>,
    states: Mutex<FxHashMap<String, HostState>>,
    collection_members: Mutex<Vec<String>>,
    outputs: Mutex<Vec<(String, SensorSnapshot)>>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_value<V: Into<Value>>(self, entity_id: &str, value: V) -> Self {
        self.set_provider_value(entity_id, value.into());
        self
    }

    pub fn with_state(self, entity_id: &str, state: &str) -> Self {
        self.set_state(entity_id, state);
        self
    }

    pub fn with_state_and_attributes(
        self,
        entity_id: &str,
        state: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        self.states.lock().unwrap().insert(
            entity_id.to_string(),
            HostState {
                state: Some(state.to_string()),
                attributes,
                last_changed: None,
            },
        );
        self
    }

    /// Register an entity the collection resolver will return for any
    /// registry-shaped selector, alongside its host state.
    pub fn with_collection_member(self, entity_id: &str, state: &str) -> Self {
        self.collection_members
            .lock()
            .unwrap()
            .push(entity_id.to_string());
        self.set_state(entity_id, state);
        self
    }

    pub fn set_provider_value(&self, entity_id: &str, value: Value) {
        self.provider
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), ProviderReading::new(value));
    }

    pub fn set_provider_reading(&self, entity_id: &str, reading: ProviderReading) {
        self.provider
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), reading);
    }

    pub fn remove_provider_entity(&self, entity_id: &str) {
        self.provider.lock().unwrap().remove(entity_id);
    }

    pub fn set_state(&self, entity_id: &str, state: &str) {
        self.states.lock().unwrap().insert(
            entity_id.to_string(),
            HostState {
                state: Some(state.to_string()),
                attributes: BTreeMap::new(),
                last_changed: None,
            },
        );
    }

    pub fn outputs(&self) -> Vec<(String, SensorSnapshot)> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn last_output(&self, sensor_id: &str) -> Option<SensorSnapshot> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == sensor_id)
            .map(|(_, snapshot)| snapshot.clone())
    }

    pub fn clear_outputs(&self) {
        self.outputs.lock().unwrap().clear();
    }
}

impl DataProvider for TestHost {
    fn read(&self, entity_id: &str) -> Option<ProviderReading> {
        self.provider.lock().unwrap().get(entity_id).cloned()
    }
}

impl StateLookup for TestHost {
    fn lookup(&self, entity_id: &str) -> Option<HostState> {
        self.states.lock().unwrap().get(entity_id).cloned()
    }
}

impl CollectionResolver for TestHost {
    fn select(&self, _selector: &Selector) -> Vec<String> {
        self.collection_members.lock().unwrap().clone()
    }
}

impl OutputSink for TestHost {
    fn publish(&self, sensor_id: &str, snapshot: &SensorSnapshot) {
        self.outputs
            .lock()
            .unwrap()
            .push((sensor_id.to_string(), snapshot.clone()));
    }
}

/* ─────────────────────────── FormulaFixture ─────────────────────────── */

/// A bare evaluation environment for exercising the interpreter and the
/// builtin library without a driver.
pub struct FormulaFixture {
    values: FxHashMap<String, Value>,
    metadata: FxHashMap<(String, String), Value>,
    collection: Vec<(String, Value)>,
    allow_unresolved: bool,
}

impl Default for FormulaFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl FormulaFixture {
    pub fn new() -> Self {
        Self {
            values: FxHashMap::default(),
            metadata: FxHashMap::default(),
            collection: Vec::new(),
            allow_unresolved: false,
        }
    }

    pub fn with_value<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with_collection_entity<V: Into<Value>>(mut self, entity_id: &str, value: V) -> Self {
        self.collection.push((entity_id.to_string(), value.into()));
        self
    }

    pub fn with_metadata<V: Into<Value>>(mut self, name: &str, key: &str, value: V) -> Self {
        self.metadata
            .insert((name.to_string(), key.to_string()), value.into());
        self
    }

    pub fn allowing_unresolved(mut self) -> Self {
        self.allow_unresolved = true;
        self
    }

    pub fn eval(&self, formula: &str) -> Result<Value, EngineError> {
        let ast = parse(formula).map_err(|e| {
            synsor_common::EngineError::new(synsor_common::EngineErrorKind::Syntax)
                .with_message(e.to_string())
        })?;
        Interpreter::new(self).evaluate_ast(&ast)
    }
}

impl EvaluationEnv for FormulaFixture {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn function(&self, name: &str) -> Option<std::sync::Arc<dyn crate::function::Function>> {
        crate::function_registry::get(name)
    }

    fn collection_values(&self, selector: &Selector) -> Result<Vec<Value>, EngineError> {
        let mut out = Vec::new();
        for (entity_id, value) in &self.collection {
            if selector.exclusions.iter().any(|e| e == entity_id) {
                continue;
            }
            if selector.kind == SelectorKind::Regex
                && !cached_regex(&selector.value)?.is_match(entity_id)
            {
                continue;
            }
            if let Some(condition) = &selector.condition {
                if !condition.matches(value) {
                    continue;
                }
            }
            // Sentinel states become alternates before aggregation sees
            // them.
            let normalized = match classify_value(value).alternate() {
                Some(alt) => Value::Alt(alt),
                None => value.clone(),
            };
            out.push(normalized);
        }
        Ok(out)
    }

    fn metadata(&self, name: &str, key: &str) -> Result<Value, EngineError> {
        self.metadata
            .get(&(name.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                synsor_common::EngineError::new(synsor_common::EngineErrorKind::MissingDependency)
                    .with_message(format!("no metadata '{key}' for '{name}'"))
            })
    }

    fn boolean_state(&self, state: &str) -> Option<bool> {
        BooleanStates::defaults().classify(state)
    }

    fn allow_unresolved_states(&self) -> bool {
        self.allow_unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synsor_common::AlternateState;

    #[test]
    fn fixture_evaluates_with_values() {
        let fx = FormulaFixture::new()
            .with_value("x", 10i64)
            .with_value("y", 3i64);
        assert_eq!(fx.eval("x + y * 2"), Ok(Value::Int(16)));
    }

    #[test]
    fn alternates_absorb_operators() {
        let fx = FormulaFixture::new()
            .allowing_unresolved()
            .with_value("a", Value::Alt(AlternateState::Unknown))
            .with_value("b", 5i64);
        assert_eq!(fx.eval("a + b"), Ok(Value::Alt(AlternateState::Unknown)));
        assert_eq!(fx.eval("b < a"), Ok(Value::Alt(AlternateState::Unknown)));
        assert_eq!(fx.eval("not a"), Ok(Value::Alt(AlternateState::Unknown)));
    }

    #[test]
    fn boolean_vocabulary_comparisons() {
        let fx = FormulaFixture::new().with_value("door", Value::Boolean(true));
        assert_eq!(fx.eval("door == on"), Ok(Value::Boolean(true)));
        assert_eq!(fx.eval("door == off"), Ok(Value::Boolean(false)));
    }

    #[test]
    fn string_concatenation_is_rejected() {
        let fx = FormulaFixture::new();
        assert!(fx.eval("'a' + 'b'").is_err());
        assert_eq!(fx.eval("'a' == 'a'"), Ok(Value::Boolean(true)));
    }

    #[test]
    fn conditionals_are_lazy() {
        // The untaken branch would divide by zero if evaluated.
        let fx = FormulaFixture::new().with_value("x", 4i64);
        assert_eq!(fx.eval("x if x > 0 else 1 / 0"), Ok(Value::Int(4)));
    }
}
