//! The layered resolver chain (identifier → ReferenceValue).
//!
//! Stages run in fixed order; the first stage that can resolve wins:
//!
//! 1. evaluation context
//! 2. computed variable (handed back to the driver, which owns evaluation)
//! 3. cross-sensor reference
//! 4. backing entity via the data provider
//! 5. host state registry
//! 6. attribute access on the resolved base
//! 7. the `state` token
//!
//! A stage either resolves, raises a fatal missing-dependency error, or
//! produces a ReferenceValue whose inner value carries an alternate state —
//! alternates are data here, handled downstream by the dispatcher.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use synsor_common::{
    BooleanStates, EngineError, EngineErrorExtra, EngineErrorKind, Value,
};

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::classify::{Classified, STATE_TOKEN};
use crate::config::{ComputedVariable, SensorConfig, VariableValue};
use crate::context::{EvaluationContext, RefId, RefValueArena, ReferenceValue};
use crate::traits::{DataProvider, SensorSnapshot, StateLookup};

/// Declared backing entities plus the sensor → entity binding.
#[derive(Debug, Clone, Default)]
pub struct BackingRegistry {
    entities: BTreeSet<String>,
    sensor_entities: BTreeMap<String, String>,
}

impl BackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered set. An empty set is the explicit
    /// "host-state-only" mode.
    pub fn register(&mut self, entities: BTreeSet<String>, sensor_entities: BTreeMap<String, String>) {
        self.entities = entities;
        self.sensor_entities = sensor_entities;
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains(entity_id)
    }

    pub fn entity_for_sensor(&self, sensor_id: &str) -> Option<&str> {
        self.sensor_entities.get(sensor_id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// What a resolution attempt produced.
pub enum ResolveOutcome {
    Resolved(RefId),
    /// A computed variable: the driver evaluates its formula (with its own
    /// alternate handling) and binds the result.
    Computed(ComputedVariable),
}

/// One formula's resolution scope. Pure with respect to the engine: all
/// mutation goes through the arena and context passed into `resolve`.
pub struct ResolverChain<'a> {
    pub provider: &'a dyn DataProvider,
    pub states: &'a dyn StateLookup,
    pub backing: &'a BackingRegistry,
    pub boolean_states: &'a BooleanStates,
    /// Merged variable scope of the formula being resolved.
    pub variables: &'a BTreeMap<String, VariableValue>,
    pub sensor: &'a SensorConfig,
    /// Latest published snapshot per sensor, for cross-sensor references.
    pub published: &'a FxHashMap<String, SensorSnapshot>,
    /// sensor unique_id → entity_id for every configured sensor.
    pub sensor_entity_ids: &'a BTreeMap<String, String>,
    pub in_attribute_formula: bool,
}

impl<'a> ResolverChain<'a> {
    /// Resolve one classified identifier. `original` is the name as written
    /// (dotted chains included); the result is bound by the caller.
    pub fn resolve(
        &self,
        original: &str,
        classified: &Classified,
        ctx: &EvaluationContext,
        arena: &mut RefValueArena,
    ) -> Result<ResolveOutcome, EngineError> {
        // Stage 1: the context wins outright.
        if let Some(id) = ctx.get(original) {
            return Ok(ResolveOutcome::Resolved(id));
        }

        match classified {
            Classified::State => self
                .resolve_state_token(ctx, arena)
                .map(ResolveOutcome::Resolved),

            Classified::Variable {
                name,
                attribute_path,
            } => self.resolve_variable(original, name, attribute_path, arena),

            Classified::CrossSensor { sensor_id } => self
                .resolve_cross_sensor(sensor_id, ctx, arena)
                .map(ResolveOutcome::Resolved),

            Classified::Entity {
                entity_id,
                attribute_path,
            } => {
                let base = self.entity_value(entity_id)?;
                let id = if attribute_path.is_empty() {
                    arena.alloc_entity(entity_id, base)
                } else {
                    let resolved = self.apply_attribute_chain(base, attribute_path)?;
                    arena.alloc(resolved)
                };
                Ok(ResolveOutcome::Resolved(id))
            }

            Classified::Reserved(word) => Err(EngineError::new(EngineErrorKind::Eval)
                .with_message(format!("reserved word '{word}' cannot be resolved as a value"))),

            Classified::Unresolved { original } => {
                // Boolean state words evaluate as literals of the configured
                // vocabulary; anything else is a missing dependency.
                if let Some(b) = self.boolean_states.classify(original) {
                    let id = arena.alloc(ReferenceValue::new(
                        original.clone(),
                        Value::Boolean(b),
                    ));
                    return Ok(ResolveOutcome::Resolved(id));
                }
                Err(missing_dependency(original))
            }
        }
    }

    fn resolve_variable(
        &self,
        original: &str,
        name: &str,
        attribute_path: &[String],
        arena: &mut RefValueArena,
    ) -> Result<ResolveOutcome, EngineError> {
        let Some(binding) = self.variables.get(name) else {
            return Err(missing_dependency(original));
        };

        let base_id = match binding {
            VariableValue::Computed(cv) => {
                #[cfg(feature = "tracing")]
                debug!(variable = name, "resolving computed variable");
                return Ok(ResolveOutcome::Computed(cv.clone()));
            }
            VariableValue::Entity(entity_id) => {
                let base = self.entity_value(entity_id)?;
                arena.alloc_entity(entity_id, base)
            }
            literal => {
                let value = literal.as_literal().expect("literal variable variants");
                arena.alloc(ReferenceValue::new(name, value))
            }
        };

        if attribute_path.is_empty() {
            return Ok(ResolveOutcome::Resolved(base_id));
        }
        let resolved = self.apply_attribute_chain(arena.get(base_id).clone(), attribute_path)?;
        Ok(ResolveOutcome::Resolved(arena.alloc(resolved)))
    }

    /// Stage 3: another sensor's most recent result. Self-reference inside
    /// an attribute formula rewrites to the `state` token so the formula
    /// observes the same-cycle main result.
    fn resolve_cross_sensor(
        &self,
        sensor_id: &str,
        ctx: &EvaluationContext,
        arena: &mut RefValueArena,
    ) -> Result<RefId, EngineError> {
        if sensor_id == self.sensor.unique_id && self.in_attribute_formula {
            return self.resolve_state_token(ctx, arena);
        }

        let reference = self
            .sensor_entity_ids
            .get(sensor_id)
            .cloned()
            .unwrap_or_else(|| sensor_id.to_string());

        if let Some(snapshot) = self.published.get(sensor_id) {
            let value = match snapshot.state.alternate() {
                Some(alt) if snapshot.value == Value::Empty => Value::Alt(alt),
                _ => snapshot.value.clone(),
            };
            return Ok(arena.alloc(ReferenceValue::new(reference, value)));
        }

        // Not yet evaluated in this process; the host registry may still
        // have its last published state.
        if let Some(host_state) = self.states.lookup(&reference) {
            let rv = self.wrap_host_state(&reference, host_state);
            return Ok(arena.alloc(rv));
        }

        Err(missing_dependency(sensor_id))
    }

    /// Stages 4 and 5: backing entities go through the data provider and
    /// never fall back to host state; everything else is a host lookup.
    pub fn entity_value(&self, entity_id: &str) -> Result<ReferenceValue, EngineError> {
        read_entity(
            self.provider,
            self.states,
            self.backing,
            self.boolean_states,
            entity_id,
        )
    }

    fn wrap_host_state(
        &self,
        entity_id: &str,
        host_state: crate::traits::HostState,
    ) -> ReferenceValue {
        wrap_host_state(self.boolean_states, entity_id, host_state)
    }

    /// Stage 6: walk an attribute chain over the resolved base, descending
    /// nested maps for deep chains.
    fn apply_attribute_chain(
        &self,
        base: ReferenceValue,
        path: &[String],
    ) -> Result<ReferenceValue, EngineError> {
        let dotted = || format!("{}.{}", base.reference, path.join("."));

        let mut current: &Value = base
            .attributes
            .get(&path[0])
            .ok_or_else(|| missing_dependency(&dotted()))?;

        for segment in &path[1..] {
            let Value::Map(map) = current else {
                return Err(missing_dependency(&dotted()));
            };
            current = map
                .get(segment)
                .ok_or_else(|| missing_dependency(&dotted()))?;
        }

        Ok(ReferenceValue::new(dotted(), current.clone()))
    }

    /// Stage 7: the `state` token, when the driver has not already seeded it
    /// into the context.
    pub fn resolve_state_token(
        &self,
        ctx: &EvaluationContext,
        arena: &mut RefValueArena,
    ) -> Result<RefId, EngineError> {
        if let Some(id) = ctx.get(STATE_TOKEN) {
            return Ok(id);
        }

        // Main formula with a declared backing entity: the current backing
        // value.
        if !self.in_attribute_formula {
            if let Some(backing_entity) = self.backing.entity_for_sensor(&self.sensor.unique_id) {
                let backing_entity = backing_entity.to_string();
                let rv = self.entity_value(&backing_entity)?;
                return Ok(arena.alloc_entity(&backing_entity, rv));
            }
        }

        // Otherwise the sensor's last-published value, if the host has one.
        if let Some(snapshot) = self.published.get(&self.sensor.unique_id) {
            return Ok(arena.alloc(ReferenceValue::new(STATE_TOKEN, snapshot.value.clone())));
        }
        if let Some(entity_id) = &self.sensor.entity_id {
            if let Some(host_state) = self.states.lookup(entity_id) {
                let mut rv = self.wrap_host_state(entity_id, host_state);
                rv.reference = STATE_TOKEN.to_string();
                return Ok(arena.alloc(rv));
            }
        }

        // No backing and nothing published yet: resolved but empty.
        Ok(arena.alloc(ReferenceValue::new(STATE_TOKEN, Value::Empty)))
    }
}

/// Read one entity through the data plane it belongs to: declared backing
/// entities through the provider (no host-state fallback), everything else
/// through the host registry.
pub(crate) fn read_entity(
    provider: &dyn DataProvider,
    states: &dyn StateLookup,
    backing: &BackingRegistry,
    boolean_states: &BooleanStates,
    entity_id: &str,
) -> Result<ReferenceValue, EngineError> {
    if backing.contains(entity_id) {
        let Some(reading) = provider.read(entity_id) else {
            return Err(EngineError::new(EngineErrorKind::BackingEntity)
                .with_message(format!("data provider has no entity '{entity_id}'"))
                .with_extra(EngineErrorExtra::MissingDependencies(vec![
                    entity_id.to_string(),
                ])));
        };
        // A null value from the provider is "resolved but empty";
        // classification happens downstream.
        return Ok(ReferenceValue::new(entity_id, reading.value).with_attributes(reading.attributes));
    }

    let Some(host_state) = states.lookup(entity_id) else {
        return Err(missing_dependency(entity_id));
    };
    Ok(wrap_host_state(boolean_states, entity_id, host_state))
}

/// Convert a raw host state into a ReferenceValue: booleans through the
/// configured vocabulary, numbers where deterministic, text otherwise.
pub(crate) fn wrap_host_state(
    boolean_states: &BooleanStates,
    entity_id: &str,
    host_state: crate::traits::HostState,
) -> ReferenceValue {
    let value = match &host_state.state {
        None => Value::Empty,
        Some(s) => match boolean_states.classify(s) {
            Some(b) => Value::Boolean(b),
            None => Value::from_state_string(s),
        },
    };

    let mut rv =
        ReferenceValue::new(entity_id, value.clone()).with_attributes(host_state.attributes);
    if synsor_common::classify_value(&value).is_ok() {
        rv = rv.with_last_valid(value, host_state.last_changed);
    } else {
        rv.last_valid_changed = host_state.last_changed;
    }
    rv
}

fn missing_dependency(identifier: &str) -> EngineError {
    EngineError::new(EngineErrorKind::MissingDependency)
        .with_message(format!("cannot resolve '{identifier}'"))
        .with_extra(EngineErrorExtra::MissingDependencies(vec![
            identifier.to_string(),
        ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    fn sensor() -> SensorConfig {
        SensorConfig::new("total", "power + 1").with_entity_id("sensor.total")
    }

    fn chain<'a>(
        host: &'a TestHost,
        backing: &'a BackingRegistry,
        variables: &'a BTreeMap<String, VariableValue>,
        sensor: &'a SensorConfig,
        published: &'a FxHashMap<String, SensorSnapshot>,
        sensor_entity_ids: &'a BTreeMap<String, String>,
    ) -> ResolverChain<'a> {
        ResolverChain {
            provider: host,
            states: host,
            backing,
            boolean_states: BooleanStates::defaults(),
            variables,
            sensor,
            published,
            sensor_entity_ids,
            in_attribute_formula: false,
        }
    }

    #[test]
    fn context_stage_wins() {
        let host = TestHost::new();
        let backing = BackingRegistry::new();
        let variables: BTreeMap<String, VariableValue> =
            [("x".to_string(), VariableValue::Int(5))].into();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let mut arena = RefValueArena::new();
        let mut ctx = EvaluationContext::new();
        let seeded = arena.alloc(ReferenceValue::new("x", Value::Int(99)));
        ctx.set("x", seeded);

        let outcome = chain
            .resolve(
                "x",
                &Classified::Variable {
                    name: "x".into(),
                    attribute_path: vec![],
                },
                &ctx,
                &mut arena,
            )
            .unwrap();
        match outcome {
            ResolveOutcome::Resolved(id) => assert_eq!(id, seeded),
            _ => panic!("expected context hit"),
        }
    }

    #[test]
    fn backing_entity_prefers_provider_and_null_is_resolved() {
        let host = TestHost::new().with_provider_value("sensor.p", Value::Empty);
        let mut backing = BackingRegistry::new();
        backing.register(BTreeSet::from(["sensor.p".to_string()]), BTreeMap::new());
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let rv = chain.entity_value("sensor.p").unwrap();
        assert_eq!(rv.reference, "sensor.p");
        assert_eq!(rv.value, Value::Empty);
    }

    #[test]
    fn unregistered_provider_entity_is_fatal() {
        let host = TestHost::new();
        let mut backing = BackingRegistry::new();
        backing.register(BTreeSet::from(["sensor.p".to_string()]), BTreeMap::new());
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let err = chain.entity_value("sensor.p").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::BackingEntity);
        assert_eq!(err.missing_dependencies(), ["sensor.p"]);
    }

    #[test]
    fn host_state_converts_booleans_and_numbers() {
        let host = TestHost::new()
            .with_state("binary_sensor.door", "on")
            .with_state("sensor.temp", "21.5");
        let backing = BackingRegistry::new();
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        assert_eq!(
            chain.entity_value("binary_sensor.door").unwrap().value,
            Value::Boolean(true)
        );
        assert_eq!(
            chain.entity_value("sensor.temp").unwrap().value,
            Value::Number(21.5)
        );
    }

    #[test]
    fn missing_everywhere_is_missing_dependency() {
        let host = TestHost::new();
        let backing = BackingRegistry::new();
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let err = chain.entity_value("sensor.ghost").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::MissingDependency);
        assert_eq!(err.missing_dependencies(), ["sensor.ghost"]);
    }

    #[test]
    fn attribute_chain_traverses_nested_maps() {
        let host = TestHost::new().with_state_and_attributes(
            "sensor.weather",
            "cloudy",
            [(
                "forecast".to_string(),
                Value::Map([("temp".to_string(), Value::Number(18.0))].into()),
            )]
            .into(),
        );
        let backing = BackingRegistry::new();
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let base = chain.entity_value("sensor.weather").unwrap();
        let resolved = chain
            .apply_attribute_chain(base.clone(), &["forecast".into(), "temp".into()])
            .unwrap();
        assert_eq!(resolved.value, Value::Number(18.0));
        assert_eq!(resolved.reference, "sensor.weather.forecast.temp");

        let err = chain
            .apply_attribute_chain(base, &["forecast".into(), "wind".into()])
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::MissingDependency);
    }

    #[test]
    fn state_token_without_backing_or_history_is_empty() {
        let host = TestHost::new();
        let backing = BackingRegistry::new();
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let mut arena = RefValueArena::new();
        let ctx = EvaluationContext::new();
        let id = chain.resolve_state_token(&ctx, &mut arena).unwrap();
        assert_eq!(arena.get(id).value, Value::Empty);
    }

    #[test]
    fn state_token_reads_backing_entity_for_main() {
        let host = TestHost::new().with_provider_value("sensor.meter", Value::Number(750.0));
        let mut backing = BackingRegistry::new();
        backing.register(
            BTreeSet::from(["sensor.meter".to_string()]),
            BTreeMap::from([("total".to_string(), "sensor.meter".to_string())]),
        );
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let mut arena = RefValueArena::new();
        let ctx = EvaluationContext::new();
        let id = chain.resolve_state_token(&ctx, &mut arena).unwrap();
        assert_eq!(arena.get(id).value, Value::Number(750.0));
    }

    #[test]
    fn boolean_words_resolve_as_literals() {
        let host = TestHost::new();
        let backing = BackingRegistry::new();
        let variables = BTreeMap::new();
        let sensor = sensor();
        let published = FxHashMap::default();
        let ids = BTreeMap::new();
        let chain = chain(&host, &backing, &variables, &sensor, &published, &ids);

        let mut arena = RefValueArena::new();
        let ctx = EvaluationContext::new();
        let outcome = chain
            .resolve(
                "on",
                &Classified::Unresolved {
                    original: "on".into(),
                },
                &ctx,
                &mut arena,
            )
            .unwrap();
        match outcome {
            ResolveOutcome::Resolved(id) => {
                assert_eq!(arena.get(id).value, Value::Boolean(true));
            }
            _ => panic!("expected resolution"),
        }
    }
}
