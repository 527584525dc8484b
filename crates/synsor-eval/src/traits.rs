//! synsor-eval – host-facing and evaluator-facing traits (object-safe).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use synsor_common::{EngineError, Value, ValueState};

use crate::function::Function;
use crate::selector::Selector;

/* ─────────────────────────── Host data planes ───────────────────────── */

/// A backing-entity reading from the integration's data provider.
/// `value` is `Value::Empty` when the provider reports "exists, no value".
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReading {
    pub value: Value,
    pub attributes: BTreeMap<String, Value>,
}

impl ProviderReading {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Synchronous callback for entities declared as backed by the integration.
/// Returning `None` means the entity does not exist — a fatal missing
/// dependency, distinct from an existing entity with an empty value.
pub trait DataProvider: Send + Sync {
    fn read(&self, entity_id: &str) -> Option<ProviderReading>;
}

/// An entity state as the host platform tracks it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HostState {
    /// Raw state string; `None` when the host has the entity but no state.
    pub state: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub last_changed: Option<NaiveDateTime>,
}

/// Lookup into the host state registry, used for entities outside the
/// backing set (and for a sensor's own last-published value).
pub trait StateLookup: Send + Sync {
    fn lookup(&self, entity_id: &str) -> Option<HostState>;
}

/// Expands a collection selector to the matching entity ids. Condition
/// filtering and exclusions are applied by the engine; the host only answers
/// the registry-shaped part (device class, area, label, name pattern).
pub trait CollectionResolver: Send + Sync {
    fn select(&self, selector: &Selector) -> Vec<String>;
}

/// A sensor's published result: value, attributes, state.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub value: Value,
    pub state: ValueState,
    pub attributes: BTreeMap<String, Value>,
}

impl SensorSnapshot {
    pub fn new(value: Value, state: ValueState) -> Self {
        Self {
            value,
            state,
            attributes: BTreeMap::new(),
        }
    }
}

/// Per-sensor output channel.
pub trait OutputSink: Send + Sync {
    fn publish(&self, sensor_id: &str, snapshot: &SensorSnapshot);
}

/// Everything the engine needs from its host, as one bound.
pub trait HostEnv: DataProvider + StateLookup + CollectionResolver + OutputSink {}
impl<T> HostEnv for T where T: DataProvider + StateLookup + CollectionResolver + OutputSink {}

/* shared-handle passthroughs, so hosts can keep a handle to the host they
hand the engine */
impl<T: DataProvider + ?Sized> DataProvider for Arc<T> {
    fn read(&self, entity_id: &str) -> Option<ProviderReading> {
        (**self).read(entity_id)
    }
}
impl<T: StateLookup + ?Sized> StateLookup for Arc<T> {
    fn lookup(&self, entity_id: &str) -> Option<HostState> {
        (**self).lookup(entity_id)
    }
}
impl<T: CollectionResolver + ?Sized> CollectionResolver for Arc<T> {
    fn select(&self, selector: &Selector) -> Vec<String> {
        (**self).select(selector)
    }
}
impl<T: OutputSink + ?Sized> OutputSink for Arc<T> {
    fn publish(&self, sensor_id: &str, snapshot: &SensorSnapshot) {
        (**self).publish(sensor_id, snapshot)
    }
}

/* ───────────────────── Evaluator-facing environment ─────────────────── */

/// What a single formula evaluation can see: the extracted name → value
/// view, the function registry, and the host capabilities that builtin
/// functions reach through (collections, metadata, the clock).
pub trait EvaluationEnv {
    /// Look up a referenced name's extracted value.
    fn lookup(&self, name: &str) -> Option<Value>;

    fn function(&self, name: &str) -> Option<Arc<dyn Function>>;

    /// Values of the entities a collection selector names, with condition
    /// filtering and exclusions already applied.
    fn collection_values(&self, selector: &Selector) -> Result<Vec<Value>, EngineError>;

    /// `metadata(entity_or_var, key)` for a name in this formula's scope.
    fn metadata(&self, name: &str, key: &str) -> Result<Value, EngineError>;

    /// Map a state word through the configured truth-state vocabulary
    /// (`on` → true, `not_home` → false).
    fn boolean_state(&self, _state: &str) -> Option<bool> {
        None
    }

    /// Whether alternate states may flow through operators instead of
    /// short-circuiting evaluation up front.
    fn allow_unresolved_states(&self) -> bool {
        false
    }

    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn utc_now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}
