//! Reference values, their per-cycle arena, and the layered evaluation
//! context.
//!
//! Every resolved identifier becomes a [`ReferenceValue`] — origin reference
//! plus inner value — allocated in an arena and addressed by [`RefId`].
//! Contexts map names to `RefId`s, never to raw values: the only setter
//! takes a `RefId`, so the "ReferenceValue-only" invariant holds by
//! construction instead of by runtime checks at every call site.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use synsor_common::Value;

/// Arena index of a [`ReferenceValue`] within the current cycle.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefId(u32);

impl RefId {
    fn new(id: u32) -> Self {
        Self(id)
    }

    fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// The canonical in-memory representation of a resolved identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceValue {
    /// Entity id or symbolic origin (`sensor.p`, a sensor unique_id,
    /// `state`, `literal:x`).
    pub reference: String,
    /// Inner value. `Value::Empty` is a legitimate "resolved but empty"
    /// state — NOT a missing dependency.
    pub value: Value,
    /// Most recent non-alternate observation, when the host tracks one.
    pub last_valid_state: Option<Value>,
    pub last_valid_changed: Option<NaiveDateTime>,
    /// Attribute payload of the underlying entity, for attribute chains and
    /// `metadata()`.
    pub attributes: BTreeMap<String, Value>,
}

impl ReferenceValue {
    pub fn new<R: Into<String>>(reference: R, value: Value) -> Self {
        Self {
            reference: reference.into(),
            value,
            last_valid_state: None,
            last_valid_changed: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_last_valid(mut self, state: Value, changed: Option<NaiveDateTime>) -> Self {
        self.last_valid_state = Some(state);
        self.last_valid_changed = changed;
        self
    }
}

/// Per-cycle arena of reference values with entity deduplication.
///
/// Repeated references to one entity within a cycle share a slot, so every
/// formula in the cycle observes the same snapshot. The arena is cleared
/// between cycles; the dedup map alone is dropped when the host reports an
/// entity changed mid-stream.
#[derive(Debug, Default)]
pub struct RefValueArena {
    slots: Vec<ReferenceValue>,
    by_entity: FxHashMap<String, RefId>,
}

impl RefValueArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot without deduplication (literals, computed results).
    pub fn alloc(&mut self, value: ReferenceValue) -> RefId {
        let id = RefId::new(self.slots.len() as u32);
        self.slots.push(value);
        id
    }

    /// Allocate or reuse the canonical slot for an entity.
    pub fn alloc_entity(&mut self, entity_id: &str, value: ReferenceValue) -> RefId {
        if let Some(&existing) = self.by_entity.get(entity_id) {
            return existing;
        }
        let id = self.alloc(value);
        self.by_entity.insert(entity_id.to_string(), id);
        id
    }

    pub fn lookup_entity(&self, entity_id: &str) -> Option<RefId> {
        self.by_entity.get(entity_id).copied()
    }

    pub fn get(&self, id: RefId) -> &ReferenceValue {
        &self.slots[id.as_index()]
    }

    pub fn get_mut(&mut self, id: RefId) -> &mut ReferenceValue {
        &mut self.slots[id.as_index()]
    }

    /// Drop dedup entries for changed entities; their slots stay valid for
    /// ids already handed out this cycle.
    pub fn invalidate_entities<'a, I: IntoIterator<Item = &'a str>>(&mut self, entity_ids: I) {
        for id in entity_ids {
            self.by_entity.remove(id);
        }
    }

    /// End-of-cycle reset.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_entity.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Hierarchical name → `RefId` mapping. Layers, bottom to top: globals,
/// sensor scope, formula scope, attribute scope. Reads walk top to bottom;
/// writes go to the current top layer.
#[derive(Debug)]
pub struct EvaluationContext {
    layers: Vec<FxHashMap<String, RefId>>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self {
            layers: vec![FxHashMap::default()],
        }
    }

    pub fn push_layer(&mut self) {
        self.layers.push(FxHashMap::default());
    }

    pub fn pop_layer(&mut self) {
        if self.layers.len() > 1 {
            self.layers.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Bind a name in the top layer. Taking `RefId` (not `Value`) is the
    /// whole point: raw scalars cannot enter a context.
    pub fn set<N: Into<String>>(&mut self, name: N, id: RefId) {
        self.layers
            .last_mut()
            .expect("context always has a base layer")
            .insert(name.into(), id);
    }

    pub fn get(&self, name: &str) -> Option<RefId> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(name).copied())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All visible bindings, shadowing applied. Used to snapshot the single
    /// flat view a formula evaluation reads from.
    pub fn flatten(&self) -> FxHashMap<String, RefId> {
        let mut flat = FxHashMap::default();
        for layer in &self.layers {
            for (name, &id) in layer {
                flat.insert(name.clone(), id);
            }
        }
        flat
    }

    /// Number of visible bindings (shadowed names counted once).
    pub fn binding_count(&self) -> usize {
        self.flatten().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_dedup_shares_slots() {
        let mut arena = RefValueArena::new();
        let a = arena.alloc_entity("sensor.p", ReferenceValue::new("sensor.p", Value::Int(1)));
        let b = arena.alloc_entity(
            "sensor.p",
            ReferenceValue::new("sensor.p", Value::Int(999)), // ignored; first wins
        );
        assert_eq!(a, b);
        assert_eq!(arena.get(b).value, Value::Int(1));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn invalidation_forces_fresh_slot() {
        let mut arena = RefValueArena::new();
        let a = arena.alloc_entity("sensor.p", ReferenceValue::new("sensor.p", Value::Int(1)));
        arena.invalidate_entities(["sensor.p"]);
        let b = arena.alloc_entity("sensor.p", ReferenceValue::new("sensor.p", Value::Int(2)));
        assert_ne!(a, b);
        // The old id still resolves for anything that captured it.
        assert_eq!(arena.get(a).value, Value::Int(1));
        assert_eq!(arena.get(b).value, Value::Int(2));
    }

    #[test]
    fn reads_walk_layers_top_down() {
        let mut arena = RefValueArena::new();
        let low = arena.alloc(ReferenceValue::new("literal:x", Value::Int(1)));
        let high = arena.alloc(ReferenceValue::new("literal:x", Value::Int(2)));

        let mut ctx = EvaluationContext::new();
        ctx.set("x", low);
        ctx.push_layer();
        ctx.set("x", high);
        assert_eq!(ctx.get("x"), Some(high));

        ctx.pop_layer();
        assert_eq!(ctx.get("x"), Some(low));
    }

    #[test]
    fn base_layer_cannot_be_popped() {
        let mut ctx = EvaluationContext::new();
        ctx.pop_layer();
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn flatten_applies_shadowing() {
        let mut arena = RefValueArena::new();
        let a = arena.alloc(ReferenceValue::new("a", Value::Int(1)));
        let b = arena.alloc(ReferenceValue::new("b", Value::Int(2)));
        let b2 = arena.alloc(ReferenceValue::new("b", Value::Int(3)));

        let mut ctx = EvaluationContext::new();
        ctx.set("a", a);
        ctx.set("b", b);
        ctx.push_layer();
        ctx.set("b", b2);

        let flat = ctx.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["b"], b2);
        assert_eq!(flat["a"], a);
    }
}
