//! Cycle-scoped result cache (at-most-once evaluation per formula and
//! input fingerprint).

use rustc_hash::FxHashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use synsor_common::Value;

/// Stable digest over the resolved inputs a formula actually consumed:
/// sorted `(name, value repr)` pairs. Two evaluations with the same
/// fingerprint within a cycle are guaranteed to produce the same result —
/// unless the formula is volatile, in which case it must never be cached.
pub fn input_fingerprint(referenced: &mut Vec<(String, &Value)>) -> u64 {
    referenced.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = DefaultHasher::new();
    for (name, value) in referenced {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
        hasher.write_u8(b';');
    }
    hasher.finish()
}

/// Per-cycle cache of numeric formula results keyed on
/// `(formula_id, fingerprint)`.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: FxHashMap<(String, u64), Value>,
    hits: u64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate everything. Called when a cycle opens and on reload.
    pub fn begin_cycle(&mut self) {
        self.entries.clear();
    }

    pub fn check(&mut self, formula_id: &str, fingerprint: u64) -> Option<Value> {
        let value = self
            .entries
            .get(&(formula_id.to_string(), fingerprint))
            .cloned();
        if value.is_some() {
            self.hits += 1;
        }
        value
    }

    /// Store a result. Only numeric results are cacheable; anything else is
    /// silently skipped.
    pub fn store(&mut self, formula_id: &str, fingerprint: u64, value: &Value) {
        if matches!(value, Value::Int(_) | Value::Number(_)) {
            self.entries
                .insert((formula_id.to_string(), fingerprint), value.clone());
        }
    }

    /// Drop every entry belonging to a formula. Used when backing data
    /// behind the formula changes mid-cycle.
    pub fn invalidate_formula(&mut self, formula_id: &str) {
        self.entries.retain(|(id, _), _| id != formula_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cache hits served, for tests asserting at-most-once
    /// evaluation.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_insensitive() {
        let a = Value::Int(1);
        let b = Value::Int(2);
        let mut first = vec![("x".to_string(), &a), ("y".to_string(), &b)];
        let mut second = vec![("y".to_string(), &b), ("x".to_string(), &a)];
        assert_eq!(input_fingerprint(&mut first), input_fingerprint(&mut second));
    }

    #[test]
    fn fingerprint_tracks_values() {
        let a = Value::Int(1);
        let a2 = Value::Int(2);
        let mut first = vec![("x".to_string(), &a)];
        let mut second = vec![("x".to_string(), &a2)];
        assert_ne!(input_fingerprint(&mut first), input_fingerprint(&mut second));
    }

    #[test]
    fn only_numeric_results_are_stored() {
        let mut cache = ResultCache::new();
        cache.store("f", 1, &Value::Int(5));
        cache.store("f", 2, &Value::Text("on".into()));
        cache.store("f", 3, &Value::Boolean(true));
        cache.store("f", 4, &Value::Empty);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.check("f", 1), Some(Value::Int(5)));
        assert_eq!(cache.check("f", 2), None);
    }

    #[test]
    fn begin_cycle_drops_everything() {
        let mut cache = ResultCache::new();
        cache.store("f", 1, &Value::Int(5));
        cache.begin_cycle();
        assert!(cache.is_empty());
    }

    #[test]
    fn formula_invalidation_is_selective() {
        let mut cache = ResultCache::new();
        cache.store("f", 1, &Value::Int(5));
        cache.store("g", 1, &Value::Int(6));
        cache.invalidate_formula("f");
        assert_eq!(cache.check("f", 1), None);
        assert_eq!(cache.check("g", 1), Some(Value::Int(6)));
    }
}
