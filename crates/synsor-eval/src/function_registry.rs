use crate::function::Function;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

// Case-insensitive registry keyed by lowercase name, seeded with the
// builtin library.
static REG: Lazy<DashMap<String, Arc<dyn Function>>> = Lazy::new(|| {
    let reg: DashMap<String, Arc<dyn Function>> = DashMap::new();
    for f in crate::builtins::all() {
        reg.insert(norm(f.name()), f);
    }
    for (alias, target) in crate::builtins::aliases() {
        if let Some(f) = reg.get(&norm(target)).map(|e| Arc::clone(e.value())) {
            reg.insert(norm(alias), f);
        }
    }
    reg
});

#[inline]
fn norm<S: AsRef<str>>(s: S) -> String {
    s.as_ref().to_lowercase()
}

/// Register an additional function (hosts may extend the library; the
/// builtin set itself is fixed).
pub fn register_function(f: Arc<dyn Function>) {
    let key = norm(f.name());
    REG.insert(key, f);
}

pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    REG.get(&norm(name)).map(|v| Arc::clone(v.value()))
}

/// Names of every registered function. Used by the identifier classifier to
/// reserve the function vocabulary.
pub fn is_registered(name: &str) -> bool {
    REG.contains_key(&norm(name))
}
