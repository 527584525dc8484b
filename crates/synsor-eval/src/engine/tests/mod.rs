mod properties;
mod scenarios;

use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::Engine;
use crate::test_host::TestHost;

pub(crate) fn domains() -> HashSet<String> {
    ["sensor", "binary_sensor"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn engine_with(host: &Arc<TestHost>) -> Engine<Arc<TestHost>> {
    Engine::new(Arc::clone(host), domains()).unwrap()
}
