//! Minimal end-to-end demo: two synthetic sensors over an in-memory host.
//!
//! Run with `cargo run --example energy_dashboard -p synsor-eval`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use synsor_eval::test_host::TestHost;
use synsor_eval::{
    AlternateStateHandler, Config, Engine, SensorConfig, Value, VariableValue,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = Arc::new(TestHost::new().with_provider_value("sensor.meter", Value::Number(750.0)));

    let domains: HashSet<String> = ["sensor"].iter().map(|s| s.to_string()).collect();
    let mut engine = Engine::new(Arc::clone(&host), domains)?;

    engine.load_config(
        Config::new()
            .with_sensor(
                SensorConfig::new("grid_power", "power * 1.0")
                    .with_variable("power", VariableValue::Entity("sensor.meter".into()))
                    .with_main_handler(AlternateStateHandler::default().with_unavailable(0i64))
                    .with_attribute("kilowatts", "state / 1000"),
            )
            .with_sensor(SensorConfig::new("double_grid", "grid_power * 2")),
    )?;
    engine.register_backing_entities(
        BTreeSet::from(["sensor.meter".to_string()]),
        BTreeMap::new(),
    );

    engine.evaluate_all()?;
    for (sensor, snapshot) in host.outputs() {
        println!(
            "{sensor}: {} [{}] {:?}",
            snapshot.value, snapshot.state, snapshot.attributes
        );
    }

    // Backing data changes re-evaluate only the affected sensors.
    host.set_provider_value("sensor.meter", Value::Number(1200.0));
    engine.notify_backing_changed(&BTreeSet::from(["sensor.meter".to_string()]))?;
    println!(
        "after change: {}",
        host.last_output("double_grid").unwrap().value
    );

    Ok(())
}
