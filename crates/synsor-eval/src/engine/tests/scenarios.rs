//! End-to-end sensor evaluation scenarios.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use synsor_common::{Value, ValueState};

use crate::config::{AlternateStateHandler, Config, ConfigError, SensorConfig, VariableValue};
use crate::engine::EvaluationResult;
use crate::test_host::TestHost;

use super::engine_with;

#[test]
fn pure_arithmetic() {
    let host = Arc::new(TestHost::new());
    let mut engine = engine_with(&host);
    engine
        .load_config(Config::new().with_sensor(
            SensorConfig::new("a", "x + y * 2")
                .with_variable("x", VariableValue::Int(10))
                .with_variable("y", VariableValue::Int(3)),
        ))
        .unwrap();

    let result = engine.evaluate_sensor("a").unwrap();
    assert_eq!(
        result,
        EvaluationResult::Success {
            value: Value::Int(16),
            state: ValueState::Ok,
            unavailable_dependencies: vec![],
        }
    );
    assert_eq!(host.last_output("a").unwrap().value, Value::Int(16));
}

#[test]
fn entity_lookup_through_data_provider() {
    let host = Arc::new(TestHost::new().with_provider_value("sensor.p", Value::Int(750)));
    let mut engine = engine_with(&host);
    engine
        .load_config(Config::new().with_sensor(
            SensorConfig::new("b", "power * 1.0")
                .with_variable("power", VariableValue::Entity("sensor.p".into())),
        ))
        .unwrap();
    engine.register_backing_entities(BTreeSet::from(["sensor.p".to_string()]), BTreeMap::new());

    let result = engine.evaluate_sensor("b").unwrap();
    assert_eq!(result.value(), Some(&Value::Number(750.0)));
    assert_eq!(result.state(), ValueState::Ok);
}

#[test]
fn provider_null_routes_to_unavailable_handler() {
    let host = Arc::new(TestHost::new().with_provider_value("sensor.p", Value::Empty));
    let mut engine = engine_with(&host);
    engine
        .load_config(Config::new().with_sensor(
            SensorConfig::new("c", "power + 1")
                .with_variable("power", VariableValue::Entity("sensor.p".into()))
                .with_main_handler(
                    AlternateStateHandler::default()
                        .with_unavailable(0i64)
                        .with_fallback(-1i64),
                ),
        ))
        .unwrap();
    engine.register_backing_entities(BTreeSet::from(["sensor.p".to_string()]), BTreeMap::new());

    // The specific handler wins over the fallback, the value is present,
    // and the state still reflects the detected alternate.
    let result = engine.evaluate_sensor("c").unwrap();
    match result {
        EvaluationResult::Success {
            value,
            state,
            unavailable_dependencies,
        } => {
            assert_eq!(value, Value::Int(0));
            assert_eq!(state, ValueState::Unavailable);
            assert_eq!(unavailable_dependencies, ["sensor.p"]);
        }
        other => panic!("expected success with handler value, got {other:?}"),
    }
}

#[test]
fn missing_dependency_is_fatal() {
    // sensor.p is neither registered with the provider nor known to the
    // host state registry.
    let host = Arc::new(TestHost::new());
    let mut engine = engine_with(&host);
    engine
        .load_config(Config::new().with_sensor(
            SensorConfig::new("b", "power * 1.0")
                .with_variable("power", VariableValue::Entity("sensor.p".into())),
        ))
        .unwrap();

    let result = engine.evaluate_sensor("b").unwrap();
    match result {
        EvaluationResult::Error {
            state,
            missing_dependencies,
            ..
        } => {
            assert_eq!(state, ValueState::Unavailable);
            assert_eq!(missing_dependencies, ["sensor.p"]);
        }
        other => panic!("expected error result, got {other:?}"),
    }
    assert_eq!(
        host.last_output("b").unwrap().state,
        ValueState::Unavailable
    );
}

#[test]
fn attribute_sees_main_result_in_same_cycle() {
    let host = Arc::new(TestHost::new());
    let mut engine = engine_with(&host);
    engine
        .load_config(Config::new().with_sensor(
            SensorConfig::new("d", "a + b")
                .with_variable("a", VariableValue::Int(5))
                .with_variable("b", VariableValue::Int(7))
                .with_attribute("doubled", "state * 2"),
        ))
        .unwrap();

    let result = engine.evaluate_sensor("d").unwrap();
    assert_eq!(result.value(), Some(&Value::Int(12)));

    let snapshot = host.last_output("d").unwrap();
    assert_eq!(snapshot.attributes.get("doubled"), Some(&Value::Int(24)));
}

#[test]
fn cross_sensor_cycle_fails_reload() {
    let host = Arc::new(TestHost::new());
    let mut engine = engine_with(&host);
    let err = engine
        .load_config(
            Config::new()
                .with_sensor(SensorConfig::new("e", "f + 1"))
                .with_sensor(SensorConfig::new("f", "e + 1")),
        )
        .unwrap_err();

    match err {
        ConfigError::CircularDependency { path } => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"e".to_string()));
            assert!(path.contains(&"f".to_string()));
        }
        other => panic!("expected circular dependency, got {other:?}"),
    }
}
