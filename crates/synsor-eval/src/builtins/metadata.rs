use synsor_common::{EngineError, EngineErrorKind, Value};

use crate::function::{ArgumentHandle, Function};
use crate::traits::EvaluationEnv;

/// `metadata(entity_or_var, "attribute-name")`
///
/// The first argument is inspected structurally, not evaluated: a name node
/// is looked up by its reference so the call reaches the underlying entity's
/// metadata even when the resolved value is numeric. A literal string is
/// accepted as a direct entity id.
#[derive(Debug)]
pub struct MetadataFn;

impl Function for MetadataFn {
    fn name(&self) -> &'static str {
        "metadata"
    }
    fn min_args(&self) -> usize {
        2
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        let key = args[1].text()?;

        if let Some(name) = args[0].ast().as_single_name() {
            return env.metadata(name.original, &key);
        }
        if let synsor_parse::AstNodeType::Literal(Value::Text(entity_id)) =
            &args[0].ast().node_type
        {
            return env.metadata(entity_id, &key);
        }

        Err(EngineError::new(EngineErrorKind::Value)
            .with_message("metadata() expects an entity or variable as its first argument"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::FormulaFixture;

    #[test]
    fn reads_attribute_through_variable_name() {
        let fx = FormulaFixture::new().with_metadata("power", "unit_of_measurement", "W");
        assert_eq!(
            fx.eval("metadata(power, 'unit_of_measurement')"),
            Ok(Value::Text("W".into()))
        );
    }

    #[test]
    fn literal_entity_id_is_accepted() {
        let fx = FormulaFixture::new().with_metadata("sensor.p", "device_class", "power");
        assert_eq!(
            fx.eval("metadata('sensor.p', 'device_class')"),
            Ok(Value::Text("power".into()))
        );
    }

    #[test]
    fn rejects_expression_argument() {
        let fx = FormulaFixture::new();
        assert_eq!(
            fx.eval("metadata(1 + 2, 'unit')").unwrap_err().kind,
            EngineErrorKind::Value
        );
    }
}
