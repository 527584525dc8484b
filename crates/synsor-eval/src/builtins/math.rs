use synsor_common::{EngineError, EngineErrorKind, Value};

use crate::function::{ArgumentHandle, FnCaps, Function};
use crate::traits::EvaluationEnv;

use super::{gather, numeric_values};

fn domain_error(msg: &str) -> EngineError {
    EngineError::new(EngineErrorKind::Div).with_message(msg.to_string())
}

/* ─────────────────────────── abs() ──────────────────────────── */

#[derive(Debug)]
pub struct AbsFn;

impl Function for AbsFn {
    fn name(&self) -> &'static str {
        "abs"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match args[0].value()?.as_ref() {
            Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
            Value::Alt(alt) => Ok(Value::Alt(*alt)),
            other => {
                let n = other.as_number().ok_or_else(|| {
                    EngineError::new(EngineErrorKind::Value)
                        .with_message(format!("abs() expects a number, got '{other}'"))
                })?;
                Ok(Value::Number(n.abs()))
            }
        }
    }
}

/* ─────────────────────────── round() ────────────────────────── */

#[derive(Debug)]
pub struct RoundFn;

impl Function for RoundFn {
    fn name(&self) -> &'static str {
        "round"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        if let Value::Alt(alt) = args[0].value()?.as_ref() {
            return Ok(Value::Alt(*alt));
        }
        let n = args[0].number()?;
        let digits = match args.get(1) {
            Some(arg) => arg.number()? as i32,
            None => 0,
        };
        let factor = 10f64.powi(digits);
        let rounded = (n * factor).round() / factor;
        if digits <= 0 {
            Ok(Value::Int(rounded as i64))
        } else {
            Ok(Value::Number(rounded))
        }
    }
}

/* ─────────────────────────── int() / float() ────────────────── */

#[derive(Debug)]
pub struct IntFn;

impl Function for IntFn {
    fn name(&self) -> &'static str {
        "int"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match args[0].value()?.as_ref() {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Number(n) => Ok(Value::Int(n.trunc() as i64)),
            Value::Boolean(b) => Ok(Value::Int(if *b { 1 } else { 0 })),
            Value::Text(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                EngineError::new(EngineErrorKind::Value)
                    .with_message(format!("cannot convert '{s}' to int"))
            }),
            Value::Alt(alt) => Ok(Value::Alt(*alt)),
            other => Err(EngineError::new(EngineErrorKind::Value)
                .with_message(format!("cannot convert '{other}' to int"))),
        }
    }
}

#[derive(Debug)]
pub struct FloatFn;

impl Function for FloatFn {
    fn name(&self) -> &'static str {
        "float"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match args[0].value()?.as_ref() {
            Value::Text(s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| {
                EngineError::new(EngineErrorKind::Value)
                    .with_message(format!("cannot convert '{s}' to float"))
            }),
            Value::Alt(alt) => Ok(Value::Alt(*alt)),
            other => other.as_number().map(Value::Number).ok_or_else(|| {
                EngineError::new(EngineErrorKind::Value)
                    .with_message(format!("cannot convert '{other}' to float"))
            }),
        }
    }
}

/* ─────────────────────────── sqrt/log/exp/pow/sin/cos ───────── */

#[derive(Debug)]
pub struct SqrtFn;

impl Function for SqrtFn {
    fn name(&self) -> &'static str {
        "sqrt"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        let n = args[0].number()?;
        if n < 0.0 {
            return Err(domain_error("sqrt() of a negative number"));
        }
        Ok(Value::Number(n.sqrt()))
    }
}

#[derive(Debug)]
pub struct LogFn;

impl Function for LogFn {
    fn name(&self) -> &'static str {
        "log"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        let n = args[0].number()?;
        if n <= 0.0 {
            return Err(domain_error("log() of a non-positive number"));
        }
        let result = match args.get(1) {
            Some(base_arg) => {
                let base = base_arg.number()?;
                if base <= 0.0 || base == 1.0 {
                    return Err(domain_error("log() base must be positive and not 1"));
                }
                n.log(base)
            }
            None => n.ln(),
        };
        Ok(Value::Number(result))
    }
}

#[derive(Debug)]
pub struct ExpFn;

impl Function for ExpFn {
    fn name(&self) -> &'static str {
        "exp"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Number(args[0].number()?.exp()))
    }
}

#[derive(Debug)]
pub struct PowFn;

impl Function for PowFn {
    fn name(&self) -> &'static str {
        "pow"
    }
    fn min_args(&self) -> usize {
        2
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        let base = args[0].number()?;
        let exponent = args[1].number()?;
        let result = base.powf(exponent);
        if result.is_nan() || result.is_infinite() {
            return Err(domain_error("pow() result out of range"));
        }
        Ok(Value::Number(result))
    }
}

#[derive(Debug)]
pub struct SinFn;

impl Function for SinFn {
    fn name(&self) -> &'static str {
        "sin"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Number(args[0].number()?.sin()))
    }
}

#[derive(Debug)]
pub struct CosFn;

impl Function for CosFn {
    fn name(&self) -> &'static str {
        "cos"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Number(args[0].number()?.cos()))
    }
}

/* ─────────────────────────── len() ──────────────────────────── */

#[derive(Debug)]
pub struct LenFn;

impl Function for LenFn {
    fn name(&self) -> &'static str {
        "len"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match args[0].value()?.as_ref() {
            Value::Text(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Map(m) => Ok(Value::Int(m.len() as i64)),
            Value::Alt(alt) => Ok(Value::Alt(*alt)),
            other => Err(EngineError::new(EngineErrorKind::Value)
                .with_message(format!("len() is not defined for '{other}'"))),
        }
    }
}

/* ─────────────────────────── min/max/sum ────────────────────── */

#[derive(Debug)]
pub struct MinFn;

impl Function for MinFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "min"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match numeric_values(gather(args, env)?)? {
            Err(alt) => Ok(alt),
            Ok(values) => values
                .into_iter()
                .min_by(|a, b| a.total_cmp(b))
                .map(Value::Number)
                .ok_or_else(|| domain_error("min() of no values")),
        }
    }
}

#[derive(Debug)]
pub struct MaxFn;

impl Function for MaxFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "max"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match numeric_values(gather(args, env)?)? {
            Err(alt) => Ok(alt),
            Ok(values) => values
                .into_iter()
                .max_by(|a, b| a.total_cmp(b))
                .map(Value::Number)
                .ok_or_else(|| domain_error("max() of no values")),
        }
    }
}

#[derive(Debug)]
pub struct SumFn;

impl Function for SumFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "sum"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match numeric_values(gather(args, env)?)? {
            Err(alt) => Ok(alt),
            Ok(values) => Ok(Value::Number(values.into_iter().sum())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::FormulaFixture;
    use synsor_common::AlternateState;

    #[test]
    fn abs_keeps_ints_integral() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("abs(-3)"), Ok(Value::Int(3)));
        assert_eq!(fx.eval("abs(-3.5)"), Ok(Value::Number(3.5)));
    }

    #[test]
    fn round_with_digits() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("round(3.567)"), Ok(Value::Int(4)));
        assert_eq!(fx.eval("round(3.567, 2)"), Ok(Value::Number(3.57)));
    }

    #[test]
    fn conversions() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("int(3.9)"), Ok(Value::Int(3)));
        assert_eq!(fx.eval("int('42')"), Ok(Value::Int(42)));
        assert_eq!(fx.eval("float(3)"), Ok(Value::Number(3.0)));
        assert!(fx.eval("int('forty')").is_err());
    }

    #[test]
    fn domain_errors() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("sqrt(-1)").unwrap_err().kind, EngineErrorKind::Div);
        assert_eq!(fx.eval("log(0)").unwrap_err().kind, EngineErrorKind::Div);
    }

    #[test]
    fn variadic_reductions() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("sum(1, 2, 3)"), Ok(Value::Number(6.0)));
        assert_eq!(fx.eval("min(5, 2, 9)"), Ok(Value::Number(2.0)));
        assert_eq!(fx.eval("max(5, 2, 9)"), Ok(Value::Number(9.0)));
    }

    #[test]
    fn sum_over_collection_selector() {
        let fx = FormulaFixture::new()
            .with_collection_entity("sensor.a", Value::Int(10))
            .with_collection_entity("sensor.b", Value::Number(2.5))
            .with_collection_entity("sensor.c", Value::Alt(AlternateState::Unavailable));
        // The unavailable member is skipped, not poisonous.
        assert_eq!(fx.eval("sum('device_class:power')"), Ok(Value::Number(12.5)));
    }

    #[test]
    fn len_of_text() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("len('heat')"), Ok(Value::Int(4)));
        assert!(fx.eval("len(5)").is_err());
    }
}
