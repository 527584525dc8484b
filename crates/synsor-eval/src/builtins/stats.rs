use synsor_common::{EngineError, EngineErrorKind, Value};

use crate::function::{ArgumentHandle, FnCaps, Function};
use crate::traits::EvaluationEnv;

use super::{Gathered, gather, numeric_values};

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator).
fn variance_of(values: &[f64]) -> f64 {
    let mean = mean_of(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/* ─────────────────────────── mean() / avg ───────────────────── */

#[derive(Debug)]
pub struct MeanFn;

impl Function for MeanFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "mean"
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
            Ok(values) if values.is_empty() => Err(EngineError::new(EngineErrorKind::Div)
                .with_message("mean() of no values")),
            Ok(values) => Ok(Value::Number(mean_of(&values))),
        }
    }
}

/* ─────────────────────────── std() / var() ──────────────────── */

#[derive(Debug)]
pub struct StdFn;

impl Function for StdFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "std"
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
            Ok(values) if values.len() < 2 => Err(EngineError::new(EngineErrorKind::Div)
                .with_message("std() requires at least two values")),
            Ok(values) => Ok(Value::Number(variance_of(&values).sqrt())),
        }
    }
}

#[derive(Debug)]
pub struct VarFn;

impl Function for VarFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "var"
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
            Ok(values) if values.len() < 2 => Err(EngineError::new(EngineErrorKind::Div)
                .with_message("var() requires at least two values")),
            Ok(values) => Ok(Value::Number(variance_of(&values))),
        }
    }
}

/* ─────────────────────────── count() ────────────────────────── */

#[derive(Debug)]
pub struct CountFn;

impl Function for CountFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "count"
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
        // Count never coerces: it reports how many usable members the
        // selection produced (alternates were dropped during gathering).
        match gather(args, env)? {
            Gathered::Collection(values) => Ok(Value::Int(values.len() as i64)),
            Gathered::Scalars(values) => {
                if let Some(alt) = values.iter().find_map(|v| match v {
                    Value::Alt(a) => Some(*a),
                    _ => None,
                }) {
                    return Ok(Value::Alt(alt));
                }
                Ok(Value::Int(values.len() as i64))
            }
        }
    }
}
