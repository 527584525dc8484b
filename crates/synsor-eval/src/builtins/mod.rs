//! The fixed builtin function library.
//!
//! The set is closed by design: formulas cannot define functions, and the
//! evaluator rejects any call that is not registered here (hosts may add
//! extras through the registry, never remove these).

pub mod datetime;
pub mod math;
pub mod metadata;
pub mod stats;

use std::borrow::Cow;
use std::sync::Arc;

use synsor_common::{EngineError, EngineErrorKind, Value};
use synsor_parse::AstNodeType;

use crate::function::{ArgumentHandle, Function};
use crate::selector;
use crate::traits::EvaluationEnv;

/// Every builtin, in registration order.
pub fn all() -> Vec<Arc<dyn Function>> {
    vec![
        // math
        Arc::new(math::AbsFn),
        Arc::new(math::RoundFn),
        Arc::new(math::IntFn),
        Arc::new(math::FloatFn),
        Arc::new(math::SqrtFn),
        Arc::new(math::LogFn),
        Arc::new(math::ExpFn),
        Arc::new(math::PowFn),
        Arc::new(math::SinFn),
        Arc::new(math::CosFn),
        Arc::new(math::LenFn),
        Arc::new(math::MinFn),
        Arc::new(math::MaxFn),
        Arc::new(math::SumFn),
        // aggregates
        Arc::new(stats::MeanFn),
        Arc::new(stats::StdFn),
        Arc::new(stats::VarFn),
        Arc::new(stats::CountFn),
        // temporal
        Arc::new(datetime::NowFn),
        Arc::new(datetime::TodayFn),
        Arc::new(datetime::YesterdayFn),
        Arc::new(datetime::TomorrowFn),
        Arc::new(datetime::UtcTodayFn),
        Arc::new(datetime::UtcYesterdayFn),
        Arc::new(datetime::DateFn),
        Arc::new(datetime::DatetimeFn),
        Arc::new(datetime::SecondsFn),
        Arc::new(datetime::MinutesFn),
        Arc::new(datetime::HoursFn),
        Arc::new(datetime::DaysFn),
        Arc::new(datetime::WeeksFn),
        Arc::new(datetime::TimedeltaFn),
        Arc::new(datetime::MinutesBetweenFn),
        Arc::new(datetime::HoursBetweenFn),
        Arc::new(datetime::DaysBetweenFn),
        Arc::new(datetime::FormatFriendlyFn),
        // metadata
        Arc::new(metadata::MetadataFn),
    ]
}

/// `(alias, canonical)` pairs resolved at registry seed time.
pub fn aliases() -> Vec<(&'static str, &'static str)> {
    vec![("avg", "mean")]
}

/// What a reduction function's arguments turned out to be.
pub(crate) enum Gathered {
    /// Values of a collection selector, alternates already dropped.
    Collection(Vec<Value>),
    /// Plainly evaluated scalar arguments.
    Scalars(Vec<Value>),
}

/// Gather arguments for a reduction function. A single literal-string
/// argument in selector form (`"device_class:power"`) pulls the matching
/// entities' values from the host; anything else evaluates as scalars.
pub(crate) fn gather(
    args: &[ArgumentHandle<'_, '_>],
    env: &dyn EvaluationEnv,
) -> Result<Gathered, EngineError> {
    if args.len() == 1 {
        if let AstNodeType::Literal(Value::Text(raw)) = &args[0].ast().node_type {
            if selector::looks_like_selector(raw) {
                let sel = selector::parse_selector(raw)?;
                let values = env
                    .collection_values(&sel)?
                    .into_iter()
                    .filter(|v| !matches!(v, Value::Alt(_) | Value::Empty))
                    .collect();
                return Ok(Gathered::Collection(values));
            }
        }
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(arg.value().map(Cow::into_owned)?);
    }
    Ok(Gathered::Scalars(values))
}

/// Numeric view over gathered values. In the scalar path an alternate
/// absorbs the whole call; collection values have already been filtered.
pub(crate) fn numeric_values(gathered: Gathered) -> Result<Result<Vec<f64>, Value>, EngineError> {
    let (values, from_collection) = match gathered {
        Gathered::Collection(v) => (v, true),
        Gathered::Scalars(v) => (v, false),
    };

    let mut out = Vec::with_capacity(values.len());
    for v in values {
        if let Value::Alt(alt) = v {
            if from_collection {
                continue;
            }
            return Ok(Err(Value::Alt(alt)));
        }
        match v.as_number() {
            Some(n) => out.push(n),
            None if from_collection => {} // non-numeric states are skipped
            None => {
                return Err(EngineError::new(EngineErrorKind::Value)
                    .with_message(format!("cannot use '{v}' as a number")));
            }
        }
    }
    Ok(Ok(out))
}
