//! Alternate-state handler selection (C8's decision half).
//!
//! The dispatcher decides *which* declared handler answers a detected
//! alternate state and *how* its value is to be produced; actually running a
//! handler formula is the driver's job, since it reuses the whole
//! resolution/evaluation pipeline.

use std::collections::BTreeMap;

use synsor_common::{AlternateState, Value};

use crate::config::{AlternateStateHandler, HandlerValue, VariableValue};

/// How a selected handler value is to be produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerPlan<'a> {
    /// Use the value as-is; the detected state is preserved on the result.
    Literal(Value),
    /// Evaluate as a formula with the current context plus these variables
    /// in a temporary top layer.
    Formula {
        formula: &'a str,
        variables: Option<&'a BTreeMap<String, VariableValue>>,
    },
}

/// Pick the handler slot for a detected state: the specific slot when it is
/// declared (a declared literal `None` counts), else `fallback`, else
/// nothing.
pub fn select_slot(
    handler: &AlternateStateHandler,
    state: AlternateState,
) -> Option<&HandlerValue> {
    let specific = match state {
        AlternateState::None => handler.none.as_ref(),
        AlternateState::Unknown => handler.unknown.as_ref(),
        AlternateState::Unavailable => handler.unavailable.as_ref(),
    };
    specific.or(handler.fallback.as_ref())
}

/// Resolve a handler value into an execution plan. A bare string stays a
/// literal; a string containing operators is a formula in disguise.
pub fn plan(value: &HandlerValue) -> HandlerPlan<'_> {
    match value {
        HandlerValue::Formula { formula, variables } => HandlerPlan::Formula {
            formula,
            variables: Some(variables),
        },
        HandlerValue::Literal(Value::Text(s)) if contains_operators(s) => HandlerPlan::Formula {
            formula: s,
            variables: None,
        },
        HandlerValue::Literal(v) => HandlerPlan::Literal(v.clone()),
    }
}

/// Whether a string reads as a formula rather than a plain literal.
fn contains_operators(s: &str) -> bool {
    if s.contains(['+', '-', '*', '/', '(', ')', '<', '>', '=']) {
        return true;
    }
    [" and ", " or ", " not ", " if "]
        .iter()
        .any(|op| s.contains(op))
        || s.starts_with("not ")
}
