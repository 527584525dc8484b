//! Alternate-state representation and classification.
//!
//! An *alternate state* is a named non-numeric outcome (NONE, UNKNOWN,
//! UNAVAILABLE) that is distinct from evaluation failure. Hosts encode them
//! as the sentinel strings `"STATE_NONE"`, `"unknown"` and `"unavailable"`;
//! inside the engine they travel as [`Value::Alt`] so that ordinary values
//! and alternates share one type.

use std::fmt;

use crate::{EngineError, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The three non-OK states a resolved value or formula result can carry.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AlternateState {
    None,
    Unknown,
    Unavailable,
}

impl AlternateState {
    /// The host-boundary sentinel string for this state.
    pub fn sentinel(&self) -> &'static str {
        match self {
            AlternateState::None => "STATE_NONE",
            AlternateState::Unknown => "unknown",
            AlternateState::Unavailable => "unavailable",
        }
    }

    /// Parse a host sentinel string. Case-sensitive.
    pub fn from_sentinel(s: &str) -> Option<Self> {
        match s {
            "STATE_NONE" => Some(AlternateState::None),
            "unknown" => Some(AlternateState::Unknown),
            "unavailable" => Some(AlternateState::Unavailable),
            _ => None,
        }
    }
}

impl fmt::Display for AlternateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sentinel())
    }
}

/// Total classification of a value: OK or one of the alternates.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum ValueState {
    #[default]
    Ok,
    None,
    Unknown,
    Unavailable,
}

impl ValueState {
    pub fn is_ok(&self) -> bool {
        matches!(self, ValueState::Ok)
    }

    pub fn alternate(&self) -> Option<AlternateState> {
        match self {
            ValueState::Ok => None,
            ValueState::None => Some(AlternateState::None),
            ValueState::Unknown => Some(AlternateState::Unknown),
            ValueState::Unavailable => Some(AlternateState::Unavailable),
        }
    }
}

impl From<AlternateState> for ValueState {
    fn from(alt: AlternateState) -> Self {
        match alt {
            AlternateState::None => ValueState::None,
            AlternateState::Unknown => ValueState::Unknown,
            AlternateState::Unavailable => ValueState::Unavailable,
        }
    }
}

impl fmt::Display for ValueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.alternate() {
            Some(alt) => write!(f, "{alt}"),
            None => f.write_str("ok"),
        }
    }
}

/// Classify a value.
///
/// `Empty` classifies as NONE here: an empty value was explicitly provided
/// (null literal, null config slot, or a host state of null). The one
/// provenance this function cannot see — a backing entity that exists but
/// reports no value, which classifies UNAVAILABLE — is applied by the
/// driver at extraction, where the backing registry is in scope.
pub fn classify_value(value: &Value) -> ValueState {
    match value {
        Value::Alt(alt) => (*alt).into(),
        Value::Empty => ValueState::None,
        Value::Text(s) => match AlternateState::from_sentinel(s) {
            Some(alt) => alt.into(),
            None => ValueState::Ok,
        },
        _ => ValueState::Ok,
    }
}

/// Classify an evaluation failure by its message, mirroring how hosts embed
/// state words in error text: "unavailable" wins over "unknown". Numeric
/// domain errors (division by zero and friends) surface as UNKNOWN; any
/// other unrecognized failure maps to NONE.
pub fn classify_error(err: &EngineError) -> AlternateState {
    let text = err.to_string();
    if text.contains("unavailable") {
        AlternateState::Unavailable
    } else if text.contains("unknown") {
        AlternateState::Unknown
    } else if err.kind == crate::EngineErrorKind::Div {
        AlternateState::Unknown
    } else {
        AlternateState::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineErrorKind;

    #[test]
    fn sentinel_round_trip() {
        for alt in [
            AlternateState::None,
            AlternateState::Unknown,
            AlternateState::Unavailable,
        ] {
            assert_eq!(AlternateState::from_sentinel(alt.sentinel()), Some(alt));
            // Re-wrapping the sentinel as a text value classifies identically.
            let reclassified = classify_value(&Value::Text(alt.sentinel().to_string()));
            assert_eq!(reclassified, ValueState::from(alt));
        }
    }

    #[test]
    fn sentinel_is_case_sensitive() {
        assert_eq!(AlternateState::from_sentinel("Unknown"), None);
        assert_eq!(AlternateState::from_sentinel("UNAVAILABLE"), None);
        assert_eq!(
            classify_value(&Value::Text("Unavailable".into())),
            ValueState::Ok
        );
    }

    #[test]
    fn empty_classifies_as_none() {
        assert_eq!(classify_value(&Value::Empty), ValueState::None);
    }

    #[test]
    fn plain_values_are_ok() {
        assert_eq!(classify_value(&Value::Int(3)), ValueState::Ok);
        assert_eq!(classify_value(&Value::Text("open".into())), ValueState::Ok);
        assert_eq!(classify_value(&Value::Boolean(false)), ValueState::Ok);
    }

    #[test]
    fn error_message_classification() {
        let e = EngineError::new(EngineErrorKind::Eval).with_message("entity is unavailable");
        assert_eq!(classify_error(&e), AlternateState::Unavailable);

        let e = EngineError::new(EngineErrorKind::Eval).with_message("state unknown for sensor.x");
        assert_eq!(classify_error(&e), AlternateState::Unknown);

        let e = EngineError::new(EngineErrorKind::Div).with_message("division by zero");
        assert_eq!(classify_error(&e), AlternateState::Unknown);

        let e = EngineError::new(EngineErrorKind::Eval).with_message("no such attribute");
        assert_eq!(classify_error(&e), AlternateState::None);
    }
}
