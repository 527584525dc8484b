use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use crate::AlternateState;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An **evaluator** value. This is distinct from the raw states a host hands
/// us (which are always strings or null); the resolver chain converts those
/// into `Value`s before any formula sees them.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(chrono::NaiveDate),         // For date() results
    DateTime(chrono::NaiveDateTime), // For now()/datetime() results
    // Durations serialize as whole milliseconds; chrono leaves TimeDelta out
    // of its serde surface.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    Duration(chrono::Duration),      // For minutes()/hours()/timedelta() results
    Map(BTreeMap<String, Value>),    // Nested attribute payloads
    Empty,                           // Resolved-but-null; distinct from missing
    Alt(AlternateState),             // NONE / UNKNOWN / UNAVAILABLE as a value
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Int(i) => i.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::Duration(d) => d.hash(state),
            Value::Map(m) => {
                state.write_usize(m.len());
                for (k, v) in m {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Value::Empty => state.write_u8(0),
            Value::Alt(a) => a.hash(state),
        }
    }
}

impl Eq for Value {}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Duration(d) => write!(f, "{}s", duration_to_seconds(d)),
            Value::Map(m) => write!(f, "{m:?}"),
            Value::Empty => write!(f, ""),
            Value::Alt(a) => write!(f, "{a}"),
        }
    }
}

/// Convert a duration to fractional seconds.
pub fn duration_to_seconds(d: &chrono::Duration) -> f64 {
    d.num_milliseconds() as f64 / 1_000.0
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<chrono::Duration, D::Error> {
        Ok(chrono::Duration::milliseconds(i64::deserialize(d)?))
    }
}

/// Parse an ISO-8601 date or datetime string the way the host renders them.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()))
}

impl Value {
    /// Numeric view of the value, where one deterministically exists.
    ///
    /// Durations read as seconds so that `hours(1) / 60` works; booleans as
    /// 0/1. Dates and datetimes have no numeric view (date arithmetic goes
    /// through the builtin diff helpers instead).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Duration(d) => Some(duration_to_seconds(d)),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Number(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Date(_) => true,
            Value::DateTime(_) => true,
            Value::Duration(d) => !d.is_zero(),
            Value::Map(m) => !m.is_empty(),
            Value::Empty => false,
            Value::Alt(_) => false,
        }
    }

    /// Coerce a host-supplied state string into a typed value.
    ///
    /// Numbers parse to `Int`/`Number`; everything else survives as text.
    /// Boolean-looking states are the evaluator's job (the truth-state set
    /// is configurable), so they are *not* collapsed here.
    pub fn from_state_string(s: &str) -> Value {
        let trimmed = s.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Value::Number(n);
        }
        Value::Text(s.to_string())
    }

    /// Apply the boundary coercions on a finished formula result: durations
    /// become fractional seconds, dates and datetimes become ISO-8601 text.
    pub fn into_boundary(self) -> Value {
        match self {
            Value::Duration(d) => Value::Number(duration_to_seconds(&d)),
            Value::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Value::Text(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            other => other,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
