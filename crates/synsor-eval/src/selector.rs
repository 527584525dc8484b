//! Collection selector parsing.
//!
//! Aggregation functions accept a selector string that names a set of
//! entities: `sum("device_class:power")`. Selector grammar:
//!
//! ```text
//! selector   ::= kind ":" body exclusion*
//! kind       ::= "device_class" | "area" | "label" | "regex"
//!              | "attribute" | "state"
//! exclusion  ::= " !" entity_id
//! ```
//!
//! `state:` and `attribute:` bodies may carry a comparison (`state:>= 50`,
//! `state:!off`, `attribute:battery_level < 20`); a bare value means
//! equality. This is one of the two places where regular expressions are the
//! right tool (the other being `regex:` selectors themselves); compiled
//! patterns are cached process-wide.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use synsor_common::{EngineError, EngineErrorKind, Value};

/// Process-wide compiled-regex cache, shared by selector parsing and
/// `regex:` matching.
static PATTERN_CACHE: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);

/// Compile a pattern through the shared cache.
pub fn cached_regex(pattern: &str) -> Result<Regex, EngineError> {
    if let Some(re) = PATTERN_CACHE.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern).map_err(|e| {
        EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("invalid regex '{pattern}': {e}"))
    })?;
    PATTERN_CACHE.insert(pattern.to_string(), re.clone());
    Ok(re)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    DeviceClass,
    Area,
    Label,
    Regex,
    Attribute,
    State,
}

impl SelectorKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "device_class" => Some(Self::DeviceClass),
            "area" => Some(Self::Area),
            "label" => Some(Self::Label),
            "regex" => Some(Self::Regex),
            "attribute" => Some(Self::Attribute),
            "state" => Some(Self::State),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

/// A comparison attached to a `state:` or `attribute:` selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub op: CompareOp,
    pub expected: Value,
}

/// A parsed collection selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub kind: SelectorKind,
    /// Device class, area, label, pattern, or attribute name.
    pub value: String,
    pub condition: Option<Condition>,
    pub exclusions: Vec<String>,
}

/// Whether a function argument string looks like a selector at all.
pub fn looks_like_selector(raw: &str) -> bool {
    raw.split_once(':')
        .is_some_and(|(kind, _)| SelectorKind::parse(kind.trim()).is_some())
}

/// Parse a selector string. Errors are validation failures (fatal at
/// compile when the selector is a literal in config).
pub fn parse_selector(raw: &str) -> Result<Selector, EngineError> {
    let invalid = |msg: String| EngineError::new(EngineErrorKind::Validation).with_message(msg);

    // Peel trailing exclusions: " !sensor.a !sensor.b"
    let mut pieces = raw.split(" !");
    let body = pieces.next().unwrap_or_default().trim();
    let exclusions: Vec<String> = pieces
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let (kind_str, rest) = body
        .split_once(':')
        .ok_or_else(|| invalid(format!("selector '{raw}' is missing ':'")))?;
    let kind = SelectorKind::parse(kind_str.trim())
        .ok_or_else(|| invalid(format!("unknown selector kind '{}'", kind_str.trim())))?;
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(invalid(format!("selector '{raw}' has an empty body")));
    }

    let (value, condition) = match kind {
        SelectorKind::State => (String::new(), Some(parse_state_condition(rest)?)),
        SelectorKind::Attribute => parse_attribute_body(rest)?,
        _ => (rest.to_string(), None),
    };

    if kind == SelectorKind::Regex {
        // Fail bad patterns at parse time, and warm the cache.
        cached_regex(&value)?;
    }

    Ok(Selector {
        kind,
        value,
        condition,
        exclusions,
    })
}

/// Parse a state condition body: `>= 50`, `!off`, `== on`, or a bare value
/// (which means equality).
fn parse_state_condition(body: &str) -> Result<Condition, EngineError> {
    let invalid = |msg: String| EngineError::new(EngineErrorKind::Validation).with_message(msg);
    let body = body.trim();

    // Operators without a value are always malformed.
    let op_only = cached_regex(r"^(<=|>=|==|!=|<|>)\s*$")?;
    if op_only.is_match(body) {
        return Err(invalid(format!(
            "state condition '{body}' is an operator without a value"
        )));
    }

    // Negation shorthand `!value` (but not the `!=` operator).
    let negation = cached_regex(r"^!(?P<value>[^=].*)$")?;
    if let Some(caps) = negation.captures(body) {
        let value = caps.name("value").unwrap().as_str().trim();
        if value.is_empty() {
            return Err(invalid("negation '!' requires a value".to_string()));
        }
        return Ok(Condition {
            op: CompareOp::Ne,
            expected: convert_condition_value(value),
        });
    }

    let with_op = cached_regex(r"^(?P<op><=|>=|==|!=|<|>)\s*(?P<value>.+)$")?;
    if let Some(caps) = with_op.captures(body) {
        let op = CompareOp::parse(caps.name("op").unwrap().as_str()).unwrap();
        let value = caps.name("value").unwrap().as_str().trim();
        return Ok(Condition {
            op,
            expected: convert_condition_value(value),
        });
    }

    // Bare value means equality.
    Ok(Condition {
        op: CompareOp::Eq,
        expected: convert_condition_value(body),
    })
}

/// Parse an attribute selector body: `name`, or `name op value`.
fn parse_attribute_body(body: &str) -> Result<(String, Option<Condition>), EngineError> {
    let re = cached_regex(r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*(?:(?P<op><=|>=|==|!=|<|>)\s*(?P<value>.+))?$")?;
    let caps = re.captures(body.trim()).ok_or_else(|| {
        EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("invalid attribute selector '{body}'"))
    })?;

    let name = caps.name("name").unwrap().as_str().to_string();
    let condition = match (caps.name("op"), caps.name("value")) {
        (Some(op), Some(value)) => Some(Condition {
            op: CompareOp::parse(op.as_str()).unwrap(),
            expected: convert_condition_value(value.as_str().trim()),
        }),
        _ => None,
    };
    Ok((name, condition))
}

/// Convert a condition value string into a typed value. Quotes force text.
fn convert_condition_value(raw: &str) -> Value {
    let raw = raw.trim();
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        return Value::Text(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" | "True" => return Value::Boolean(true),
        "false" | "False" => return Value::Boolean(false),
        _ => {}
    }
    Value::from_state_string(raw)
}

impl Condition {
    /// Evaluate the condition against an observed value. Numeric comparison
    /// where both sides have a numeric view, text comparison otherwise;
    /// ordered text comparison is always false (mirrors how hosts treat
    /// incomparable states in collection filters).
    pub fn matches(&self, actual: &Value) -> bool {
        if let (Some(a), Some(e)) = (actual.as_number(), self.expected.as_number()) {
            return match self.op {
                CompareOp::Eq => a == e,
                CompareOp::Ne => a != e,
                CompareOp::Lt => a < e,
                CompareOp::Le => a <= e,
                CompareOp::Gt => a > e,
                CompareOp::Ge => a >= e,
            };
        }

        let a = actual.to_string();
        let e = self.expected.to_string();
        match self.op {
            CompareOp::Eq => a == e,
            CompareOp::Ne => a != e,
            _ => false,
        }
    }
}

impl Selector {
    /// Canonical string form, used as the dependency identifier for
    /// COLLECTION deps.
    pub fn canonical(&self) -> String {
        let kind = match self.kind {
            SelectorKind::DeviceClass => "device_class",
            SelectorKind::Area => "area",
            SelectorKind::Label => "label",
            SelectorKind::Regex => "regex",
            SelectorKind::Attribute => "attribute",
            SelectorKind::State => "state",
        };
        let mut out = format!("{kind}:");
        if !self.value.is_empty() {
            out.push_str(&self.value);
        }
        if let Some(cond) = &self.condition {
            if self.kind != SelectorKind::State {
                out.push(' ');
            }
            let op = match cond.op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
            };
            out.push_str(op);
            out.push(' ');
            out.push_str(&cond.expected.to_string());
        }
        for excl in &self.exclusions {
            out.push_str(" !");
            out.push_str(excl);
        }
        out
    }
}
