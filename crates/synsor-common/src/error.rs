//! Engine error representation shared by the parser and evaluator.
//!
//! - **`EngineErrorKind`** : the canonical set of failure categories
//! - **`EngineErrorExtra`**: per-kind "extension slot" (cycle paths,
//!   missing-dependency lists)
//! - **`EngineError`**     : one struct that glues them together
//!
//! When a future error needs its own payload, add another variant to
//! `EngineErrorExtra`; existing code does not break.

use std::{error::Error, fmt};

/// All recognised failure categories.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// Formula text rejected by the parser.
    Syntax,
    /// Dependency graph contains a cycle.
    Circular,
    /// An identifier could not be resolved by any stage of the chain.
    MissingDependency,
    /// The data provider reported `exists = false` for a declared backing
    /// entity.
    BackingEntity,
    /// Config-level validation failed at compile (bad ids, unknown names in
    /// computed variables).
    Validation,
    /// Division by zero or another numeric domain error.
    Div,
    /// Type error: operands that the operator is not defined for.
    Value,
    /// Unknown function or unresolvable name at evaluation time.
    Name,
    /// Any other evaluation failure.
    Eval,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syntax => "syntax error",
            Self::Circular => "circular dependency",
            Self::MissingDependency => "missing dependency",
            Self::BackingEntity => "backing entity error",
            Self::Validation => "validation error",
            Self::Div => "division error",
            Self::Value => "type error",
            Self::Name => "name error",
            Self::Eval => "evaluation error",
        })
    }
}

/// Kind-specific payloads ("extension slot").
///
/// Only variants that need extra data get it; the rest stay at `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum EngineErrorExtra {
    /// No additional payload (the vast majority of errors).
    #[default]
    None,

    /// `Circular` – the offending node path, first node repeated at the end.
    CyclePath(Vec<String>),

    /// `MissingDependency` / `BackingEntity` – the identifiers that could
    /// not be resolved.
    MissingDependencies(Vec<String>),
}

/// The single error struct the engine passes around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: Option<String>,
    pub extra: EngineErrorExtra,
}

impl From<EngineErrorKind> for EngineError {
    fn from(kind: EngineErrorKind) -> Self {
        Self {
            kind,
            message: None,
            extra: EngineErrorExtra::None,
        }
    }
}

impl EngineError {
    /// Basic constructor (no message, no extra).
    pub fn new(kind: EngineErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attach kind-specific extra data.
    pub fn with_extra(mut self, extra: EngineErrorExtra) -> Self {
        self.extra = extra;
        self
    }

    /// The unresolved identifiers carried by this error, if any.
    pub fn missing_dependencies(&self) -> &[String] {
        match &self.extra {
            EngineErrorExtra::MissingDependencies(deps) => deps,
            _ => &[],
        }
    }

    /// The cycle path carried by this error, if any.
    pub fn cycle_path(&self) -> &[String] {
        match &self.extra {
            EngineErrorExtra::CyclePath(path) => path,
            _ => &[],
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }

        // Keep payload rendering terse for logs.
        match &self.extra {
            EngineErrorExtra::None => {}
            EngineErrorExtra::CyclePath(path) => {
                write!(f, " [{}]", path.join(" -> "))?;
            }
            EngineErrorExtra::MissingDependencies(deps) => {
                write!(f, " [missing: {}]", deps.join(", "))?;
            }
        }

        Ok(())
    }
}

impl Error for EngineError {}

impl From<EngineError> for String {
    fn from(error: EngineError) -> Self {
        format!("{error}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cycle_path() {
        let e = EngineError::new(EngineErrorKind::Circular).with_extra(EngineErrorExtra::CyclePath(
            vec!["e".into(), "f".into(), "e".into()],
        ));
        assert_eq!(e.to_string(), "circular dependency [e -> f -> e]");
        assert_eq!(e.cycle_path(), ["e", "f", "e"]);
    }

    #[test]
    fn missing_dependencies_accessor() {
        let e = EngineError::new(EngineErrorKind::MissingDependency)
            .with_message("sensor.p not found")
            .with_extra(EngineErrorExtra::MissingDependencies(vec![
                "sensor.p".into(),
            ]));
        assert_eq!(e.missing_dependencies(), ["sensor.p"]);
        assert!(e.cycle_path().is_empty());
    }
}
