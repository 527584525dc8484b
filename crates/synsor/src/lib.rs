//! Meta crate that re-exports the synsor building blocks with sensible
//! defaults. Downstream users can depend on this crate and opt into
//! specific layers via feature flags while keeping access to the underlying
//! crates when deeper integration is required.

#[cfg(feature = "common")]
pub use synsor_common as common;

#[cfg(feature = "parse")]
pub use synsor_parse as parse;

#[cfg(feature = "eval")]
pub use synsor_eval as eval;

#[cfg(feature = "common")]
pub use synsor_common::{AlternateState, EngineError, EngineErrorKind, Value, ValueState};

#[cfg(feature = "eval")]
pub use synsor_eval::{
    Config, Engine, EvaluationResult, SensorConfig, SensorSnapshot, VariableValue,
};
