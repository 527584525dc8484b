mod alternate;
mod boolean_states;
mod error;
mod value;

pub use alternate::{AlternateState, ValueState, classify_error, classify_value};
pub use boolean_states::BooleanStates;
pub use error::{EngineError, EngineErrorExtra, EngineErrorKind};
pub use value::{Value, duration_to_seconds, parse_datetime};
