//! synsor-eval — the synthetic-sensor evaluation engine.
//!
//! Compiles declarative sensor configs into a dependency graph, resolves
//! formula identifiers through a layered chain (context, computed
//! variables, cross-sensor results, backing entities, host state), executes
//! formulas with a fixed function library, and routes alternate states
//! (NONE / UNKNOWN / UNAVAILABLE) to declared handlers.

pub mod alternate;
pub mod builtins;
pub mod classify;
pub mod config;
pub mod context;
pub mod deps;
pub mod engine;
pub mod function;
pub mod function_registry;
pub mod interpreter;
pub mod resolver;
pub mod selector;
pub mod test_host;
pub mod traits;

pub use classify::{Classified, Classifier, STATE_TOKEN};
pub use config::{
    AlternateStateHandler, ComputedVariable, Config, ConfigError, FormulaConfig, GlobalSettings,
    HandlerValue, SensorConfig, VariableValue,
};
pub use context::{EvaluationContext, RefId, RefValueArena, ReferenceValue};
pub use deps::{Dependency, DependencyExtractor, DependencyKind};
pub use engine::{
    DependencyGraph, Engine, EvaluationResult, NodeId, NodeKind, ResultCache, Scheduler,
};
pub use function::{ArgumentHandle, FnCaps, Function};
pub use interpreter::Interpreter;
pub use resolver::{BackingRegistry, ResolveOutcome, ResolverChain};
pub use selector::{CompareOp, Condition, Selector, SelectorKind};
pub use traits::{
    CollectionResolver, DataProvider, EvaluationEnv, HostEnv, HostState, OutputSink,
    ProviderReading, SensorSnapshot, StateLookup,
};

// Re-export the shared value/error surface.
pub use synsor_common::{
    AlternateState, BooleanStates, EngineError, EngineErrorExtra, EngineErrorKind, Value,
    ValueState, classify_error, classify_value,
};
