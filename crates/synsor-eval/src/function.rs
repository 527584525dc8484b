//! The core `Function` trait and its capability flags.

use std::borrow::Cow;

use synsor_common::{EngineError, EngineErrorKind, Value};
use synsor_parse::AstNode;

use crate::interpreter::Interpreter;
use crate::traits::EvaluationEnv;

bitflags::bitflags! {
    /// Properties of a builtin function the engine cares about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FnCaps: u8 {
        /// Same inputs, same output, no side effects. The default.
        const PURE      = 0b0000_0001;
        /// Output can change with identical inputs (`now()`, `today()`).
        /// Results of formulas containing volatile calls are never cached.
        const VOLATILE  = 0b0000_0010;
        /// Reduces a collection of inputs to one value (`sum`, `avg`).
        const REDUCTION = 0b0000_0100;
    }
}

/// Lazily-evaluated function argument: builtins that only need the value
/// call `value()`; builtins that inspect structure (`metadata`, collection
/// selectors) read the AST.
pub struct ArgumentHandle<'a, 'b> {
    node: &'a AstNode,
    interp: &'a Interpreter<'b>,
}

impl<'a, 'b> ArgumentHandle<'a, 'b> {
    pub(crate) fn new(node: &'a AstNode, interp: &'a Interpreter<'b>) -> Self {
        Self { node, interp }
    }

    pub fn value(&self) -> Result<Cow<'a, Value>, EngineError> {
        if let synsor_parse::AstNodeType::Literal(ref v) = self.node.node_type {
            return Ok(Cow::Borrowed(v));
        }
        self.interp.evaluate_ast(self.node).map(Cow::Owned)
    }

    pub fn ast(&self) -> &'a AstNode {
        self.node
    }

    /// Numeric view of the evaluated argument, or a type error naming the
    /// offending value.
    pub fn number(&self) -> Result<f64, EngineError> {
        let v = self.value()?;
        v.as_number().ok_or_else(|| {
            EngineError::new(EngineErrorKind::Value)
                .with_message(format!("expected a number, got '{}'", v.as_ref()))
        })
    }

    pub fn text(&self) -> Result<String, EngineError> {
        match self.value()?.as_ref() {
            Value::Text(s) => Ok(s.clone()),
            other => Err(EngineError::new(EngineErrorKind::Value)
                .with_message(format!("expected a string, got '{other}'"))),
        }
    }
}

/// A callable in the fixed formula library — **object-safe**.
pub trait Function: Send + Sync + 'static {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE
    }

    fn name(&self) -> &'static str;

    fn min_args(&self) -> usize {
        0
    }

    /// Maximum accepted argument count; `None` for variadic functions.
    fn max_args(&self) -> Option<usize> {
        if self.variadic() { None } else { Some(self.min_args()) }
    }

    fn variadic(&self) -> bool {
        false
    }

    fn volatile(&self) -> bool {
        self.caps().contains(FnCaps::VOLATILE)
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError>;

    /// Arity check + evaluation. The single entry point the interpreter
    /// uses.
    fn dispatch<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        if args.len() < self.min_args() {
            return Err(EngineError::new(EngineErrorKind::Value).with_message(format!(
                "{}() takes at least {} argument(s), got {}",
                self.name(),
                self.min_args(),
                args.len()
            )));
        }
        if let Some(max) = self.max_args() {
            if args.len() > max {
                return Err(EngineError::new(EngineErrorKind::Value).with_message(format!(
                    "{}() takes at most {} argument(s), got {}",
                    self.name(),
                    max,
                    args.len()
                )));
            }
        }
        self.eval(args, env)
    }
}
