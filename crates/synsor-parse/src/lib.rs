mod hasher;
pub mod parser;
pub mod pretty;
pub mod tokenizer;

pub use parser::{
    AstNode, AstNodeType, NameIter, NameView, Parser, ParserError, parse,
    parse_with_volatility_classifier,
};
pub use pretty::canonical_formula;
pub use tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};

// Re-export common types
pub use synsor_common::{AlternateState, EngineError, EngineErrorKind, Value, ValueState};
