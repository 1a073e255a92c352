//! Lexer and parser for Luna source code.
//!
//! # Example
//!
//! ```ignore
//! use luna_engine::parser::{Lexer, Parser};
//!
//! let tokens = Lexer::new("local x = 1 + 2").tokenize()?;
//! let block = Parser::new(tokens).parse_chunk()?;
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{BinOp, Block, Expr, FunctionBody, Stat, StatKind, TableField, UnOp};
pub use lexer::{LexError, Lexer};
pub use parser::{ParseError, Parser};
pub use token::{Span, Token};

/// Tokenize and parse a whole chunk.
pub fn parse(source: &str) -> Result<Block, ParseError> {
    let tokens = Lexer::new(source).tokenize().map_err(|mut errors| {
        // Report the first lexical error, the rest are usually cascades
        ParseError::Lex(errors.remove(0))
    })?;
    Parser::new(tokens).parse_chunk()
}
