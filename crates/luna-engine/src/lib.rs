//! Luna engine - Lexer, parser, and stack-based runtime for the Luna script language.
//!
//! Luna scripts use a small Lua 5.1 dialect. The engine is organized as:
//!
//! - [`parser`]: logos-based lexer and recursive-descent parser producing an AST
//! - [`vm`]: value model, tables, userdata, the tree-walking evaluator, and the
//!   [`State`] stack API that host bindings build on
//! - [`config`]: runtime limits
//!
//! # Example
//!
//! ```ignore
//! use luna_engine::{State, Status};
//!
//! let state = State::new();
//! state.open_libs()?;
//! assert_eq!(state.load("return 1 + 2", "chunk"), Status::Ok);
//! state.call(0, Some(1))?;
//! assert_eq!(state.to_number(-1), Some(3.0));
//! ```

#![warn(rust_2018_idioms)]

pub mod config;
pub mod parser;
pub mod vm;

pub use config::RuntimeConfig;
pub use vm::{
    AccessError, Function, RegistryKey, State, Status, Table, TableRef, Type, UserData, Value,
    VmError, VmResult, WeakState,
};
