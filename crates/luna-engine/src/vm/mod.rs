//! Luna runtime
//!
//! This module provides the runtime the host binding layer drives:
//! - Dynamically-typed values ([`Value`]) with reference-counted tables,
//!   functions, and userdata
//! - A slot stack addressed by frame-relative or top-relative indices
//! - Protected calls, chunk loading, and an identity-keyed registry
//! - A tree-walking evaluator for parsed chunks

#![warn(missing_docs)]

mod builtins;
mod function;
mod interpreter;
mod memory;
mod state;
mod table;
mod userdata;
mod value;

pub use function::{Closure, Function, NativeFunction};
pub use state::{State, WeakState};
pub use table::{Table, TableRef};
pub use userdata::{AccessError, UserData};
pub use value::{format_number, parse_number, Type, Value};

use std::any::TypeId;

/// Runtime errors
///
/// Returned through `Err` wherever the runtime would unwind. `State::pcall`
/// converts them into a [`Status`] plus an error value on the stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// Error raised by the runtime itself, already prefixed with its location
    #[error("{0}")]
    Runtime(String),

    /// Error value raised by `error()` or by a native function
    #[error("{}", .0.error_message())]
    Raised(Value),

    /// Chunk failed to compile
    #[error("{0}")]
    Syntax(String),

    /// Stack slot or call depth limit exceeded
    #[error("stack overflow")]
    StackOverflow,

    /// Memory limit exceeded
    #[error("not enough memory")]
    OutOfMemory,
}

/// Result type for runtime operations
pub type VmResult<T> = Result<T, VmError>;

/// Outcome of a protected call or a chunk load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Completed normally
    Ok,
    /// Runtime error; the error value is on top of the stack
    Runtime,
    /// Syntax error; the message is on top of the stack
    Syntax,
    /// Memory limit hit; a message is on top of the stack
    Memory,
}

/// Key into the runtime registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    /// Per-host-type registration table
    Type(TypeId),
    /// Per-host-type extra metamethods
    Meta(TypeId),
    /// Pinned value handed out by [`State::registry_ref`]
    Ref(u64),
}
