//! Luna bind - typed marshaling between Rust and Luna scripts.
//!
//! This crate sits between host code and the [`luna_engine`] runtime:
//! - [`Marshal`] classifies host types into categories with fixed stack-slot
//!   ranges
//! - [`Push`] and [`FromStack`] write host values to the stack and read them
//!   back, with exact type checks
//! - Host objects ([`UserData`]) are bound in five reference shapes, each
//!   with its own registration table of methods and members
//! - Host closures become script functions; errors and panics raised by
//!   them travel through the runtime and come back as [`BindError`]s
//! - [`Context`] ties it together for host applications
//!
//! # Example
//!
//! ```ignore
//! use luna_bind::{Context, UserData};
//!
//! #[derive(Clone, UserData)]
//! struct Object {
//!     value: i32,
//! }
//!
//! let ctx = Context::new();
//! ctx.register_function("increment", |o: &mut Object| o.value += 1)?;
//! ctx.write("obj", Object { value: 10 })?;
//! ctx.execute("obj:increment()")?;
//! assert_eq!(ctx.read::<Object>("obj")?.value, 11);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod call;
mod config;
mod context;
mod dispatch;
mod error;
mod handle;
mod lifetime;
mod object;
mod path;
mod reader;
mod registry;
mod sum;
mod writer;

pub use call::{protected_call, ByMut, ByRef, HostFn, HostFunction, Method, CALLBACK_ERROR};
pub use config::ContextConfig;
pub use context::Context;
pub use dispatch::{Category, EmptyArray, Marshal, Nil, Pairs};
pub use error::{BindError, BindResult, HostError, Panicked};
pub use handle::{ScriptFunction, TypedFunction};
pub use object::{ObjectRef, Shape, Unique, UserData};
pub use path::{IntoPath, Metatable, PathKey};
pub use reader::{FromArgs, FromStack};
pub use sum::{OneOf2, OneOf3, OneOf4, OneOf5};
pub use writer::Push;

pub use luna_derive::{ScriptEnum, UserData};
pub use luna_engine::{RuntimeConfig, State, Value};

#[doc(hidden)]
pub mod __private {
    pub use crate::reader::wrong_type;
}
