//! Nested variable paths.
//!
//! A path starts at a global and steps through string keys, integer keys and
//! metatables: `("config", "window", 1)` is `config.window[1]`, and
//! `("obj", Metatable, "__call")` is the `__call` field of `obj`'s metatable.

use luna_engine::State;

use crate::dispatch::AssertSingleSlot;
use crate::error::{BindError, BindResult};
use crate::reader::FromStack;
use crate::writer::Push;

/// Path step into a value's metatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metatable;

/// One step of a variable path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathKey {
    /// String key
    Field(String),
    /// Integer key
    Index(i64),
    /// The metatable of the current value
    Metatable,
}

impl From<&str> for PathKey {
    fn from(name: &str) -> Self {
        PathKey::Field(name.to_string())
    }
}

impl From<String> for PathKey {
    fn from(name: String) -> Self {
        PathKey::Field(name)
    }
}

impl From<i32> for PathKey {
    fn from(index: i32) -> Self {
        PathKey::Index(index.into())
    }
}

impl From<i64> for PathKey {
    fn from(index: i64) -> Self {
        PathKey::Index(index)
    }
}

impl From<Metatable> for PathKey {
    fn from(_: Metatable) -> Self {
        PathKey::Metatable
    }
}

/// Anything usable as a variable path.
pub trait IntoPath {
    /// The steps, first one naming a global.
    fn into_path(self) -> Vec<PathKey>;
}

impl IntoPath for &str {
    fn into_path(self) -> Vec<PathKey> {
        vec![self.into()]
    }
}

impl IntoPath for String {
    fn into_path(self) -> Vec<PathKey> {
        vec![self.into()]
    }
}

impl IntoPath for Vec<PathKey> {
    fn into_path(self) -> Vec<PathKey> {
        self
    }
}

macro_rules! impl_into_path {
    ($($name:ident)+) => {
        impl<$($name: Into<PathKey>),+> IntoPath for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_path(self) -> Vec<PathKey> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

impl_into_path!(A);
impl_into_path!(A B);
impl_into_path!(A B C);
impl_into_path!(A B C D);
impl_into_path!(A B C D E);

fn push_key(state: &State, key: &PathKey) -> BindResult<()> {
    match key {
        PathKey::Field(name) => state.push(name.as_str())?,
        PathKey::Index(index) => state.push(*index as f64)?,
        PathKey::Metatable => {
            return Err(BindError::execution("a metatable step is not a table key"))
        }
    }
    Ok(())
}

/// Replace the value on top with the result of one step. Reading through
/// nil stays nil.
fn step(state: &State, key: &PathKey) -> BindResult<()> {
    if state.is_nil(-1) {
        return Ok(());
    }
    match key {
        PathKey::Metatable => {
            if state.get_metatable(-1)? {
                state.remove(-2);
            } else {
                state.pop(1);
                state.push_nil()?;
            }
        }
        key => {
            push_key(state, key)?;
            state.get_table(-2)?;
            state.remove(-2);
        }
    }
    Ok(())
}

/// Like [`step`], but a missing metatable is created empty.
fn step_creating(state: &State, key: &PathKey) -> BindResult<()> {
    if let PathKey::Metatable = key {
        if !state.get_metatable(-1)? {
            state.new_table()?;
            state.push_value(-1)?;
            state.set_metatable(-3)?;
        }
        state.remove(-2);
        return Ok(());
    }
    if state.is_nil(-1) {
        return Err(BindError::execution(format!(
            "cannot index a nil value with {:?}",
            key
        )));
    }
    step(state, key)
}

/// Push the value at `path`.
fn push_path(state: &State, path: &[PathKey]) -> BindResult<()> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| BindError::execution("empty variable path"))?;
    if *first == PathKey::Metatable {
        return Err(BindError::execution("a variable path must start with a name"));
    }
    state.push_globals()?;
    step(state, first)?;
    for key in rest {
        step(state, key)?;
    }
    Ok(())
}

/// Read the value at `path` as `T`. The stack is left unchanged.
pub(crate) fn read<T: FromStack>(state: &State, path: &[PathKey]) -> BindResult<T> {
    let base = state.top();
    let result = push_path(state, path).and_then(|()| T::read_safe(state, -1));
    state.set_top(base);
    result
}

fn write_at<V: Push>(state: &State, path: &[PathKey], value: V) -> BindResult<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| BindError::execution("empty variable path"))?;
    if parents.is_empty() && *last == PathKey::Metatable {
        return Err(BindError::execution("a variable path must start with a name"));
    }

    state.push_globals()?;
    for key in parents {
        step_creating(state, key)?;
    }

    match last {
        PathKey::Metatable => {
            value.push(state)?;
            state.set_metatable(-2)?;
        }
        key => {
            if state.is_nil(-1) {
                return Err(BindError::execution(format!(
                    "cannot index a nil value with {:?}",
                    key
                )));
            }
            push_key(state, key)?;
            value.push(state)?;
            state.set_table(-3)?;
        }
    }
    Ok(())
}

/// Store `value` at `path`. The stack is left unchanged.
pub(crate) fn write<V: Push>(state: &State, path: &[PathKey], value: V) -> BindResult<()> {
    let () = AssertSingleSlot::<V>::OK;
    let base = state.top();
    let result = write_at(state, path, value);
    state.set_top(base);
    result.map_err(BindError::surfaced)
}

/// Whether the value at `path` exists and is not nil.
pub(crate) fn has_variable(state: &State, path: &[PathKey]) -> bool {
    let base = state.top();
    let found = push_path(state, path).is_ok() && !state.is_nil(-1);
    state.set_top(base);
    found
}
