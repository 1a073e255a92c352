//! Host-side handles to script callables.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use luna_engine::{RegistryKey, State, WeakState};

use crate::call::protected_call;
use crate::dispatch::{Category, Marshal};
use crate::error::{BindError, BindResult};
use crate::reader::{wrong_type, FromStack};
use crate::writer::Push;

/// A value pinned in the registry until the last handle to it is dropped.
struct Pinned {
    key: RegistryKey,
    state: WeakState,
}

impl Pinned {
    /// Pop the top value and pin it.
    fn take_top(state: &State) -> Self {
        Self {
            key: state.registry_ref(),
            state: state.downgrade(),
        }
    }

    fn runtime(&self) -> BindResult<State> {
        self.state
            .upgrade()
            .ok_or_else(|| BindError::execution("the runtime has been closed"))
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.registry_unref(self.key);
        }
    }
}

/// A script callable held by the host.
///
/// Reading a function (or any value with `__call`) produces one. The value
/// stays alive while a handle exists, and each [`call`](Self::call) goes back
/// through the protected-call path.
#[derive(Clone)]
pub struct ScriptFunction {
    pin: Rc<Pinned>,
}

impl ScriptFunction {
    /// Call with `args` and read the result as `R`.
    ///
    /// The stack is left as it was, whether the call succeeds or fails.
    pub fn call<A, R>(&self, args: A) -> BindResult<R>
    where
        A: Push,
        R: FromStack,
    {
        let state = self.pin.runtime()?;
        let base = state.top();
        state.registry_get(self.pin.key)?;
        if state.is_nil(-1) {
            state.set_top(base);
            return Err(BindError::execution("the runtime has been closed"));
        }

        let nargs = match args.push(&state) {
            Ok(n) => n,
            Err(err) => {
                state.set_top(base);
                return Err(err.surfaced());
            }
        };
        protected_call(&state, nargs, Some(R::MAX_SLOTS))?;

        let result = R::read_safe(&state, base as i32 + 1);
        state.set_top(base);
        result
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("key", &self.pin.key)
            .finish()
    }
}

impl Marshal for ScriptFunction {
    const CATEGORY: Category = Category::Function;
}

impl Push for ScriptFunction {
    fn push(self, state: &State) -> BindResult<usize> {
        if !self.pin.state.is(state) {
            return Err(BindError::execution(
                "the function belongs to another runtime",
            ));
        }
        state.registry_get(self.pin.key)?;
        Ok(1)
    }
}

impl FromStack for ScriptFunction {
    fn test(state: &State, idx: i32) -> bool {
        state.is_callable(idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        if !state.is_callable(idx) {
            return Err(wrong_type::<Self>(state, idx));
        }
        state.push_value(idx)?;
        Ok(Self {
            pin: Rc::new(Pinned::take_top(state)),
        })
    }
}

/// A [`ScriptFunction`] with a fixed signature.
///
/// ```ignore
/// let add: TypedFunction<(i32, i32), i32> = ctx.read("add")?;
/// assert_eq!(add.call((2, 3))?, 5);
/// ```
pub struct TypedFunction<Args, R> {
    inner: ScriptFunction,
    _signature: PhantomData<fn(Args) -> R>,
}

impl<Args: Push, R: FromStack> TypedFunction<Args, R> {
    /// Call with `args`.
    pub fn call(&self, args: Args) -> BindResult<R> {
        self.inner.call(args)
    }

    /// The untyped handle.
    pub fn into_inner(self) -> ScriptFunction {
        self.inner
    }
}

impl<Args, R> From<ScriptFunction> for TypedFunction<Args, R> {
    fn from(inner: ScriptFunction) -> Self {
        Self {
            inner,
            _signature: PhantomData,
        }
    }
}

impl<Args, R> Clone for TypedFunction<Args, R> {
    fn clone(&self) -> Self {
        Self::from(self.inner.clone())
    }
}

impl<Args, R> fmt::Debug for TypedFunction<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedFunction").field(&self.inner).finish()
    }
}

impl<Args, R> Marshal for TypedFunction<Args, R> {
    const CATEGORY: Category = Category::Function;
}

impl<Args, R> Push for TypedFunction<Args, R> {
    fn push(self, state: &State) -> BindResult<usize> {
        self.inner.push(state)
    }
}

impl<Args, R> FromStack for TypedFunction<Args, R> {
    fn test(state: &State, idx: i32) -> bool {
        ScriptFunction::test(state, idx)
    }

    fn read(state: &State, idx: i32) -> BindResult<Self> {
        ScriptFunction::read(state, idx).map(Self::from)
    }
}
