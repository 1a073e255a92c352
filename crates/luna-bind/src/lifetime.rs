//! Host closures owned by the runtime.
//!
//! A closure that captures nothing needing a destructor becomes a plain
//! native function. Anything else is moved into a userdata whose metatable
//! forwards `__call` to it and whose `__gc` drops it, so captured state is
//! released when the runtime is closed at the latest.

use std::any::TypeId;
use std::mem;
use std::rc::Rc;

use luna_engine::{Function, RegistryKey, State, TableRef, Value, VmResult};

use crate::call::{self, HostFn, HostFunction};
use crate::dispatch::{Category, Marshal};
use crate::error::BindResult;
use crate::object::access_error;
use crate::reader::FromArgs;
use crate::writer::Push;

/// Native function dropping the payload of the userdata in slot 1.
pub(crate) fn finalizer() -> Function {
    Function::native(|state| {
        if let Some(ud) = state.to_userdata(1) {
            ud.finalize();
        }
        Ok(0)
    })
}

/// Push `func` as a callable script value.
pub(crate) fn push_closure<F, Args, R>(state: &State, func: F) -> BindResult<usize>
where
    F: HostFunction<Args, R>,
    Args: FromArgs + 'static,
    R: Push + 'static,
{
    if !mem::needs_drop::<F>() {
        state.push_function(move |state| {
            call::invoke(state, 1, |args: Args| Ok(func.apply(args)))
        })?;
        return Ok(1);
    }

    let ud = state.create_userdata(func)?;
    ud.set_metatable(Some(closure_metatable::<F, Args, R>(state)?));
    state.push(Value::UserData(ud))?;
    Ok(1)
}

/// The metatable shared by every pushed closure of type `F`.
fn closure_metatable<F, Args, R>(state: &State) -> VmResult<TableRef>
where
    F: HostFunction<Args, R>,
    Args: FromArgs + 'static,
    R: Push + 'static,
{
    let key = RegistryKey::Meta(TypeId::of::<HostFn<F, Args, R>>());
    if let Value::Table(mt) = state.registry_value(key) {
        return Ok(mt);
    }

    let dispatch = Function::native(|state| {
        let ud = match state.to_userdata(1) {
            Some(ud) if ud.is::<F>() => ud,
            _ => return Err(state.runtime_error("attempt to call a released host function")),
        };
        let func = ud
            .borrow::<F>()
            .map_err(|err| call::raise(state, access_error(err)))?;
        call::invoke(state, 2, |args: Args| Ok(func.apply(args)))
    });

    let mt = state.create_table()?;
    {
        let mut mt = mt.borrow_mut();
        mt.set(Value::from("__call"), Value::Function(dispatch))?;
        mt.set(Value::from("__gc"), Value::Function(finalizer()))?;
        mt.set(Value::from("__name"), Value::from("function"))?;
    }
    state.push(Value::Table(Rc::clone(&mt)))?;
    state.registry_set(key);
    Ok(mt)
}

impl<F, Args, R> Marshal for HostFn<F, Args, R> {
    const CATEGORY: Category = Category::Function;
}

impl<F, Args, R> Push for HostFn<F, Args, R>
where
    F: HostFunction<Args, R>,
    Args: FromArgs + 'static,
    R: Push + 'static,
{
    fn push(self, state: &State) -> BindResult<usize> {
        push_closure(state, self.func)
    }
}
