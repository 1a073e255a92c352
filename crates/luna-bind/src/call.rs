//! The function-call protocol.
//!
//! Script to host: [`invoke`] checks the argument count against the callee's
//! arity, decodes the arguments, runs the host code inside `catch_unwind`,
//! and pushes the results. Any host failure (an `Err` result or a panic) is
//! wrapped in a [`TransportedError`] userdata and raised as the script error,
//! because host errors cannot unwind through the runtime.
//!
//! Host to script: [`protected_call`] runs a callable under `pcall` and turns
//! the failure status back into a [`BindError`], recovering a transported
//! host error as the cause of an execution error.

use std::any::TypeId;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use luna_engine::{
    Function, RegistryKey, State, Status, UserData as RawUserData, Value, VmError, VmResult,
};

use crate::error::{BindError, BindResult, HostError};
use crate::object::{access_error, Shape, UserData};
use crate::reader::FromArgs;
use crate::writer::Push;

/// Message of an execution error caused by a transported host error.
pub const CALLBACK_ERROR: &str = "Exception thrown by a callback function called by the script";

/// A host error travelling through the runtime as a script error value.
pub(crate) struct TransportedError(Option<HostError>);

/// Run a host call on the arguments at slots `first..=top`.
pub(crate) fn invoke<Args, R>(
    state: &State,
    first: i32,
    call: impl FnOnce(Args) -> BindResult<R>,
) -> VmResult<usize>
where
    Args: FromArgs,
    R: Push,
{
    let provided = (state.top() + 1).saturating_sub(first as usize);
    if provided < Args::MIN {
        return Err(state.runtime_error(format!(
            "This function requires at least {} parameter(s)",
            Args::MIN
        )));
    }
    if provided > Args::MAX {
        return Err(state.runtime_error(format!(
            "This function requires at most {} parameter(s)",
            Args::MAX
        )));
    }

    let args = Args::read_args(state, first, provided).map_err(|(position, err)| match err {
        BindError::WrongType { observed, target } => state.runtime_error(format!(
            "Unable to convert parameter #{} from {} to {}",
            position, observed, target
        )),
        other => raise(state, other),
    })?;

    let value = match catch_unwind(AssertUnwindSafe(move || call(args))) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => return Err(raise(state, err)),
        Err(payload) => return Err(transport(state, HostError::from_panic(payload))),
    };

    let base = state.top();
    value.push(state).map_err(|err| {
        state.set_top(base);
        raise(state, err)
    })
}

/// Convert a binding failure inside a host call into a runtime error.
pub(crate) fn raise(state: &State, err: BindError) -> VmError {
    match err {
        BindError::Host(host) => transport(state, host),
        BindError::Execution {
            cause: Some(host), ..
        } => transport(state, host),
        BindError::Execution { message, .. } => state.runtime_error(message),
        BindError::Allocation => VmError::OutOfMemory,
        other => state.runtime_error(other),
    }
}

/// Wrap a host error into a script error value.
pub(crate) fn transport(state: &State, host: HostError) -> VmError {
    tracing::debug!(error = %host, "transporting host error");
    let ud = match state.create_userdata(TransportedError(Some(host))) {
        Ok(ud) => ud,
        Err(err) => return err,
    };
    match transport_metatable(state) {
        Ok(mt) => ud.set_metatable(Some(mt)),
        Err(err) => return err,
    }
    VmError::Raised(Value::UserData(ud))
}

fn transport_metatable(state: &State) -> VmResult<luna_engine::TableRef> {
    let key = RegistryKey::Meta(TypeId::of::<TransportedError>());
    if let Value::Table(mt) = state.registry_value(key) {
        return Ok(mt);
    }

    let mt = state.create_table()?;
    let tostring = Function::native(|state| {
        let message = state
            .to_userdata(1)
            .and_then(|ud| transported_message(&ud))
            .unwrap_or_else(|| CALLBACK_ERROR.to_string());
        state.push(message)?;
        Ok(1)
    });
    mt.borrow_mut()
        .set(Value::from("__tostring"), Value::Function(tostring))?;
    mt.borrow_mut()
        .set(Value::from("__name"), Value::from("TransportedError"))?;
    state.push(Value::Table(mt.clone()))?;
    state.registry_set(key);
    Ok(mt)
}

fn transported_message(ud: &RawUserData) -> Option<String> {
    let err = ud.borrow::<TransportedError>().ok()?;
    err.0.as_ref().map(|host| host.to_string())
}

/// Turn the error value on top of the stack into a [`BindError`].
pub(crate) fn error_from_stack(state: &State, status: Status) -> BindError {
    match status {
        Status::Memory => BindError::Allocation,
        Status::Syntax => BindError::Syntax(
            state
                .to_string(-1)
                .map(|s| s.to_string())
                .unwrap_or_default(),
        ),
        Status::Ok | Status::Runtime => match state.value(-1) {
            Value::String(message) => BindError::execution(message.to_string()),
            Value::Number(_) => BindError::execution(
                state.to_string(-1).map(|s| s.to_string()).unwrap_or_default(),
            ),
            Value::UserData(ud) if ud.is::<TransportedError>() => {
                let cause = ud
                    .borrow_mut::<TransportedError>()
                    .ok()
                    .and_then(|mut err| err.0.take());
                let message = match &cause {
                    Some(host) => format!("{}: {}", CALLBACK_ERROR, host),
                    None => CALLBACK_ERROR.to_string(),
                };
                BindError::Execution { message, cause }
            }
            other => BindError::execution(format!(
                "error object is a {} value",
                other.type_name()
            )),
        },
    }
}

/// Call the callable below `nargs` arguments under protection.
///
/// On success its results (`nresults` of them if given) replace it and its
/// arguments. On failure those slots are consumed and nothing is left.
pub fn protected_call(state: &State, nargs: usize, nresults: Option<usize>) -> BindResult<()> {
    match state.pcall(nargs, nresults) {
        Status::Ok => Ok(()),
        status => {
            let err = error_from_stack(state, status);
            state.pop(1);
            Err(err)
        }
    }
}

/// A host callable exposed to scripts.
///
/// Implemented for every `Fn(A1, ..., An) -> R` (up to eight arguments)
/// whose arguments implement [`FromStack`](crate::FromStack) and whose result implements
/// [`Push`]. A result of `()` returns nothing to the script, a tuple returns
/// one value per element.
pub trait HostFunction<Args, R>: 'static {
    /// Call with decoded arguments.
    fn apply(&self, args: Args) -> R;
}

/// Marker for methods taking the object by shared reference.
pub enum ByRef {}

/// Marker for methods taking the object by exclusive reference.
pub enum ByMut {}

/// A method of the object type `T`: a callable whose first parameter is
/// `&T` (marker [`ByRef`]) or `&mut T` (marker [`ByMut`]).
pub trait Method<T, Args, R, K>: 'static {
    /// Whether the method needs `&mut T`
    const MUTABLE: bool;

    /// Call on the payload of `ud`, which holds a shape `S` of `T`.
    fn invoke_on<S: Shape<Target = T>>(&self, ud: &RawUserData, args: Args) -> BindResult<R>;
}

macro_rules! impl_callables {
    ($($arg:ident)*) => {
        impl<F, R, $($arg,)*> HostFunction<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> R + 'static,
        {
            #[allow(non_snake_case)]
            fn apply(&self, ($($arg,)*): ($($arg,)*)) -> R {
                self($($arg),*)
            }
        }

        impl<T, F, R, $($arg,)*> Method<T, ($($arg,)*), R, ByRef> for F
        where
            T: UserData,
            F: Fn(&T $(, $arg)*) -> R + 'static,
        {
            const MUTABLE: bool = false;

            #[allow(non_snake_case)]
            fn invoke_on<S: Shape<Target = T>>(
                &self,
                ud: &RawUserData,
                ($($arg,)*): ($($arg,)*),
            ) -> BindResult<R> {
                let payload = ud.borrow::<S>().map_err(access_error)?;
                S::access(&payload, |target| self(target $(, $arg)*))
            }
        }

        impl<T, F, R, $($arg,)*> Method<T, ($($arg,)*), R, ByMut> for F
        where
            T: UserData,
            F: Fn(&mut T $(, $arg)*) -> R + 'static,
        {
            const MUTABLE: bool = true;

            #[allow(non_snake_case)]
            fn invoke_on<S: Shape<Target = T>>(
                &self,
                ud: &RawUserData,
                ($($arg,)*): ($($arg,)*),
            ) -> BindResult<R> {
                let mut payload = ud.borrow_mut::<S>().map_err(access_error)?;
                S::access_mut(&mut payload, |target| self(target $(, $arg)*))
            }
        }
    };
}

impl_callables!();
impl_callables!(A1);
impl_callables!(A1 A2);
impl_callables!(A1 A2 A3);
impl_callables!(A1 A2 A3 A4);
impl_callables!(A1 A2 A3 A4 A5);
impl_callables!(A1 A2 A3 A4 A5 A6);
impl_callables!(A1 A2 A3 A4 A5 A6 A7);
impl_callables!(A1 A2 A3 A4 A5 A6 A7 A8);

/// Runtime function calling `method` on shape `S` passed as the first
/// argument.
pub(crate) fn method_function<S, M, Args, R, K>(method: Rc<M>) -> Function
where
    S: Shape,
    M: Method<S::Target, Args, R, K>,
    Args: FromArgs + 'static,
    R: Push + 'static,
    K: 'static,
{
    Function::native(move |state| {
        let ud = match state.to_userdata(1) {
            Some(ud) if ud.is::<S>() => ud,
            _ => {
                return Err(state.runtime_error(format!(
                    "bad self argument: expected {}, got {}",
                    <S::Target as UserData>::type_name(),
                    state.type_name(1)
                )))
            }
        };
        invoke(state, 2, |args: Args| M::invoke_on::<S>(&method, &ud, args))
    })
}

/// A host closure written as a script function.
///
/// ```ignore
/// ctx.write("add", HostFn::new(|a: i32, b: i32| a + b))?;
/// ```
pub struct HostFn<F, Args, R> {
    pub(crate) func: F,
    _signature: PhantomData<fn(Args) -> R>,
}

impl<F, Args, R> HostFn<F, Args, R>
where
    F: HostFunction<Args, R>,
{
    /// Wrap a closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _signature: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_function_arities() {
        let nothing = || 7;
        assert_eq!(HostFunction::<(), i32>::apply(&nothing, ()), 7);

        let add = |a: i32, b: i32| a + b;
        assert_eq!(HostFunction::apply(&add, (2, 3)), 5);
    }

    #[test]
    fn test_arity_errors() {
        let state = State::new();
        state
            .push_function(|state| invoke(state, 1, |(a, b): (i32, Option<i32>)| Ok(a + b.unwrap_or(0))))
            .unwrap();
        assert_eq!(state.pcall(0, None), Status::Runtime);
        assert_eq!(
            state.to_string(-1).as_deref(),
            Some("This function requires at least 1 parameter(s)")
        );
        state.pop(1);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_conversion_error_names_parameter() {
        let state = State::new();
        state
            .push_function(|state| invoke(state, 1, |(a,): (i32,)| Ok(a)))
            .unwrap();
        state.push("nope").unwrap();
        assert_eq!(state.pcall(1, None), Status::Runtime);
        let message = state.to_string(-1).unwrap();
        assert!(message.starts_with("Unable to convert parameter #1 from string to i32"));
    }

    #[test]
    fn test_panics_are_transported() {
        let state = State::new();
        state
            .push_function(|state| {
                invoke(state, 1, |(): ()| -> BindResult<()> { panic!("host blew up") })
            })
            .unwrap();
        let err = protected_call(&state, 0, None).unwrap_err();
        match err {
            BindError::Execution {
                cause: Some(host), ..
            } => assert_eq!(host.to_string(), "callback panicked: host blew up"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_plain_string_errors() {
        let state = State::new();
        state
            .push_function(|_| Err(VmError::Runtime("plain failure".into())))
            .unwrap();
        let err = protected_call(&state, 0, None).unwrap_err();
        assert!(
            matches!(err, BindError::Execution { ref message, cause: None } if message == "plain failure")
        );
    }
}
