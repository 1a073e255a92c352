//! Per-type registration tables and bound object instances.
//!
//! Every reference shape `S` of a host type gets its own entry in the
//! runtime registry, keyed by `TypeId::of::<S>()`:
//!
//! - `RegistryKey::Type` holds the [`TypeTable`] of methods, member getters
//!   and setters, created on the first registration;
//! - `RegistryKey::Meta` holds the metatable shared by every instance of the
//!   shape, created on the first write of such an instance.
//!
//! The metatable's `__index` and `__newindex` consult the type table at
//! access time, so registrations made after an object was written still
//! apply to it.

use std::any::{type_name, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::mem;
use std::rc::{Rc, Weak};

use luna_engine::{Function, RegistryKey, State, TableRef, UserData as RawUserData, Value, VmResult};
use rustc_hash::FxHashMap;

use crate::call::{self, method_function, Method};
use crate::error::BindResult;
use crate::lifetime::finalizer;
use crate::object::{access_error, Shape, UserData};
use crate::reader::FromArgs;
use crate::writer::Push;

/// Dispatch entries of one reference shape.
#[derive(Default)]
struct TypeTable {
    /// Returned uncalled so scripts can use `obj:name(...)`
    methods: FxHashMap<String, Function>,
    /// Called with `(obj)`
    getters: FxHashMap<String, Function>,
    /// Called with `(obj, key)` when no named entry matches
    default_getter: Option<Function>,
    /// Called with `(obj, value)`
    setters: FxHashMap<String, Function>,
    /// Called with `(obj, key, value)` when no named setter matches
    default_setter: Option<Function>,
}

enum Resolved {
    Value(Function),
    Call(Function),
    Fallback(Function),
}

impl TypeTable {
    fn resolve_get(&self, key: &Value) -> Option<Resolved> {
        if let Value::String(name) = key {
            if let Some(method) = self.methods.get(&**name) {
                return Some(Resolved::Value(method.clone()));
            }
            if let Some(getter) = self.getters.get(&**name) {
                return Some(Resolved::Call(getter.clone()));
            }
        }
        self.default_getter.clone().map(Resolved::Fallback)
    }

    fn resolve_set(&self, key: &Value) -> Option<Resolved> {
        if let Value::String(name) = key {
            if let Some(setter) = self.setters.get(&**name) {
                return Some(Resolved::Call(setter.clone()));
            }
        }
        self.default_setter.clone().map(Resolved::Fallback)
    }

    fn is_empty(&self) -> bool {
        self.methods.is_empty()
            && self.getters.is_empty()
            && self.default_getter.is_none()
            && self.setters.is_empty()
            && self.default_setter.is_none()
    }
}

/// Where an installed function goes in a [`TypeTable`].
#[derive(Clone, Copy)]
pub(crate) enum Entry<'a> {
    Method(&'a str),
    Getter(&'a str),
    Setter(&'a str),
    DefaultGetter,
    DefaultSetter,
}

impl Entry<'_> {
    fn store(self, table: &mut TypeTable, func: Function) {
        match self {
            Entry::Method(name) => {
                table.methods.insert(name.to_string(), func);
            }
            Entry::Getter(name) => {
                table.getters.insert(name.to_string(), func);
            }
            Entry::Setter(name) => {
                table.setters.insert(name.to_string(), func);
            }
            Entry::DefaultGetter => table.default_getter = Some(func),
            Entry::DefaultSetter => table.default_setter = Some(func),
        }
    }
}

fn type_table(state: &State, key: RegistryKey) -> Option<Rc<RawUserData>> {
    match state.registry_value(key) {
        Value::UserData(ud) if ud.is::<TypeTable>() => Some(ud),
        _ => None,
    }
}

/// Run `f` on the type table of shape `S`, creating it if needed.
fn with_type_table<S: Shape, R>(state: &State, f: impl FnOnce(&mut TypeTable) -> R) -> BindResult<R> {
    let key = RegistryKey::Type(TypeId::of::<S>());
    let ud = match type_table(state, key) {
        Some(ud) => ud,
        None => {
            let ud = state.create_userdata(TypeTable::default())?;
            state.push(Value::UserData(Rc::clone(&ud)))?;
            state.registry_set(key);
            tracing::debug!(
                ty = <S::Target as UserData>::type_name(),
                shape = type_name::<S>(),
                "created registration table"
            );
            ud
        }
    };
    let mut table = ud.borrow_mut::<TypeTable>().map_err(access_error)?;
    Ok(f(&mut table))
}

fn lookup<S: Shape>(state: &State, f: impl FnOnce(&TypeTable) -> Option<Resolved>) -> Option<Resolved> {
    let ud = type_table(state, RegistryKey::Type(TypeId::of::<S>()))?;
    let table = ud.borrow::<TypeTable>().ok()?;
    f(&table)
}

/// Call `func` and push its first result.
fn push_first(state: &State, func: &Function, args: Vec<Value>) -> VmResult<usize> {
    let results = state.call_value(&Value::Function(func.clone()), args)?;
    state.push(results.into_iter().next().unwrap_or(Value::Nil))?;
    Ok(1)
}

fn index_handler<S: Shape>() -> Function {
    Function::native(|state| {
        let object = state.value(1);
        let key = state.value(2);
        match lookup::<S>(state, |table| table.resolve_get(&key)) {
            Some(Resolved::Value(method)) => {
                state.push(Value::Function(method))?;
                Ok(1)
            }
            Some(Resolved::Call(getter)) => push_first(state, &getter, vec![object]),
            Some(Resolved::Fallback(getter)) => push_first(state, &getter, vec![object, key]),
            None => {
                state.push_nil()?;
                Ok(1)
            }
        }
    })
}

fn newindex_handler<S: Shape>() -> Function {
    Function::native(|state| {
        let object = state.value(1);
        let key = state.value(2);
        let value = state.value(3);
        let args = match lookup::<S>(state, |table| table.resolve_set(&key)) {
            Some(Resolved::Call(setter)) => (setter, vec![object, value]),
            Some(Resolved::Fallback(setter)) => (setter, vec![object, key, value]),
            _ => {
                let field = key.to_str().map(|s| s.to_string()).unwrap_or_default();
                return Err(state.runtime_error(format!("No setter found for '{}'", field)));
            }
        };
        state.call_value(&Value::Function(args.0), args.1)?;
        Ok(0)
    })
}

/// Metatable shared by every instance of shape `S`.
fn object_metatable<S: Shape>(state: &State) -> BindResult<TableRef> {
    let key = RegistryKey::Meta(TypeId::of::<S>());
    if let Value::Table(mt) = state.registry_value(key) {
        return Ok(mt);
    }

    let mt = state.create_table()?;
    {
        let mut entries = mt.borrow_mut();
        entries.set(
            Value::from("__name"),
            Value::from(<S::Target as UserData>::type_name()),
        )?;
        entries.set(Value::from("__index"), Value::Function(index_handler::<S>()))?;
        entries.set(
            Value::from("__newindex"),
            Value::Function(newindex_handler::<S>()),
        )?;
        if mem::needs_drop::<S>() {
            entries.set(Value::from("__gc"), Value::Function(finalizer()))?;
        }
    }
    state.push(Value::Table(Rc::clone(&mt)))?;
    state.registry_set(key);
    Ok(mt)
}

/// Move `payload` into a new bound object instance and push it.
pub(crate) fn push_object<S: Shape>(state: &State, payload: S) -> BindResult<usize> {
    let mt = object_metatable::<S>(state)?;
    let ud = state.create_userdata(payload)?;
    ud.set_metatable(Some(mt));
    state.push(Value::UserData(ud))?;
    Ok(1)
}

/// An operation applied to every reference shape of `T`.
trait ShapeVisitor<T: UserData> {
    fn visit<S: Shape<Target = T>>(&mut self, state: &State) -> BindResult<()>;
}

fn visit_shapes<T: UserData>(state: &State, visitor: &mut impl ShapeVisitor<T>) -> BindResult<()> {
    visitor.visit::<T>(state)?;
    visitor.visit::<Weak<RefCell<T>>>(state)?;
    visitor.visit::<Weak<T>>(state)?;
    visitor.visit::<Rc<RefCell<T>>>(state)?;
    visitor.visit::<Rc<T>>(state)
}

struct Install<'a, M, Args, R, K> {
    entry: Entry<'a>,
    method: Rc<M>,
    _signature: PhantomData<fn(Args) -> (R, K)>,
}

impl<T, M, Args, R, K> ShapeVisitor<T> for Install<'_, M, Args, R, K>
where
    T: UserData,
    M: Method<T, Args, R, K>,
    Args: FromArgs + 'static,
    R: Push + 'static,
    K: 'static,
{
    fn visit<S: Shape<Target = T>>(&mut self, state: &State) -> BindResult<()> {
        // Const shapes only take methods that leave the target untouched.
        if <M as Method<T, Args, R, K>>::MUTABLE && !S::MUTABLE {
            return Ok(());
        }
        let func = method_function::<S, M, Args, R, K>(Rc::clone(&self.method));
        let entry = self.entry;
        with_type_table::<S, _>(state, |table| entry.store(table, func))
    }
}

/// Install `method` under `entry` for every shape of `T` it can run on.
pub(crate) fn install<T, M, Args, R, K>(state: &State, entry: Entry<'_>, method: M) -> BindResult<()>
where
    T: UserData,
    M: Method<T, Args, R, K>,
    Args: FromArgs + 'static,
    R: Push + 'static,
    K: 'static,
{
    let mut visitor = Install {
        entry,
        method: Rc::new(method),
        _signature: PhantomData,
    };
    visit_shapes::<T>(state, &mut visitor)
}

struct Remove<'a> {
    name: &'a str,
    removed: bool,
}

impl<T: UserData> ShapeVisitor<T> for Remove<'_> {
    fn visit<S: Shape<Target = T>>(&mut self, state: &State) -> BindResult<()> {
        let key = RegistryKey::Type(TypeId::of::<S>());
        let Some(ud) = type_table(state, key) else {
            return Ok(());
        };
        let empty = {
            let mut table = ud.borrow_mut::<TypeTable>().map_err(access_error)?;
            self.removed |= table.methods.remove(self.name).is_some();
            table.is_empty()
        };
        if empty {
            state.push_nil()?;
            state.registry_set(key);
        }
        Ok(())
    }
}

/// Remove the method `name` from every shape of `T`. Returns whether any
/// shape had it.
pub(crate) fn remove_method<T: UserData>(state: &State, name: &str) -> BindResult<bool> {
    let mut visitor = Remove {
        name,
        removed: false,
    };
    visit_shapes::<T>(state, &mut visitor)?;
    tracing::debug!(ty = T::type_name(), name, removed = visitor.removed, "unregistered method");
    Ok(visitor.removed)
}

struct SetMetamethod<'a> {
    name: &'a str,
    func: Function,
}

impl<T: UserData> ShapeVisitor<T> for SetMetamethod<'_> {
    fn visit<S: Shape<Target = T>>(&mut self, state: &State) -> BindResult<()> {
        let mt = object_metatable::<S>(state)?;
        let result = mt
            .borrow_mut()
            .set(Value::from(self.name), Value::Function(self.func.clone()));
        result?;
        Ok(())
    }
}

/// Run `f` on the `T` behind `ud`, whatever shape of `T` it holds.
fn with_target<T: UserData, R>(ud: &RawUserData, f: impl FnOnce(&T) -> R) -> Option<BindResult<R>> {
    fn access<S: Shape, R>(ud: &RawUserData, f: impl FnOnce(&S::Target) -> R) -> BindResult<R> {
        let payload = ud.borrow::<S>().map_err(access_error)?;
        S::access(&payload, f)
    }

    if ud.is::<T>() {
        return Some(access::<T, R>(ud, f));
    }
    if ud.is::<Weak<RefCell<T>>>() {
        return Some(access::<Weak<RefCell<T>>, R>(ud, f));
    }
    if ud.is::<Weak<T>>() {
        return Some(access::<Weak<T>, R>(ud, f));
    }
    if ud.is::<Rc<RefCell<T>>>() {
        return Some(access::<Rc<RefCell<T>>, R>(ud, f));
    }
    if ud.is::<Rc<T>>() {
        return Some(access::<Rc<T>, R>(ud, f));
    }
    None
}

/// Install `__eq` comparing any two shapes of `T` with `eq`.
pub(crate) fn set_eq<T, F>(state: &State, eq: F) -> BindResult<()>
where
    T: UserData,
    F: Fn(&T, &T) -> bool + 'static,
{
    let eq = Rc::new(eq);
    let func = Function::native(move |state| {
        call::invoke(state, 1, |(a, b): (Value, Value)| {
            let (Value::UserData(a), Value::UserData(b)) = (a, b) else {
                return Ok(false);
            };
            let outcome = with_target::<T, _>(&a, |x| with_target::<T, _>(&b, |y| (*eq)(x, y)));
            match outcome {
                Some(Ok(Some(result))) => result,
                Some(Err(err)) => Err(err),
                _ => Ok(false),
            }
        })
    });
    visit_shapes::<T>(state, &mut SetMetamethod { name: "__eq", func })?;
    tracing::debug!(ty = T::type_name(), "registered __eq");
    Ok(())
}

/// Install `__tostring` formatting any shape of `T` with `format`.
pub(crate) fn set_to_string<T, F>(state: &State, format: F) -> BindResult<()>
where
    T: UserData,
    F: Fn(&T) -> String + 'static,
{
    let format = Rc::new(format);
    let func = Function::native(move |state| {
        call::invoke(state, 1, |(object,): (Value,)| match object {
            Value::UserData(ud) => with_target::<T, _>(&ud, |target| (*format)(target))
                .unwrap_or_else(|| Ok(T::type_name().to_string())),
            other => Ok(other.type_name().to_string()),
        })
    });
    visit_shapes::<T>(state, &mut SetMetamethod {
        name: "__tostring",
        func,
    })?;
    tracing::debug!(ty = T::type_name(), "registered __tostring");
    Ok(())
}
