//! The runtime instance and its stack API.
//!
//! A [`State`] owns the value stack, the globals table, the registry, and the
//! bookkeeping for protected calls. Every method takes `&self` so native
//! functions, which receive `&State`, can call back into the runtime.
//!
//! Stack indices follow the usual convention: positive indices count from the
//! bottom of the current frame (1 is the first argument of a native call),
//! negative indices count down from the top (-1 is the top slot).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use super::builtins;
use super::function::{Closure, Function, NativeFunction};
use super::interpreter::{self, Scope};
use super::memory::Meter;
use super::table::{Table, TableRef};
use super::userdata::UserData;
use super::value::{format_number, Type, Value};
use super::{RegistryKey, Status, VmError, VmResult};
use crate::config::RuntimeConfig;
use crate::parser::{self, FunctionBody};

/// Longest `__index`/`__newindex` chain followed before giving up.
const MAX_META_CHAIN: usize = 100;

/// Fixed accounting cost of a table or userdata header.
const OBJECT_OVERHEAD: usize = 64;

#[derive(Clone)]
pub(crate) struct Location {
    chunk: Rc<str>,
    line: u32,
}

struct Inner {
    stack: RefCell<Vec<Value>>,
    /// Stack base of each active native call
    frames: RefCell<Vec<usize>>,
    globals: TableRef,
    registry: RefCell<FxHashMap<RegistryKey, Value>>,
    next_ref: Cell<u64>,
    config: RuntimeConfig,
    meter: Rc<Meter>,
    /// Userdata whose payload needs dropping at close
    finalizers: RefCell<Vec<Weak<UserData>>>,
    location: RefCell<Location>,
    depth: Cell<usize>,
    panic_handler: RefCell<Option<Rc<dyn Fn(&str)>>>,
    closed: Cell<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for ud in self.finalizers.get_mut().drain(..) {
            if let Some(ud) = ud.upgrade() {
                ud.finalize();
            }
        }
        self.globals.borrow_mut().clear();
    }
}

/// A runtime instance.
pub struct State {
    inner: Rc<Inner>,
}

/// Non-owning handle to a [`State`].
#[derive(Clone)]
pub struct WeakState {
    inner: Weak<Inner>,
}

impl WeakState {
    /// The runtime, if it is still alive.
    pub fn upgrade(&self) -> Option<State> {
        self.inner.upgrade().map(|inner| State { inner })
    }

    /// Whether this handle points at `state`.
    pub fn is(&self, state: &State) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&state.inner))
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Create a runtime with default limits and no libraries opened.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given limits.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let meter = Meter::new(config.memory_limit);
        let inner = Inner {
            stack: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
            globals: Rc::new(RefCell::new(Table::new())),
            registry: RefCell::new(FxHashMap::default()),
            next_ref: Cell::new(1),
            config,
            meter,
            finalizers: RefCell::new(Vec::new()),
            location: RefCell::new(Location {
                chunk: Rc::from("?"),
                line: 0,
            }),
            depth: Cell::new(0),
            panic_handler: RefCell::new(None),
            closed: Cell::new(false),
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    /// Register the base library in the globals table.
    pub fn open_libs(&self) -> VmResult<()> {
        builtins::open_base(self)
    }

    /// Whether both handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle to this runtime.
    pub fn downgrade(&self) -> WeakState {
        WeakState {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Limits this runtime was created with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Bytes currently charged to tables and userdata.
    pub fn memory_used(&self) -> usize {
        self.inner.meter.used()
    }

    pub(crate) fn check_memory(&self, bytes: usize) -> VmResult<()> {
        self.inner.meter.check(bytes)
    }

    // ========================================================================
    // Stack
    // ========================================================================

    fn base(&self) -> usize {
        self.inner.frames.borrow().last().copied().unwrap_or(0)
    }

    fn slot(&self, idx: i32) -> Option<usize> {
        let len = self.inner.stack.borrow().len();
        let base = self.base();
        if idx > 0 {
            let at = base + idx as usize - 1;
            (at < len).then_some(at)
        } else if idx < 0 {
            let offset = idx.unsigned_abs() as usize;
            (offset <= len - base).then(|| len - offset)
        } else {
            None
        }
    }

    /// Number of slots in the current frame.
    pub fn top(&self) -> usize {
        self.inner.stack.borrow().len() - self.base()
    }

    /// Truncate or extend (with nil) the current frame to `n` slots.
    pub fn set_top(&self, n: usize) {
        let base = self.base();
        self.inner
            .stack
            .borrow_mut()
            .resize(base + n, Value::Nil);
    }

    /// Convert a relative index into a positive frame index.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx < 0 {
            self.top() as i32 + idx + 1
        } else {
            idx
        }
    }

    /// Copy of the value at `idx`, nil if the index is not valid.
    pub fn value(&self, idx: i32) -> Value {
        self.slot(idx)
            .map(|at| self.inner.stack.borrow()[at].clone())
            .unwrap_or(Value::Nil)
    }

    /// Push a value.
    pub fn push(&self, value: impl Into<Value>) -> VmResult<()> {
        let value = value.into();
        if let Value::String(s) = &value {
            self.inner.meter.check(s.len())?;
        }
        let mut stack = self.inner.stack.borrow_mut();
        if stack.len() >= self.inner.config.stack_limit {
            return Err(VmError::StackOverflow);
        }
        stack.push(value);
        Ok(())
    }

    /// Push nil.
    pub fn push_nil(&self) -> VmResult<()> {
        self.push(Value::Nil)
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&self, idx: i32) -> VmResult<()> {
        let value = self.value(idx);
        self.push(value)
    }

    /// Push a host closure as a function.
    pub fn push_function<F>(&self, f: F) -> VmResult<()>
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        self.push(Function::native(f))
    }

    fn push_all(&self, values: Vec<Value>) -> VmResult<()> {
        let mut stack = self.inner.stack.borrow_mut();
        if stack.len() + values.len() > self.inner.config.stack_limit {
            return Err(VmError::StackOverflow);
        }
        stack.extend(values);
        Ok(())
    }

    /// Pop up to `n` slots of the current frame.
    pub fn pop(&self, n: usize) {
        let n = n.min(self.top());
        let mut stack = self.inner.stack.borrow_mut();
        let len = stack.len();
        stack.truncate(len - n);
    }

    /// Pop the top slot and return it (nil on an empty frame).
    pub fn pop_value(&self) -> Value {
        if self.top() == 0 {
            return Value::Nil;
        }
        self.inner.stack.borrow_mut().pop().unwrap_or(Value::Nil)
    }

    /// Remove the slot at `idx`, shifting the slots above it down.
    pub fn remove(&self, idx: i32) {
        if let Some(at) = self.slot(idx) {
            self.inner.stack.borrow_mut().remove(at);
        }
    }

    /// Move the top slot to `idx`, shifting the slots above it up.
    pub fn insert(&self, idx: i32) {
        if let Some(at) = self.slot(idx) {
            let mut stack = self.inner.stack.borrow_mut();
            if let Some(value) = stack.pop() {
                stack.insert(at, value);
            }
        }
    }

    /// Pop the top slot into `idx`.
    pub fn replace(&self, idx: i32) {
        if let Some(at) = self.slot(idx) {
            let value = self.pop_value();
            let mut stack = self.inner.stack.borrow_mut();
            if at < stack.len() {
                stack[at] = value;
            }
        }
    }

    // ========================================================================
    // Type queries and conversions
    // ========================================================================

    /// Type of the slot at `idx` ([`Type::None`] for an invalid index).
    pub fn type_of(&self, idx: i32) -> Type {
        match self.slot(idx) {
            Some(at) => self.inner.stack.borrow()[at].type_of(),
            None => Type::None,
        }
    }

    /// Type name of the slot at `idx`.
    pub fn type_name(&self, idx: i32) -> &'static str {
        self.type_of(idx).name()
    }

    /// Whether the slot is nil.
    pub fn is_nil(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Nil
    }

    /// Whether the slot is nil or absent.
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::None | Type::Nil)
    }

    /// Whether the slot is a boolean.
    pub fn is_boolean(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Boolean
    }

    /// Whether the slot is a number or a string convertible to one.
    pub fn is_number(&self, idx: i32) -> bool {
        self.value(idx).to_number().is_some()
    }

    /// Whether the slot is a string or a number.
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::String | Type::Number)
    }

    /// Whether the slot is a table.
    pub fn is_table(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Table
    }

    /// Whether the slot is a function.
    pub fn is_function(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Function
    }

    /// Whether the slot is a userdata.
    pub fn is_userdata(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::UserData
    }

    /// Whether the slot is a function or has a `__call` metamethod.
    pub fn is_callable(&self, idx: i32) -> bool {
        let value = self.value(idx);
        matches!(value, Value::Function(_)) || !self.metamethod(&value, "__call").is_nil()
    }

    /// Numeric value with string coercion.
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).to_number()
    }

    /// String value with number coercion.
    pub fn to_string(&self, idx: i32) -> Option<Rc<str>> {
        self.value(idx).to_str()
    }

    /// Truthiness of the slot.
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_truthy()
    }

    /// Userdata handle at `idx`.
    pub fn to_userdata(&self, idx: i32) -> Option<Rc<UserData>> {
        match self.value(idx) {
            Value::UserData(ud) => Some(ud),
            _ => None,
        }
    }

    /// Table handle at `idx`.
    pub fn to_table(&self, idx: i32) -> Option<TableRef> {
        match self.value(idx) {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Allocate a table without pushing it.
    pub fn create_table(&self) -> VmResult<TableRef> {
        let charge = self
            .inner
            .meter
            .charge(std::mem::size_of::<Table>() + OBJECT_OVERHEAD)?;
        Ok(Rc::new(RefCell::new(Table::with_charge(charge))))
    }

    /// Push a new empty table.
    pub fn new_table(&self) -> VmResult<()> {
        let table = self.create_table()?;
        self.push(table)
    }

    /// Pop a key and push `t[key]` for the value at `idx`, honoring `__index`.
    pub fn get_table(&self, idx: i32) -> VmResult<()> {
        let target = self.value(idx);
        let key = self.pop_value();
        let value = self.index(&target, &key)?;
        self.push(value)
    }

    /// Pop a value and a key and store `t[key] = value`, honoring `__newindex`.
    pub fn set_table(&self, idx: i32) -> VmResult<()> {
        let target = self.value(idx);
        let value = self.pop_value();
        let key = self.pop_value();
        self.set_index(&target, key, value)
    }

    /// Push `t[name]` for the value at `idx`.
    pub fn get_field(&self, idx: i32, name: &str) -> VmResult<()> {
        let target = self.value(idx);
        let value = self.index(&target, &Value::from(name))?;
        self.push(value)
    }

    /// Pop a value and store `t[name] = value`.
    pub fn set_field(&self, idx: i32, name: &str) -> VmResult<()> {
        let target = self.value(idx);
        let value = self.pop_value();
        self.set_index(&target, Value::from(name), value)
    }

    /// Like [`get_table`](Self::get_table) without metamethods.
    pub fn raw_get(&self, idx: i32) -> VmResult<()> {
        let table = self.table_at(idx)?;
        let key = self.pop_value();
        let value = table.borrow().get(&key);
        self.push(value)
    }

    /// Like [`set_table`](Self::set_table) without metamethods.
    pub fn raw_set(&self, idx: i32) -> VmResult<()> {
        let table = self.table_at(idx)?;
        let value = self.pop_value();
        let key = self.pop_value();
        let result = table.borrow_mut().set(key, value);
        result.map_err(|e| self.locate(e))
    }

    /// Push `t[n]` without metamethods.
    pub fn raw_get_index(&self, idx: i32, n: i64) -> VmResult<()> {
        let table = self.table_at(idx)?;
        let value = table.borrow().get(&Value::Number(n as f64));
        self.push(value)
    }

    /// Pop a value and store `t[n] = value` without metamethods.
    pub fn raw_set_index(&self, idx: i32, n: i64) -> VmResult<()> {
        let table = self.table_at(idx)?;
        let value = self.pop_value();
        let result = table.borrow_mut().set(Value::Number(n as f64), value);
        result.map_err(|e| self.locate(e))
    }

    /// Pop a key and push the next key/value pair of the table at `idx`.
    /// Returns false (pushing nothing) at the end of the traversal.
    pub fn next(&self, idx: i32) -> VmResult<bool> {
        let table = self.table_at(idx)?;
        let key = self.pop_value();
        let entry = table.borrow().next(&key).map_err(|e| self.locate(e))?;
        match entry {
            Some((k, v)) => {
                self.push(k)?;
                self.push(v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn table_at(&self, idx: i32) -> VmResult<TableRef> {
        match self.value(idx) {
            Value::Table(t) => Ok(t),
            other => Err(self.runtime_error(format!(
                "table expected, got {}",
                other.type_name()
            ))),
        }
    }

    /// The globals table.
    pub fn globals(&self) -> TableRef {
        Rc::clone(&self.inner.globals)
    }

    /// Push the globals table.
    pub fn push_globals(&self) -> VmResult<()> {
        self.push(self.globals())
    }

    /// Push the global `name`.
    pub fn get_global(&self, name: &str) -> VmResult<()> {
        let globals = Value::Table(self.globals());
        let value = self.index(&globals, &Value::from(name))?;
        self.push(value)
    }

    /// Pop a value into the global `name`.
    pub fn set_global(&self, name: &str) -> VmResult<()> {
        let globals = Value::Table(self.globals());
        let value = self.pop_value();
        self.set_index(&globals, Value::from(name), value)
    }

    /// Push the metatable of the value at `idx`. Returns false (pushing
    /// nothing) if it has none.
    pub fn get_metatable(&self, idx: i32) -> VmResult<bool> {
        match self.metatable_of(&self.value(idx)) {
            Some(mt) => {
                self.push(mt)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`.
    pub fn set_metatable(&self, idx: i32) -> VmResult<()> {
        let target = self.value(idx);
        let metatable = match self.pop_value() {
            Value::Nil => None,
            Value::Table(t) => Some(t),
            _ => return Err(self.runtime_error("metatable must be a table or nil")),
        };
        match target {
            Value::Table(t) => t.borrow_mut().set_metatable(metatable),
            Value::UserData(ud) => ud.set_metatable(metatable),
            other => {
                return Err(self.runtime_error(format!(
                    "cannot set metatable on a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Metatable of a table or userdata.
    pub fn metatable_of(&self, value: &Value) -> Option<TableRef> {
        match value {
            Value::Table(t) => t.borrow().metatable(),
            Value::UserData(ud) => ud.metatable(),
            _ => None,
        }
    }

    /// Field `name` of the value's metatable, nil if absent.
    pub fn metamethod(&self, value: &Value, name: &str) -> Value {
        self.metatable_of(value)
            .map(|mt| mt.borrow().get_str(name))
            .unwrap_or(Value::Nil)
    }

    /// `obj[key]` with `__index` handling.
    pub fn index(&self, obj: &Value, key: &Value) -> VmResult<Value> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let table = t.borrow();
                    let raw = table.get(key);
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    match table.metatable() {
                        Some(mt) => mt.borrow().get_str("__index"),
                        None => return Ok(Value::Nil),
                    }
                }
                other => {
                    let handler = self.metamethod(other, "__index");
                    if handler.is_nil() {
                        return Err(self.runtime_error(format!(
                            "attempt to index a {} value",
                            other.type_name()
                        )));
                    }
                    handler
                }
            };

            match handler {
                Value::Nil => return Ok(Value::Nil),
                Value::Function(_) => {
                    let results = self.call_value(&handler, vec![current, key.clone()])?;
                    return Ok(results.into_iter().next().unwrap_or(Value::Nil));
                }
                next => current = next,
            }
        }
        Err(self.runtime_error("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = value` with `__newindex` handling.
    pub fn set_index(&self, obj: &Value, key: Value, value: Value) -> VmResult<()> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let handler = {
                        let table = t.borrow();
                        if table.get(&key).is_nil() {
                            table
                                .metatable()
                                .map(|mt| mt.borrow().get_str("__newindex"))
                                .unwrap_or(Value::Nil)
                        } else {
                            Value::Nil
                        }
                    };
                    if handler.is_nil() {
                        let result = t.borrow_mut().set(key, value);
                        return result.map_err(|e| self.locate(e));
                    }
                    handler
                }
                other => {
                    let handler = self.metamethod(other, "__newindex");
                    if handler.is_nil() {
                        return Err(self.runtime_error(format!(
                            "attempt to index a {} value",
                            other.type_name()
                        )));
                    }
                    handler
                }
            };

            if let Value::Function(_) = handler {
                self.call_value(&handler, vec![current, key, value])?;
                return Ok(());
            }
            current = handler;
        }
        Err(self.runtime_error("'__newindex' chain too long; possible loop"))
    }

    /// Equality with `__eq` for pairs of tables or pairs of userdata.
    pub fn equals(&self, a: &Value, b: &Value) -> VmResult<bool> {
        if a.raw_equals(b) {
            return Ok(true);
        }
        match (a, b) {
            (Value::Table(_), Value::Table(_)) | (Value::UserData(_), Value::UserData(_)) => {
                let mut handler = self.metamethod(a, "__eq");
                if handler.is_nil() {
                    handler = self.metamethod(b, "__eq");
                }
                if handler.is_nil() {
                    return Ok(false);
                }
                let results = self.call_value(&handler, vec![a.clone(), b.clone()])?;
                Ok(results.first().is_some_and(Value::is_truthy))
            }
            _ => Ok(false),
        }
    }

    /// String form of a value, honoring `__tostring`.
    pub fn tostring(&self, value: &Value) -> VmResult<Rc<str>> {
        let handler = self.metamethod(value, "__tostring");
        if !handler.is_nil() {
            let results = self.call_value(&handler, vec![value.clone()])?;
            return match results.into_iter().next() {
                Some(Value::String(s)) => Ok(s),
                Some(Value::Number(n)) => Ok(Rc::from(format_number(n))),
                _ => Err(self.runtime_error("'__tostring' must return a string")),
            };
        }
        Ok(match value {
            Value::Nil => Rc::from("nil"),
            Value::Boolean(b) => Rc::from(b.to_string()),
            Value::Number(n) => Rc::from(format_number(*n)),
            Value::String(s) => s.clone(),
            other => Rc::from(format!(
                "{}: 0x{:08x}",
                other.type_name(),
                other.address().unwrap_or(0)
            )),
        })
    }

    // ========================================================================
    // Userdata
    // ========================================================================

    /// Move a host value into a new userdata without pushing it.
    pub fn create_userdata<T: Any>(&self, value: T) -> VmResult<Rc<UserData>> {
        let charge = self
            .inner
            .meter
            .charge(std::mem::size_of::<T>() + OBJECT_OVERHEAD)?;
        let ud = Rc::new(UserData::new(value, Some(charge)));
        if std::mem::needs_drop::<T>() {
            let mut finalizers = self.inner.finalizers.borrow_mut();
            if finalizers.len() >= 64 && finalizers.len().is_power_of_two() {
                finalizers.retain(|w| w.strong_count() > 0);
            }
            finalizers.push(Rc::downgrade(&ud));
        }
        Ok(ud)
    }

    /// Move a host value into a new userdata and push it.
    pub fn new_userdata<T: Any>(&self, value: T) -> VmResult<()> {
        let ud = self.create_userdata(value)?;
        self.push(ud)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn enter(&self) -> VmResult<DepthGuard<'_>> {
        let depth = self.inner.depth.get();
        if depth >= self.inner.config.max_call_depth {
            return Err(VmError::StackOverflow);
        }
        self.inner.depth.set(depth + 1);
        Ok(DepthGuard(&self.inner.depth))
    }

    /// Call `func` with `args` and collect every result.
    pub fn call_value(&self, func: &Value, args: Vec<Value>) -> VmResult<Vec<Value>> {
        let _depth = self.enter()?;
        match func {
            Value::Function(Function::Native(f)) => self.call_native(f, args),
            Value::Function(Function::Script(closure)) => {
                interpreter::call_closure(self, closure, args)
            }
            other => {
                let handler = self.metamethod(other, "__call");
                if handler.is_nil() {
                    return Err(self.runtime_error(format!(
                        "attempt to call a {} value",
                        other.type_name()
                    )));
                }
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(other.clone());
                full.extend(args);
                self.call_value(&handler, full)
            }
        }
    }

    fn call_native(&self, f: &Rc<NativeFunction>, args: Vec<Value>) -> VmResult<Vec<Value>> {
        let f = Rc::clone(f);
        let base = {
            let mut stack = self.inner.stack.borrow_mut();
            if stack.len() + args.len() > self.inner.config.stack_limit {
                return Err(VmError::StackOverflow);
            }
            let base = stack.len();
            stack.extend(args);
            base
        };

        self.inner.frames.borrow_mut().push(base);
        let result = (f.func)(self);
        self.inner.frames.borrow_mut().pop();

        let mut stack = self.inner.stack.borrow_mut();
        match result {
            Ok(n) => {
                let n = n.min(stack.len().saturating_sub(base));
                let at = stack.len() - n;
                let results = stack.split_off(at);
                stack.truncate(base);
                Ok(results)
            }
            Err(err) => {
                stack.truncate(base);
                Err(err)
            }
        }
    }

    /// Call the function below the top `nargs` slots, replacing it and its
    /// arguments with its results (exactly `nresults` of them if given).
    ///
    /// Errors are returned unprotected; the function and arguments are
    /// consumed either way.
    pub fn call(&self, nargs: usize, nresults: Option<usize>) -> VmResult<()> {
        if nargs + 1 > self.top() {
            return Err(self.runtime_error("attempt to call a missing value"));
        }
        let (func, args) = {
            let mut stack = self.inner.stack.borrow_mut();
            let at = stack.len() - nargs - 1;
            let mut items = stack.split_off(at);
            let func = items.remove(0);
            (func, items)
        };

        let mut results = self.call_value(&func, args)?;
        if let Some(n) = nresults {
            results.resize(n, Value::Nil);
        }
        self.push_all(results)
    }

    /// Protected [`call`](Self::call). On failure the function and arguments
    /// are replaced by the error value and the failure kind is returned.
    pub fn pcall(&self, nargs: usize, nresults: Option<usize>) -> Status {
        let func_slot = self.inner.stack.borrow().len().saturating_sub(nargs + 1);
        let frames = self.inner.frames.borrow().len();
        let location = self.location();

        let err = match self.call(nargs, nresults) {
            Ok(()) => return Status::Ok,
            Err(err) => err,
        };

        self.inner.stack.borrow_mut().truncate(func_slot);
        self.inner.frames.borrow_mut().truncate(frames);
        self.set_location(location);
        tracing::debug!(error = %err, "protected call failed");

        let (status, value) = match err {
            VmError::Raised(value) => (Status::Runtime, value),
            VmError::Runtime(msg) => (Status::Runtime, Value::from(msg)),
            VmError::Syntax(msg) => (Status::Syntax, Value::from(msg)),
            VmError::StackOverflow => (Status::Runtime, Value::from("stack overflow")),
            VmError::OutOfMemory => (Status::Memory, Value::from("not enough memory")),
        };
        self.inner.stack.borrow_mut().push(value);
        status
    }

    /// Compile a chunk and push it as a function, or push the error message.
    pub fn load(&self, source: &str, chunk_name: &str) -> Status {
        let (status, value) = match parser::parse(source) {
            Ok(block) => {
                tracing::trace!(chunk = chunk_name, "chunk loaded");
                let body = Rc::new(FunctionBody {
                    params: Vec::new(),
                    is_vararg: true,
                    body: block,
                    line: 0,
                });
                let closure = Closure {
                    body,
                    env: Scope::root(),
                    chunk: Rc::from(chunk_name),
                };
                (Status::Ok, Value::Function(Function::Script(Rc::new(closure))))
            }
            Err(err) => {
                let message = format!("{}:{}: {}", chunk_name, err.span().line, err);
                tracing::debug!(chunk = chunk_name, %message, "syntax error");
                (Status::Syntax, Value::from(message))
            }
        };
        match self.push(value) {
            Ok(()) => status,
            Err(VmError::OutOfMemory) => Status::Memory,
            Err(_) => Status::Runtime,
        }
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Push the registry entry for `key` (nil if absent).
    pub fn registry_get(&self, key: RegistryKey) -> VmResult<()> {
        let value = self.registry_value(key);
        self.push(value)
    }

    /// Registry entry for `key` without touching the stack.
    pub fn registry_value(&self, key: RegistryKey) -> Value {
        self.inner
            .registry
            .borrow()
            .get(&key)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Pop a value into the registry entry for `key`; nil removes the entry.
    pub fn registry_set(&self, key: RegistryKey) {
        let value = self.pop_value();
        // Old entries are dropped after the borrow ends; their destructors
        // may release pins of their own.
        let old = if value.is_nil() {
            self.inner.registry.borrow_mut().remove(&key)
        } else {
            self.inner.registry.borrow_mut().insert(key, value)
        };
        drop(old);
    }

    /// Pop a value and pin it in the registry under a fresh key.
    pub fn registry_ref(&self) -> RegistryKey {
        let id = self.inner.next_ref.get();
        self.inner.next_ref.set(id + 1);
        let key = RegistryKey::Ref(id);
        let value = self.pop_value();
        let old = self.inner.registry.borrow_mut().insert(key, value);
        drop(old);
        key
    }

    /// Release a pin taken with [`registry_ref`](Self::registry_ref).
    pub fn registry_unref(&self, key: RegistryKey) {
        let old = self.inner.registry.borrow_mut().remove(&key);
        drop(old);
    }

    // ========================================================================
    // Errors and locations
    // ========================================================================

    pub(crate) fn location(&self) -> Location {
        self.inner.location.borrow().clone()
    }

    pub(crate) fn set_location(&self, location: Location) {
        *self.inner.location.borrow_mut() = location;
    }

    pub(crate) fn enter_chunk(&self, chunk: &Rc<str>, line: u32) {
        *self.inner.location.borrow_mut() = Location {
            chunk: Rc::clone(chunk),
            line,
        };
    }

    pub(crate) fn set_line(&self, line: u32) {
        self.inner.location.borrow_mut().line = line;
    }

    /// `"chunk:line: "` for the script code currently running, or an empty
    /// string outside of scripts.
    pub fn where_(&self) -> String {
        let location = self.inner.location.borrow();
        if location.line == 0 {
            String::new()
        } else {
            format!("{}:{}: ", location.chunk, location.line)
        }
    }

    /// A runtime error prefixed with the current location.
    pub fn runtime_error(&self, message: impl fmt::Display) -> VmError {
        VmError::Runtime(format!("{}{}", self.where_(), message))
    }

    pub(crate) fn locate(&self, err: VmError) -> VmError {
        match err {
            VmError::Runtime(message) => self.runtime_error(message),
            other => other,
        }
    }

    /// Install the handler run by [`panic`](Self::panic) before aborting.
    pub fn set_panic_handler<F>(&self, handler: F)
    where
        F: Fn(&str) + 'static,
    {
        *self.inner.panic_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Report an unrecoverable inconsistency and abort the process.
    pub fn panic(&self, message: &str) -> ! {
        tracing::error!(message, "unrecoverable runtime error");
        let handler = self.inner.panic_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(message);
        }
        std::process::abort()
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Run pending finalizers and release every value the runtime holds.
    ///
    /// `__gc` metamethods run first, newest object first; errors they raise
    /// are logged and ignored. Payloads are then dropped even if scripts
    /// still reference them through cycles.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }

        let pending: Vec<Rc<UserData>> = self
            .inner
            .finalizers
            .take()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        tracing::debug!(count = pending.len(), "running finalizers");

        self.inner.frames.borrow_mut().clear();
        let stack = self.inner.stack.take();
        drop(stack);
        for ud in pending.iter().rev() {
            let handler = ud
                .metatable()
                .map(|mt| mt.borrow().get_str("__gc"))
                .unwrap_or(Value::Nil);
            if let Value::Function(_) = handler {
                if let Err(err) = self.call_value(&handler, vec![Value::UserData(Rc::clone(ud))]) {
                    tracing::debug!(error = %err, "error in finalizer");
                }
            }
            ud.finalize();
        }

        let stack = self.inner.stack.take();
        let registry = self.inner.registry.take();
        drop(stack);
        drop(registry);
        let globals = std::mem::take(&mut *self.inner.globals.borrow_mut());
        drop(globals);
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("top", &self.top())
            .field("memory_used", &self.memory_used())
            .finish()
    }
}
