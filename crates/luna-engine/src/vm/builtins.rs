//! Base library.

use super::state::State;
use super::table::TableRef;
use super::value::{Type, Value};
use super::{Status, VmError, VmResult};

type Builtin = fn(&State) -> VmResult<usize>;

const BASE: &[(&str, Builtin)] = &[
    ("assert", assert),
    ("error", error),
    ("getmetatable", getmetatable),
    ("ipairs", ipairs),
    ("next", next),
    ("pairs", pairs),
    ("pcall", pcall),
    ("print", print),
    ("rawequal", rawequal),
    ("rawget", rawget),
    ("rawset", rawset),
    ("select", select),
    ("setmetatable", setmetatable),
    ("tonumber", tonumber),
    ("tostring", tostring),
    ("type", type_),
    ("unpack", unpack),
];

/// Install the base library into the globals table.
pub(crate) fn open_base(state: &State) -> VmResult<()> {
    for (name, func) in BASE {
        state.push_function(*func)?;
        state.set_global(name)?;
    }
    state.push_globals()?;
    state.set_global("_G")?;
    state.push(concat!("Luna ", env!("CARGO_PKG_VERSION")))?;
    state.set_global("_VERSION")?;
    tracing::trace!(count = BASE.len(), "base library opened");
    Ok(())
}

fn arg_error(state: &State, n: usize, func: &str, message: &str) -> VmError {
    state.runtime_error(format!("bad argument #{} to '{}' ({})", n, func, message))
}

fn check_any(state: &State, n: usize, func: &str) -> VmResult<Value> {
    if state.type_of(n as i32) == Type::None {
        return Err(arg_error(state, n, func, "value expected"));
    }
    Ok(state.value(n as i32))
}

fn check_table(state: &State, n: usize, func: &str) -> VmResult<TableRef> {
    state.to_table(n as i32).ok_or_else(|| {
        let message = format!("table expected, got {}", state.type_name(n as i32));
        arg_error(state, n, func, &message)
    })
}

fn check_integer(state: &State, n: usize, func: &str) -> VmResult<i64> {
    match state.to_number(n as i32) {
        Some(v) => Ok(v as i64),
        None => {
            let message = format!("number expected, got {}", state.type_name(n as i32));
            Err(arg_error(state, n, func, &message))
        }
    }
}

fn print(state: &State) -> VmResult<usize> {
    let mut line = String::new();
    for i in 1..=state.top() {
        if i > 1 {
            line.push('\t');
        }
        line.push_str(&state.tostring(&state.value(i as i32))?);
    }
    println!("{}", line);
    Ok(0)
}

fn type_(state: &State) -> VmResult<usize> {
    let value = check_any(state, 1, "type")?;
    state.push(value.type_name())?;
    Ok(1)
}

fn tostring(state: &State) -> VmResult<usize> {
    let value = check_any(state, 1, "tostring")?;
    let s = state.tostring(&value)?;
    state.push(s)?;
    Ok(1)
}

fn tonumber(state: &State) -> VmResult<usize> {
    let value = check_any(state, 1, "tonumber")?;
    let result = if state.is_none_or_nil(2) {
        value.to_number()
    } else {
        let base = check_integer(state, 2, "tonumber")?;
        if !(2..=36).contains(&base) {
            return Err(arg_error(state, 2, "tonumber", "base out of range"));
        }
        value
            .to_str()
            .and_then(|s| i64::from_str_radix(s.trim(), base as u32).ok())
            .map(|n| n as f64)
    };
    match result {
        Some(n) => state.push(n)?,
        None => state.push_nil()?,
    }
    Ok(1)
}

fn getmetatable(state: &State) -> VmResult<usize> {
    let value = check_any(state, 1, "getmetatable")?;
    match state.metatable_of(&value) {
        Some(mt) => {
            let protected = mt.borrow().get_str("__metatable");
            if protected.is_nil() {
                state.push(mt)?;
            } else {
                state.push(protected)?;
            }
        }
        None => state.push_nil()?,
    }
    Ok(1)
}

fn setmetatable(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "setmetatable")?;
    if !matches!(state.type_of(2), Type::Nil | Type::Table) {
        return Err(arg_error(state, 2, "setmetatable", "nil or table expected"));
    }
    let protected = table
        .borrow()
        .metatable()
        .is_some_and(|mt| !mt.borrow().get_str("__metatable").is_nil());
    if protected {
        return Err(state.runtime_error("cannot change a protected metatable"));
    }
    state.set_top(2);
    state.set_metatable(1)?;
    Ok(1)
}

fn rawget(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "rawget")?;
    let key = check_any(state, 2, "rawget")?;
    let value = table.borrow().get(&key);
    state.push(value)?;
    Ok(1)
}

fn rawset(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "rawset")?;
    check_any(state, 2, "rawset")?;
    check_any(state, 3, "rawset")?;
    state.set_top(3);
    state.raw_set(1)?;
    state.push(table)?;
    Ok(1)
}

fn rawequal(state: &State) -> VmResult<usize> {
    let a = check_any(state, 1, "rawequal")?;
    let b = check_any(state, 2, "rawequal")?;
    state.push(a.raw_equals(&b))?;
    Ok(1)
}

fn next(state: &State) -> VmResult<usize> {
    check_table(state, 1, "next")?;
    state.set_top(2);
    if state.next(1)? {
        Ok(2)
    } else {
        state.push_nil()?;
        Ok(1)
    }
}

fn pairs(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "pairs")?;
    state.push_function(next)?;
    state.push(table)?;
    state.push_nil()?;
    Ok(3)
}

fn ipairs_step(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "ipairs")?;
    let i = check_integer(state, 2, "ipairs")? + 1;
    let value = table.borrow().get(&Value::Number(i as f64));
    if value.is_nil() {
        state.push_nil()?;
        return Ok(1);
    }
    state.push(i as f64)?;
    state.push(value)?;
    Ok(2)
}

fn ipairs(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "ipairs")?;
    state.push_function(ipairs_step)?;
    state.push(table)?;
    state.push(0.0)?;
    Ok(3)
}

fn error(state: &State) -> VmResult<usize> {
    let value = state.value(1);
    let level = state.to_number(2).unwrap_or(1.0);
    let value = match value {
        Value::String(message) if level > 0.0 => {
            Value::from(format!("{}{}", state.where_(), message))
        }
        other => other,
    };
    Err(VmError::Raised(value))
}

fn pcall(state: &State) -> VmResult<usize> {
    check_any(state, 1, "pcall")?;
    let nargs = state.top() - 1;
    match state.pcall(nargs, None) {
        Status::Ok => {
            state.push(true)?;
            state.insert(1);
            Ok(state.top())
        }
        _ => {
            let err = state.pop_value();
            state.push(false)?;
            state.push(err)?;
            Ok(2)
        }
    }
}

fn assert(state: &State) -> VmResult<usize> {
    let value = check_any(state, 1, "assert")?;
    if value.is_truthy() {
        return Ok(state.top());
    }
    let message = match state.value(2) {
        Value::Nil => Value::from("assertion failed!"),
        other => other,
    };
    Err(VmError::Raised(message))
}

fn select(state: &State) -> VmResult<usize> {
    let count = state.top().saturating_sub(1) as i64;
    if let Some(s) = state.value(1).to_str() {
        if &*s == "#" {
            state.push(count as f64)?;
            return Ok(1);
        }
    }
    let n = check_integer(state, 1, "select")?;
    let n = if n < 0 { count + n + 1 } else { n };
    if n < 1 {
        return Err(arg_error(state, 1, "select", "index out of range"));
    }
    Ok((count - n + 1).max(0) as usize)
}

fn unpack(state: &State) -> VmResult<usize> {
    let table = check_table(state, 1, "unpack")?;
    let first = if state.is_none_or_nil(2) {
        1
    } else {
        check_integer(state, 2, "unpack")?
    };
    let last = if state.is_none_or_nil(3) {
        table.borrow().len() as i64
    } else {
        check_integer(state, 3, "unpack")?
    };
    if first > last {
        return Ok(0);
    }
    let values: Vec<Value> = {
        let table = table.borrow();
        (first..=last)
            .map(|i| table.get(&Value::Number(i as f64)))
            .collect()
    };
    let count = values.len();
    for value in values {
        state.push(value)?;
    }
    Ok(count)
}

