use std::cell::Cell;
use std::rc::Rc;

use luna_engine::{Function, RegistryKey, RuntimeConfig, State, Status, Type, Value, VmError};

#[derive(Debug, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

fn point_metatable(state: &State) -> luna_engine::TableRef {
    let mt = state.create_table().unwrap();
    let index = Function::native(|s| {
        let ud = s.to_userdata(1).ok_or_else(|| s.runtime_error("not a point"))?;
        let point = ud
            .borrow::<Point>()
            .map_err(|e| s.runtime_error(e.to_string()))?;
        let value = match s.to_string(2).as_deref() {
            Some("x") => point.x,
            Some("y") => point.y,
            _ => return Ok(0),
        };
        drop(point);
        s.push(value)?;
        Ok(1)
    });
    mt.borrow_mut()
        .set(Value::from("__index"), Value::Function(index))
        .unwrap();
    mt
}

#[test]
fn test_userdata_with_index_metamethod() {
    let state = State::new();
    state.open_libs().unwrap();

    let mt = point_metatable(&state);
    let ud = state.create_userdata(Point { x: 1.5, y: -2.0 }).unwrap();
    ud.set_metatable(Some(mt));
    state.push(ud).unwrap();
    state.set_global("p").unwrap();

    assert_eq!(state.load("return p.x + p.y, type(p)", "points"), Status::Ok);
    state.call(0, Some(2)).unwrap();
    assert_eq!(state.to_number(-2), Some(-0.5));
    assert_eq!(state.to_string(-1).as_deref(), Some("userdata"));
}

#[test]
fn test_native_callbacks_reenter_the_runtime() {
    let state = State::new();
    state.open_libs().unwrap();
    state
        .push_function(|s| {
            // Call the script function passed as the first argument
            s.push_value(1)?;
            s.push(20.0)?;
            s.call(1, Some(1))?;
            Ok(1)
        })
        .unwrap();
    state.set_global("apply").unwrap();

    assert_eq!(
        state.load("return apply(function(v) return v + 1 end)", "reenter"),
        Status::Ok
    );
    state.call(0, Some(1)).unwrap();
    assert_eq!(state.to_number(-1), Some(21.0));
    assert_eq!(state.top(), 1);
}

#[test]
fn test_pcall_status_kinds() {
    let state = State::with_config(RuntimeConfig {
        memory_limit: Some(4096),
        ..RuntimeConfig::default()
    });
    state.open_libs().unwrap();

    state.load("local t = {} for i = 1, 1000 do t[i] = {} end", "alloc");
    assert_eq!(state.pcall(0, None), Status::Memory);
    assert_eq!(state.to_string(-1).as_deref(), Some("not enough memory"));
    state.pop(1);

    state
        .push_function(|_| Err(VmError::Runtime("plain".into())))
        .unwrap();
    assert_eq!(state.pcall(0, None), Status::Runtime);
    assert_eq!(state.to_string(-1).as_deref(), Some("plain"));
}

#[test]
fn test_registry_by_type_key() {
    let state = State::new();
    let key = RegistryKey::Type(std::any::TypeId::of::<Point>());
    state.new_table().unwrap();
    state.registry_set(key);
    assert_eq!(state.top(), 0);

    state.registry_get(key).unwrap();
    assert_eq!(state.type_of(-1), Type::Table);
    state.pop(1);

    state.push_nil().unwrap();
    state.registry_set(key);
    assert!(state.registry_value(key).is_nil());
}

#[test]
fn test_metatable_accessors() {
    let state = State::new();
    state.new_table().unwrap();
    assert!(!state.get_metatable(-1).unwrap());

    state.new_table().unwrap();
    state.push(1.0).unwrap();
    state.set_field(-2, "marker").unwrap();
    state.set_metatable(-2).unwrap();

    assert!(state.get_metatable(-1).unwrap());
    state.get_field(-1, "marker").unwrap();
    assert_eq!(state.to_number(-1), Some(1.0));
}

#[test]
fn test_weak_state_does_not_keep_runtime_alive() {
    let state = State::new();
    let weak = state.downgrade();
    assert!(weak.upgrade().is_some());
    drop(state);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_dropping_state_releases_payloads() {
    struct Tracked(Rc<Cell<bool>>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    let dropped = Rc::new(Cell::new(false));
    let state = State::new();
    state
        .new_userdata(Tracked(Rc::clone(&dropped)))
        .unwrap();
    state.set_global("keep").unwrap();
    assert!(!dropped.get());

    state.close();
    assert!(dropped.get());
}

#[test]
fn test_panic_handler_runs_before_abort() {
    let state = State::new();
    let seen = Rc::new(Cell::new(false));
    let flag = Rc::clone(&seen);
    // A handler that unwinds keeps the process alive for the test
    state.set_panic_handler(move |_| {
        flag.set(true);
        panic!("unwind out of the panic handler");
    });
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        state.panic("inconsistent state");
    }));
    assert!(result.is_err());
    assert!(seen.get());
}
