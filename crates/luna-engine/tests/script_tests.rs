use luna_engine::{RuntimeConfig, State, Status, Value};

/// Run a chunk with the base library and return every value it returns.
fn run(source: &str) -> Vec<Value> {
    let state = State::new();
    state.open_libs().unwrap();
    assert_eq!(state.load(source, "test"), Status::Ok, "load failed");
    state.call(0, None).unwrap();
    (1..=state.top()).map(|i| state.value(i as i32)).collect()
}

/// Run a chunk expected to fail and return the error message.
fn run_err(source: &str) -> String {
    let state = State::new();
    state.open_libs().unwrap();
    assert_eq!(state.load(source, "test"), Status::Ok, "load failed");
    assert_eq!(state.pcall(0, None), Status::Runtime);
    state.to_string(-1).unwrap().to_string()
}

fn number(source: &str) -> f64 {
    run(source)[0].to_number().unwrap()
}

fn string(source: &str) -> String {
    run(source)[0].to_str().unwrap().to_string()
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn test_arithmetic() {
    assert_eq!(number("return 1 + 2 * 3"), 7.0);
    assert_eq!(number("return (1 + 2) * 3"), 9.0);
    assert_eq!(number("return 2 ^ 3 ^ 2"), 512.0);
    assert_eq!(number("return -7 % 3"), 2.0);
    assert_eq!(number("return 7 / 2"), 3.5);
    assert_eq!(number("return '10' + 5"), 15.0);
}

#[test]
fn test_strings() {
    assert_eq!(string("return 'a' .. 'b' .. 1"), "ab1");
    assert_eq!(number("return #'hello'"), 5.0);
    assert_eq!(string("return tostring(1.5)"), "1.5");
    assert_eq!(string("return tostring(10)"), "10");
}

#[test]
fn test_logic_short_circuits() {
    assert_eq!(number("return nil or 4"), 4.0);
    assert_eq!(number("return false and error('x') or 3"), 3.0);
    assert!(matches!(run("return not nil")[0], Value::Boolean(true)));
    assert!(matches!(run("return 1 < 2, 'a' < 'b'")[1], Value::Boolean(true)));
}

#[test]
fn test_multiple_results_expand_last() {
    let values = run("local function f() return 1, 2, 3 end return f(), f()");
    assert_eq!(values.len(), 4);
    let values = run("local function f() return 1, 2, 3 end return (f())");
    assert_eq!(values.len(), 1);
}

// ============================================================================
// Statements
// ============================================================================

#[test]
fn test_loops() {
    assert_eq!(
        number("local s = 0 for i = 1, 10 do s = s + i end return s"),
        55.0
    );
    assert_eq!(
        number("local s = 0 for i = 10, 1, -2 do s = s + i end return s"),
        30.0
    );
    assert_eq!(
        number("local n = 0 while true do n = n + 1 if n == 5 then break end end return n"),
        5.0
    );
    assert_eq!(
        number("local n = 0 repeat local m = n + 1 n = m until m >= 3 return n"),
        3.0
    );
}

#[test]
fn test_generic_for() {
    assert_eq!(
        number("local t = {5, 6, 7} local s = 0 for i, v in ipairs(t) do s = s + i * v end return s"),
        38.0
    );
    assert_eq!(
        number("local t = {a = 1, b = 2} local s = 0 for k, v in pairs(t) do s = s + v end return s"),
        3.0
    );
}

#[test]
fn test_closures_share_upvalues() {
    let source = r#"
        local function counter()
            local n = 0
            return function() n = n + 1 return n end
        end
        local c = counter()
        c() c()
        return c()
    "#;
    assert_eq!(number(source), 3.0);
}

#[test]
fn test_loop_iterations_capture_fresh_locals() {
    let source = r#"
        local fs = {}
        for i = 1, 3 do fs[i] = function() return i end end
        return fs[1]() + fs[3]()
    "#;
    assert_eq!(number(source), 4.0);
}

#[test]
fn test_recursive_local_function() {
    assert_eq!(
        number("local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end return fib(15)"),
        610.0
    );
}

#[test]
fn test_methods_and_tables() {
    let source = r#"
        local account = {balance = 10}
        function account:deposit(v) self.balance = self.balance + v end
        account:deposit(5)
        return account.balance, #{1, 2, 3}
    "#;
    let values = run(source);
    assert_eq!(values[0].to_number(), Some(15.0));
    assert_eq!(values[1].to_number(), Some(3.0));
}

#[test]
fn test_varargs_and_select() {
    let source = r#"
        local function count(...) return select('#', ...) end
        local function second(...) return (select(2, ...)) end
        return count(1, nil, 3), second('a', 'b', 'c')
    "#;
    let values = run(source);
    assert_eq!(values[0].to_number(), Some(3.0));
    assert_eq!(values[1].to_str().as_deref(), Some("b"));
}

// ============================================================================
// Metatables
// ============================================================================

#[test]
fn test_index_and_newindex_metamethods() {
    let source = r#"
        local defaults = {color = 'red'}
        local log = {}
        local t = setmetatable({}, {
            __index = defaults,
            __newindex = function(t, k, v) rawset(log, k, v) end,
        })
        t.size = 3
        return t.color, rawget(t, 'size'), log.size
    "#;
    let values = run(source);
    assert_eq!(values[0].to_str().as_deref(), Some("red"));
    assert!(values[1].is_nil());
    assert_eq!(values[2].to_number(), Some(3.0));
}

#[test]
fn test_arithmetic_and_call_metamethods() {
    let source = r#"
        local mt = {}
        mt.__add = function(a, b) return a.v + b.v end
        mt.__call = function(self, x) return self.v * x end
        mt.__tostring = function(self) return 'V(' .. self.v .. ')' end
        local a = setmetatable({v = 2}, mt)
        local b = setmetatable({v = 3}, mt)
        return a + b, a(10), tostring(b)
    "#;
    let values = run(source);
    assert_eq!(values[0].to_number(), Some(5.0));
    assert_eq!(values[1].to_number(), Some(20.0));
    assert_eq!(values[2].to_str().as_deref(), Some("V(3)"));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_error_messages_carry_location() {
    assert_eq!(run_err("\n\nerror('boom')"), "test:3: boom");
    assert_eq!(
        run_err("local x = nil\nreturn x.y"),
        "test:2: attempt to index a nil value (local 'x')"
    );
    assert_eq!(
        run_err("missing()"),
        "test:1: attempt to call a nil value (global 'missing')"
    );
    assert_eq!(
        run_err("return {} + 1"),
        "test:1: attempt to perform arithmetic on a table value"
    );
}

#[test]
fn test_error_with_table_value() {
    let state = State::new();
    state.open_libs().unwrap();
    state.load("error({code = 7})", "test");
    assert_eq!(state.pcall(0, None), Status::Runtime);
    assert!(state.is_table(-1));
}

#[test]
fn test_script_pcall() {
    let values = run("local ok, err = pcall(error, 'bad', 0) return ok, err");
    assert!(matches!(values[0], Value::Boolean(false)));
    assert_eq!(values[1].to_str().as_deref(), Some("bad"));

    let values = run("return pcall(function(a) return a * 2 end, 21)");
    assert!(matches!(values[0], Value::Boolean(true)));
    assert_eq!(values[1].to_number(), Some(42.0));
}

#[test]
fn test_syntax_error_status() {
    let state = State::new();
    assert_eq!(state.load("local = 1", "bad"), Status::Syntax);
    let message = state.to_string(-1).unwrap();
    assert!(message.starts_with("bad:1:"), "{}", message);
}

#[test]
fn test_unbounded_recursion_is_stack_overflow() {
    let state = State::with_config(RuntimeConfig {
        max_call_depth: 40,
        ..RuntimeConfig::default()
    });
    state.load("local function f() return 1 + f() end return f()", "test");
    assert_eq!(state.pcall(0, None), Status::Runtime);
    assert_eq!(state.to_string(-1).as_deref(), Some("stack overflow"));
}
