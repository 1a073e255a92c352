use luna_bind::{BindError, Context, EmptyArray, Nil, ScriptFunction, UserData};

#[derive(Debug, Clone, PartialEq, UserData)]
struct Point {
    x: f64,
    y: f64,
}

// ============================================================================
// Primitives
// ============================================================================

#[test]
fn test_write_int_then_return_it() {
    let ctx = Context::new();
    ctx.write("a", 5).unwrap();
    assert_eq!(ctx.evaluate::<i32>("return a").unwrap(), 5);
}

#[test]
fn test_primitive_round_trips() {
    let ctx = Context::new();
    ctx.write("flag", true).unwrap();
    ctx.write("ratio", 0.25).unwrap();
    ctx.write("big", 1i64 << 40).unwrap();
    ctx.write("name", "luna").unwrap();
    ctx.write("owned", String::from("text")).unwrap();

    assert!(ctx.read::<bool>("flag").unwrap());
    assert_eq!(ctx.read::<f64>("ratio").unwrap(), 0.25);
    assert_eq!(ctx.read::<i64>("big").unwrap(), 1i64 << 40);
    assert_eq!(ctx.read::<String>("name").unwrap(), "luna");
    assert_eq!(ctx.read::<String>("owned").unwrap(), "text");
}

#[test]
fn test_script_values_read_by_host() {
    let ctx = Context::new();
    ctx.execute("a = 3 b = 'x' .. 'y' c = 7 / 2 d = not false").unwrap();
    assert_eq!(ctx.read::<u8>("a").unwrap(), 3);
    assert_eq!(ctx.read::<String>("b").unwrap(), "xy");
    assert_eq!(ctx.read::<f32>("c").unwrap(), 3.5);
    assert!(ctx.read::<bool>("d").unwrap());
}

#[test]
fn test_numeric_coercions() {
    let ctx = Context::new();
    ctx.execute("s = '12' n = 24").unwrap();
    assert_eq!(ctx.read::<i32>("s").unwrap(), 12);
    assert_eq!(ctx.read::<f64>("s").unwrap(), 12.0);
    assert_eq!(ctx.read::<String>("n").unwrap(), "24");
}

#[test]
fn test_fractional_number_is_not_an_integer() {
    let ctx = Context::new();
    ctx.write("x", 1.5).unwrap();
    assert!(matches!(
        ctx.read::<i32>("x"),
        Err(BindError::WrongType { .. })
    ));
    ctx.write("x", -1).unwrap();
    assert!(ctx.read::<u32>("x").is_err());
    assert_eq!(ctx.read::<i32>("x").unwrap(), -1);
}

#[test]
fn test_out_of_range_integers_are_rejected() {
    let ctx = Context::new();
    ctx.execute("big = 2^63 ubig = 2^64").unwrap();
    assert!(matches!(
        ctx.read::<i64>("big"),
        Err(BindError::WrongType { .. })
    ));
    assert!(matches!(
        ctx.read::<u64>("ubig"),
        Err(BindError::WrongType { .. })
    ));
    assert_eq!(ctx.read::<u64>("big").unwrap(), 1u64 << 63);
    assert_eq!(ctx.state().top(), 0);
}

// ============================================================================
// Nil, Optional, EmptyArray
// ============================================================================

#[test]
fn test_nil_and_optional() {
    let ctx = Context::new();
    ctx.write("x", 1).unwrap();
    ctx.write("x", Nil).unwrap();
    assert!(!ctx.has_variable("x"));
    assert_eq!(ctx.read::<Option<i32>>("x").unwrap(), None);
    assert_eq!(ctx.read::<Nil>("x").unwrap(), Nil);

    ctx.write("y", Some(4)).unwrap();
    assert_eq!(ctx.read::<Option<i32>>("y").unwrap(), Some(4));
    ctx.write("y", None::<i32>).unwrap();
    assert!(!ctx.has_variable("y"));
}

#[test]
fn test_empty_array() {
    let ctx = Context::new();
    ctx.write("t", EmptyArray).unwrap();
    assert!(ctx
        .evaluate::<bool>("return type(t) == 'table' and next(t) == nil")
        .unwrap());
    assert_eq!(ctx.read::<EmptyArray>("t").unwrap(), EmptyArray);
    assert!(ctx.read::<Vec<i32>>("t").unwrap().is_empty());

    ctx.execute("t[1] = 1").unwrap();
    assert!(ctx.read::<EmptyArray>("t").is_err());
}

// ============================================================================
// Sequences and tuples
// ============================================================================

#[test]
fn test_sequence_round_trip() {
    let ctx = Context::new();
    ctx.write("v", vec![3, 1, 4, 1, 5]).unwrap();
    assert_eq!(ctx.evaluate::<i32>("return #v").unwrap(), 5);
    assert_eq!(ctx.evaluate::<i32>("return v[3]").unwrap(), 4);
    assert_eq!(ctx.read::<Vec<i32>>("v").unwrap(), vec![3, 1, 4, 1, 5]);
}

#[test]
fn test_sequence_from_script() {
    let ctx = Context::new();
    ctx.execute("words = { 'a', 'b', 'c' } holes = { [1] = 1, [3] = 3 }").unwrap();
    assert_eq!(ctx.read::<Vec<String>>("words").unwrap(), vec!["a", "b", "c"]);
    assert!(ctx.read::<Vec<i32>>("holes").is_err());
    assert!(ctx.read::<Vec<i32>>("words").is_err());
}

#[test]
fn test_nested_sequences() {
    let ctx = Context::new();
    ctx.write("grid", vec![vec![1, 2], vec![3]]).unwrap();
    assert_eq!(ctx.evaluate::<i32>("return grid[2][1]").unwrap(), 3);
    assert_eq!(
        ctx.read::<Vec<Vec<i32>>>("grid").unwrap(),
        vec![vec![1, 2], vec![3]]
    );
}

#[test]
fn test_multiple_returns_as_tuple() {
    let ctx = Context::new();
    let (a, b, c): (i32, String, Option<bool>) =
        ctx.evaluate("return 1, 'two'").unwrap();
    assert_eq!((a, b.as_str(), c), (1, "two", None));
    assert_eq!(ctx.state().top(), 0);
}

// ============================================================================
// Type mismatches
// ============================================================================

#[test]
fn test_string_read_as_other_types() {
    let ctx = Context::new();
    ctx.write("x", "hello").unwrap();

    assert!(matches!(ctx.read::<bool>("x"), Err(BindError::WrongType { .. })));
    assert!(matches!(ctx.read::<i32>("x"), Err(BindError::WrongType { .. })));
    assert!(matches!(ctx.read::<f64>("x"), Err(BindError::WrongType { .. })));
    assert!(matches!(
        ctx.read::<ScriptFunction>("x"),
        Err(BindError::WrongType { .. })
    ));
    assert!(matches!(ctx.read::<Point>("x"), Err(BindError::WrongType { .. })));
    assert_eq!(ctx.state().top(), 0);
}

#[test]
fn test_wrong_type_names_both_sides() {
    let ctx = Context::new();
    ctx.write("x", true).unwrap();
    match ctx.read::<String>("x") {
        Err(BindError::WrongType { observed, target }) => {
            assert_eq!(observed, "boolean");
            assert!(target.contains("String"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_object_round_trip() {
    let ctx = Context::new();
    ctx.write("p", Point { x: 1.0, y: 2.0 }).unwrap();
    assert_eq!(ctx.evaluate::<String>("return type(p)").unwrap(), "userdata");
    assert_eq!(ctx.read::<Point>("p").unwrap(), Point { x: 1.0, y: 2.0 });
}
