use std::io::{self, Read, Write};

use luna_bind::{
    BindError, Context, ContextConfig, Metatable, OneOf2, OneOf3, Pairs, PathKey, Value,
};

// ============================================================================
// Paths
// ============================================================================

#[test]
fn test_nested_read_and_write() {
    let ctx = Context::new();
    ctx.execute("config = { window = { width = 640, sizes = { 10, 20, 30 } } }")
        .unwrap();

    assert_eq!(ctx.read::<i32>(("config", "window", "width")).unwrap(), 640);
    assert_eq!(ctx.read::<i32>(("config", "window", "sizes", 2)).unwrap(), 20);

    ctx.write(("config", "window", "width"), 800).unwrap();
    ctx.write(("config", "window", "sizes", 4), 40).unwrap();
    assert_eq!(
        ctx.evaluate::<i32>("return config.window.width + #config.window.sizes")
            .unwrap(),
        804
    );
    assert_eq!(ctx.state().top(), 0);
}

#[test]
fn test_integer_keys_after_a_name() {
    let ctx = Context::new();
    ctx.execute("a = { 'x', 'y', 'z' }").unwrap();
    assert_eq!(ctx.read::<String>(("a", 2)).unwrap(), "y");
    ctx.write(("a", 2), "w").unwrap();
    assert_eq!(ctx.evaluate::<String>("return a[2]").unwrap(), "w");
}

#[test]
fn test_explicit_path_keys() {
    let ctx = Context::new();
    ctx.execute("t = { inner = { 5 } }").unwrap();
    let path = vec![
        PathKey::from("t"),
        PathKey::from("inner"),
        PathKey::Index(1),
    ];
    assert_eq!(ctx.read::<i32>(path).unwrap(), 5);
}

#[test]
fn test_reading_through_missing_parents_is_nil() {
    let ctx = Context::new();
    assert_eq!(ctx.read::<Option<i32>>(("nope", "deeper", 1)).unwrap(), None);
    assert!(!ctx.has_variable(("nope", "deeper")));
    assert_eq!(ctx.state().top(), 0);
}

#[test]
fn test_writing_through_missing_parent_fails() {
    let ctx = Context::new();
    let err = ctx.write(("nope", "field"), 1).unwrap_err();
    assert!(matches!(err, BindError::Execution { .. }));
    assert_eq!(ctx.state().top(), 0);
}

#[test]
fn test_empty_path_fails() {
    let ctx = Context::new();
    assert!(ctx.read::<i32>(Vec::<PathKey>::new()).is_err());
    assert!(ctx.write(Vec::<PathKey>::new(), 1).is_err());
}

#[test]
fn test_has_variable() {
    let ctx = Context::new();
    ctx.execute("present = 0 t = { flag = false }").unwrap();
    assert!(ctx.has_variable("present"));
    assert!(ctx.has_variable(("t", "flag")));
    assert!(!ctx.has_variable(("t", "other")));
    assert!(!ctx.has_variable("absent"));
}

// ============================================================================
// Metatables
// ============================================================================

#[test]
fn test_metatable_steps() {
    let ctx = Context::new();
    ctx.execute("t = setmetatable({}, { kind = 'special' })").unwrap();
    assert_eq!(
        ctx.read::<String>(("t", Metatable, "kind")).unwrap(),
        "special"
    );
    assert!(ctx.has_variable(("t", Metatable)));

    ctx.execute("plain = {}").unwrap();
    assert!(!ctx.has_variable(("plain", Metatable)));
}

#[test]
fn test_metatable_created_on_write() {
    let ctx = Context::new();
    ctx.execute("t = {}").unwrap();
    ctx.write(("t", Metatable, "__index"), Pairs(vec![("hidden", 7)]))
        .unwrap();
    assert_eq!(ctx.evaluate::<i32>("return t.hidden").unwrap(), 7);
    assert!(ctx.has_variable(("t", Metatable)));
}

#[test]
fn test_path_cannot_start_with_metatable() {
    let ctx = Context::new();
    assert!(ctx.read::<Value>((Metatable, "x")).is_err());
    assert!(ctx.write((Metatable,), 1).is_err());
}

// ============================================================================
// Sum types and dynamic values
// ============================================================================

#[test]
fn test_one_of_picks_first_match() {
    let ctx = Context::new();
    ctx.execute("s = 'text' n = 3 b = true").unwrap();

    let s: OneOf3<bool, i32, String> = ctx.read("s").unwrap();
    assert_eq!(s, OneOf3::C("text".to_string()));
    let n: OneOf3<bool, i32, String> = ctx.read("n").unwrap();
    assert_eq!(n, OneOf3::B(3));
    let b: OneOf3<bool, i32, String> = ctx.read("b").unwrap();
    assert_eq!(b.index(), 0);

    assert!(ctx.read::<OneOf2<bool, i32>>("s").is_err());
}

#[test]
fn test_one_of_written_as_held_alternative() {
    let ctx = Context::new();
    ctx.write("v", OneOf2::<i32, String>::B("x".into())).unwrap();
    assert_eq!(ctx.evaluate::<String>("return type(v)").unwrap(), "string");
}

#[test]
fn test_dynamic_value() {
    let ctx = Context::new();
    ctx.execute("x = 'dyn'").unwrap();
    let value: Value = ctx.read("x").unwrap();
    assert_eq!(value.type_name(), "string");
    ctx.write("y", value).unwrap();
    assert_eq!(ctx.read::<String>("y").unwrap(), "dyn");
}

#[test]
fn test_pairs_keep_script_keys() {
    let ctx = Context::new();
    ctx.execute("t = { a = 1 }").unwrap();
    let pairs: Pairs<String, i32> = ctx.read("t").unwrap();
    assert_eq!(pairs.0, vec![("a".to_string(), 1)]);
}

#[test]
fn test_optional_inside_tuple() {
    let ctx = Context::new();
    let (a, b, c): (Option<i32>, i32, Option<String>) =
        ctx.evaluate("return nil, 2").unwrap();
    assert_eq!((a, b, c), (None, 2, None));
}

// ============================================================================
// Readers
// ============================================================================

#[test]
fn test_execute_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "loaded = 40 + 2").unwrap();

    let ctx = Context::new();
    let reader = std::fs::File::open(file.path()).unwrap();
    ctx.execute_reader(reader).unwrap();
    assert_eq!(ctx.read::<i32>("loaded").unwrap(), 42);
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("disk unplugged"))
    }
}

#[test]
fn test_failing_reader() {
    let ctx = Context::new();
    let err = ctx.execute_reader(FailingReader).unwrap_err();
    assert!(matches!(err, BindError::Io(_)));
    assert_eq!(err.to_string(), "disk unplugged");
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_memory_limit_from_config() {
    let config = ContextConfig::from_toml_str(
        r#"
        chunk_name = "limited"

        [runtime]
        memory_limit = 4096
        "#,
    )
    .unwrap();
    let ctx = Context::with_config(config).unwrap();

    let err = ctx
        .execute("local t = {} for i = 1, 1000 do t[i] = {} end")
        .unwrap_err();
    assert!(matches!(err, BindError::Allocation));
    assert_eq!(ctx.state().top(), 0);
}

#[test]
fn test_call_depth_from_config() {
    let config = ContextConfig::from_toml_str("[runtime]\nmax_call_depth = 20\n").unwrap();
    let ctx = Context::with_config(config).unwrap();
    let err = ctx
        .execute("local function f(n) return f(n + 1) + 1 end f(0)")
        .unwrap_err();
    assert!(err.to_string().contains("stack overflow"));
}
