use std::cell::Cell;
use std::rc::Rc;

use luna_bind::{BindResult, Context, EmptyArray, Metatable, ObjectRef, Pairs, UserData};

#[derive(Debug, Clone, Default, UserData)]
struct Foo {
    value: i32,
}

#[derive(Debug, Clone, Default, UserData)]
struct Bar {
    value: i32,
}

// ============================================================================
// Tables
// ============================================================================

#[test]
fn test_writing_metatable() {
    let ctx = Context::new();
    let called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&called);

    ctx.write("foo", EmptyArray).unwrap();
    ctx.write_function(("foo", Metatable, "__call"), move |_: Pairs<i32, i32>| {
        flag.set(true)
    })
    .unwrap();
    assert_eq!(
        ctx.evaluate::<String>("return type(getmetatable(foo))").unwrap(),
        "table"
    );

    ctx.execute("foo()").unwrap();
    assert!(called.get());
}

#[test]
fn test_reading_metatable() {
    let ctx = Context::new();
    ctx.write("foo", EmptyArray).unwrap();
    ctx.write(("foo", Metatable, "x"), 18).unwrap();

    assert_eq!(ctx.evaluate::<i32>("return getmetatable(foo).x").unwrap(), 18);
    assert_eq!(ctx.read::<i32>(("foo", Metatable, "x")).unwrap(), 18);
}

// ============================================================================
// Objects
// ============================================================================

#[test]
fn test_writing_metatable_of_objects() {
    let ctx = Context::new();
    ctx.write("foo", Foo::default()).unwrap();
    ctx.write_function(("foo", Metatable, "__call"), |foo: ObjectRef<Foo>| -> BindResult<()> {
        foo.with_mut(|f| f.value += 1)
    })
    .unwrap();
    ctx.write_function(
        ("foo", Metatable, "__index"),
        |foo: ObjectRef<Foo>, index: String| -> BindResult<i32> {
            foo.with_mut(|f| f.value += index.len() as i32)?;
            Ok(12)
        },
    )
    .unwrap();

    ctx.execute("foo()").unwrap();
    assert_eq!(ctx.evaluate::<i32>("return foo.test").unwrap(), 12);
    assert_eq!(ctx.read::<Foo>("foo").unwrap().value, 5);
}

#[test]
fn test_custom_eq_only_for_registered_type() {
    let ctx = Context::new();
    ctx.register_eq_function(|a: &Foo, b: &Foo| a.value == b.value)
        .unwrap();

    ctx.write("a", Foo::default()).unwrap();
    ctx.write("b", Foo::default()).unwrap();
    assert!(ctx.evaluate::<bool>("return a == b").unwrap());

    ctx.write("c", Bar::default()).unwrap();
    ctx.write("d", Bar::default()).unwrap();
    assert!(!ctx.evaluate::<bool>("return c == d").unwrap());
    assert!(ctx.evaluate::<bool>("return c == c").unwrap());
}

#[test]
fn test_custom_to_string_only_for_registered_type() {
    let ctx = Context::new();
    ctx.register_to_string_function(|_: &Foo| "foo bar".to_string())
        .unwrap();

    ctx.write("foo", Foo::default()).unwrap();
    ctx.write("bar", Bar::default()).unwrap();
    assert_eq!(
        ctx.evaluate::<String>("return tostring(foo)").unwrap(),
        "foo bar"
    );
    assert!(ctx
        .evaluate::<String>("return tostring(bar)")
        .unwrap()
        .starts_with("userdata: 0x"));
}

#[test]
fn test_object_metatable_is_named() {
    let ctx = Context::new();
    ctx.write("foo", Foo::default()).unwrap();
    ctx.write("shared", Rc::new(Foo::default())).unwrap();
    assert_eq!(ctx.read::<String>(("foo", Metatable, "__name")).unwrap(), "Foo");
    assert_eq!(
        ctx.read::<String>(("shared", Metatable, "__name")).unwrap(),
        "Foo"
    );
    assert!(!ctx
        .evaluate::<bool>("return getmetatable(foo) == getmetatable(shared)")
        .unwrap());
}
