// luna-derive: derive macros for exposing Rust types to Luna scripts
//
// Provides:
// - #[derive(UserData)] - Marks a type as a bindable host object
// - #[derive(ScriptEnum)] - Marshals a fieldless enum as an integer
//
// Example:
// ```
// use luna_bind::{Context, UserData};
//
// #[derive(Clone, UserData)]
// struct Counter {
//     value: i32,
// }
//
// let ctx = Context::new();
// ctx.register_function("increment", |c: &mut Counter| c.value += 1)?;
// ctx.write("counter", Counter { value: 10 })?;
// ctx.execute("counter:increment()")?;
// ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod script_enum;
mod user_data;

/// Implements `luna_bind::UserData` for a struct or enum.
///
/// The type becomes an opaque object on the script side. Methods and members
/// are attached with `Context::register_function` and friends.
///
/// The script-visible type name defaults to the Rust identifier and can be
/// overridden:
///
/// ```ignore
/// #[derive(UserData)]
/// #[luna(name = "Vec2")]
/// struct Vector2 { x: f64, y: f64 }
/// ```
#[proc_macro_derive(UserData, attributes(luna))]
pub fn derive_user_data(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    user_data::expand_user_data(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Implements `Marshal`, `Push` and `FromStack` for a fieldless enum.
///
/// Each variant is written as its discriminant. Reading an integer that
/// matches no variant is a wrong-type error.
///
/// ```ignore
/// #[derive(Clone, Copy, ScriptEnum)]
/// enum Direction { North = 1, South = 2 }
/// ```
#[proc_macro_derive(ScriptEnum)]
pub fn derive_script_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    script_enum::expand_script_enum(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
