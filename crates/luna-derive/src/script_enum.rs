// #[derive(ScriptEnum)] implementation

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Result};

/// Expands `#[derive(ScriptEnum)]` into the three marshaling impls.
///
/// Discriminants are compared as `i64`, so explicit values such as
/// `North = 10` round-trip unchanged.
pub fn expand_script_enum(input: DeriveInput) -> Result<TokenStream> {
    let ident = &input.ident;

    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "ScriptEnum can only be derived for enums",
        ));
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "ScriptEnum cannot be derived for generic enums",
        ));
    }
    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "ScriptEnum requires at least one variant",
        ));
    }

    let mut variants = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "ScriptEnum variants cannot carry fields",
            ));
        }
        variants.push(&variant.ident);
    }

    Ok(quote! {
        impl ::luna_bind::Marshal for #ident {
            const CATEGORY: ::luna_bind::Category = ::luna_bind::Category::Enum;
        }

        impl ::luna_bind::Push for #ident {
            fn push(self, state: &::luna_bind::State) -> ::luna_bind::BindResult<usize> {
                ::luna_bind::Push::push(self as i64, state)
            }
        }

        impl ::luna_bind::FromStack for #ident {
            fn test(state: &::luna_bind::State, idx: i32) -> bool {
                match <i64 as ::luna_bind::FromStack>::test_read(state, idx) {
                    #( Some(n) if n == #ident::#variants as i64 => true, )*
                    _ => false,
                }
            }

            fn read(state: &::luna_bind::State, idx: i32) -> ::luna_bind::BindResult<Self> {
                match <i64 as ::luna_bind::FromStack>::test_read(state, idx) {
                    #( Some(n) if n == #ident::#variants as i64 => Ok(#ident::#variants), )*
                    _ => Err(::luna_bind::__private::wrong_type::<Self>(state, idx)),
                }
            }
        }
    })
}
