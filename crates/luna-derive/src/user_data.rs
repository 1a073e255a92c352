// #[derive(UserData)] implementation

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, GenericParam, LitStr, Result};

/// Expands `#[derive(UserData)]`.
///
/// Input:
/// ```ignore
/// #[derive(UserData)]
/// struct Counter { value: i32 }
/// ```
///
/// Output:
/// ```ignore
/// impl ::luna_bind::UserData for Counter {
///     fn type_name() -> &'static str { "Counter" }
/// }
/// ```
pub fn expand_user_data(input: DeriveInput) -> Result<TokenStream> {
    let ident = &input.ident;
    let name = script_name(&input)?.unwrap_or_else(|| ident.to_string());

    let mut generics = input.generics.clone();
    for param in &generics.params {
        if let GenericParam::Lifetime(lifetime) = param {
            return Err(syn::Error::new_spanned(
                lifetime,
                "UserData types are owned by the runtime and cannot borrow",
            ));
        }
    }
    // Payloads are stored as `dyn Any`
    for param in generics.type_params_mut() {
        param.bounds.push(syn::parse_quote!('static));
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::luna_bind::UserData for #ident #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #name
            }
        }
    })
}

/// Reads `#[luna(name = "...")]`.
fn script_name(input: &DeriveInput) -> Result<Option<String>> {
    let mut name = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("luna") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported luna attribute, expected `name`"))
            }
        })?;
    }
    Ok(name)
}
