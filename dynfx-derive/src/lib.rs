//! Derive macros for dynfx.
//!
//! - `#[derive(Attributes)]` - map a struct onto named per-particle attribute columns
//!
//! Supported field types are the ones with a `FromAttribute` impl:
//! `f32`, `i32`, `u32` and `Vec3`. A field is stored under its own name
//! unless renamed with `#[attribute(name = "...")]`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr};

/// Derive `dynfx::Attributes` for a struct with named fields.
///
/// # Example
///
/// ```ignore
/// #[derive(Attributes, Clone, Debug, PartialEq)]
/// struct Spark {
///     energy: f32,
///     #[attribute(name = "rgbPP")]
///     color: Vec3,
///     generation: u32,
/// }
/// ```
///
/// Generates a `SCHEMA` listing `("energy", Float)`, `("rgbPP", Vector)` and
/// `("generation", Int)`, plus conversions to and from attribute values.
///
/// # Panics
///
/// The macro panics at compile time if applied to an enum, a union or a
/// tuple struct.
#[proc_macro_derive(Attributes, attributes(attribute))]
pub fn derive_attributes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("Attributes derive only supports structs with named fields"),
        },
        _ => panic!("Attributes derive only supports structs"),
    };

    let mut schema = Vec::new();
    let mut to_values = Vec::new();
    let mut from_values = Vec::new();

    for field in fields {
        let ident = match &field.ident {
            Some(ident) => ident,
            None => continue,
        };
        let ty = &field.ty;
        let column = match column_name(field) {
            Ok(column) => column,
            Err(err) => return err.to_compile_error().into(),
        };

        schema.push(quote! {
            (#column, <#ty as ::dynfx::attributes::FromAttribute>::KIND)
        });
        to_values.push(quote! {
            (#column, ::dynfx::attributes::AttributeValue::from(self.#ident))
        });
        from_values.push(quote! {
            #ident: {
                let value = lookup(#column).ok_or_else(|| {
                    ::dynfx::error::DynamicsError::AttributeNotFound(::std::string::String::from(#column))
                })?;
                <#ty as ::dynfx::attributes::FromAttribute>::from_attribute(value, #column)?
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics ::dynfx::attributes::Attributes for #name #ty_generics #where_clause {
            const SCHEMA: &'static [(&'static str, ::dynfx::attributes::AttributeKind)] = &[
                #(#schema),*
            ];

            fn to_values(&self) -> ::std::vec::Vec<(&'static str, ::dynfx::attributes::AttributeValue)> {
                ::std::vec![#(#to_values),*]
            }

            fn from_values(
                lookup: &dyn Fn(&str) -> ::std::option::Option<::dynfx::attributes::AttributeValue>,
            ) -> ::dynfx::error::Result<Self> {
                ::std::result::Result::Ok(Self {
                    #(#from_values),*
                })
            }
        }
    };

    TokenStream::from(expanded)
}

/// Column name for a field: `#[attribute(name = "...")]` or the field name.
fn column_name(field: &syn::Field) -> syn::Result<LitStr> {
    let mut renamed = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("attribute") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("attribute name cannot be empty"));
                }
                renamed = Some(lit);
                Ok(())
            } else {
                Err(meta.error("unsupported attribute option, expected `name`"))
            }
        })?;
    }

    Ok(match renamed {
        Some(lit) => lit,
        None => {
            let ident = field
                .ident
                .as_ref()
                .ok_or_else(|| syn::Error::new(Span::call_site(), "field has no name"))?;
            LitStr::new(&ident.to_string(), ident.span())
        }
    })
}
