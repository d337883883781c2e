//! # Accessor Derive
//!
//! Generates the read side and the builder side of plain configuration
//! structs so that machine setup reads as a chain of `with_*` calls and the
//! consuming code only ever sees getters.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive to generate, for each **named** field of type `Ty`:
///
/// - `const fn <field>(&self) -> Ty` — a by-value getter, and
/// - `const fn with_<field>(mut self, value: Ty) -> Self` — a builder step.
///
/// Getters return by value, so every non-skipped field type must be `Copy`.
///
/// - Skipping a field: `#[accessors(skip)]`
/// - Getter only (no builder): `#[accessors(readonly)]`
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Accessors;
///
/// #[derive(Clone, Copy, Accessors)]
/// struct Limits {
///     size: u32,
///     #[accessors(readonly)]
///     generation: u8,
/// }
///
/// let limits = Limits { size: 1, generation: 0 }.with_size(4096);
/// assert_eq!(limits.size(), 4096);
/// assert_eq!(limits.generation(), 0);
/// ```
///
/// Unknown options are rejected:
///
/// ```compile_fail
/// use utils_accessors_derive::Accessors;
///
/// #[derive(Clone, Copy, Accessors)]
/// struct Limits {
///     #[accessors(redonly)]
///     size: u32,
/// }
/// ```
#[proc_macro_derive(Accessors, attributes(accessors))]
pub fn derive_accessors(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            Fields::Unnamed(u) => {
                return syn::Error::new(u.span(), "Accessors only supports named fields")
                    .to_compile_error()
                    .into();
            }
            Fields::Unit => {
                return syn::Error::new(ident.span(), "Accessors does not apply to unit structs")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "Accessors can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        let options = match FieldOptions::parse(&field.attrs) {
            Ok(options) => options,
            Err(err) => return err.to_compile_error().into(),
        };
        if options.skip {
            continue;
        }

        let ty = &field.ty;
        methods.push(quote! {
            #[inline]
            #[must_use]
            pub const fn #fname(&self) -> #ty {
                self.#fname
            }
        });

        if options.readonly {
            continue;
        }

        let with_name = format_ident!("with_{}", fname);
        methods.push(quote! {
            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#fname = value;
                self
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    readonly: bool,
}

impl FieldOptions {
    /// Accepts `#[accessors(skip)]`, `#[accessors(readonly)]` and their
    /// `= true` / `= false` spellings.
    fn parse(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs {
            if !attr.path().is_ident("accessors") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                let flag = if meta.path.is_ident("skip") {
                    &mut options.skip
                } else if meta.path.is_ident("readonly") {
                    &mut options.readonly
                } else {
                    return Err(meta.error("unknown accessors option"));
                };

                if meta.input.is_empty() {
                    *flag = true;
                } else {
                    *flag = meta.value()?.parse::<LitBool>()?.value;
                }
                Ok(())
            })?;
        }
        Ok(options)
    }
}
