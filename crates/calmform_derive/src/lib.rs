use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, Type, parse_macro_input};

/// Key the form controller keeps for submit failures.
const RESERVED_KEY: &str = "_submit";

/// Generates a `<Model>Fields` accessor struct, one lens per named field and
/// the ordered key list used by the form controller.
#[proc_macro_derive(FormModel)]
pub fn derive_form_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct ModelField<'a> {
    ident: &'a Ident,
    ty: &'a Type,
    key: String,
    lens: Ident,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let model = &input.ident;
    let fields = model_fields(input)?;
    let root = calmform_path();
    let accessors = format_ident!("{model}Fields");

    let lenses = fields.iter().map(|field| {
        let ModelField { ident, ty, key, lens } = field;
        quote! {
            #[derive(Clone, Copy, Debug, Default)]
            pub struct #lens;

            impl #root::form::FieldLens<#model> for #lens {
                type Value = #ty;

                fn key(self) -> #root::form::FieldKey {
                    #root::form::FieldKey::new(#key)
                }

                fn get<'a>(self, model: &'a #model) -> &'a Self::Value {
                    &model.#ident
                }

                fn set(self, model: &mut #model, value: Self::Value) {
                    model.#ident = value;
                }
            }
        }
    });
    let getters = fields.iter().map(|ModelField { ident, lens, .. }| {
        quote! {
            pub const fn #ident(&self) -> #lens {
                #lens
            }
        }
    });
    let keys = fields
        .iter()
        .map(|ModelField { key, .. }| quote!(#root::form::FieldKey::new(#key)));

    Ok(quote! {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct #accessors;

        impl #accessors {
            #(#getters)*
        }

        impl #root::form::FormModel for #model {
            type Fields = #accessors;

            fn fields() -> Self::Fields {
                #accessors
            }

            fn field_keys() -> &'static [#root::form::FieldKey] {
                const KEYS: &[#root::form::FieldKey] = &[#(#keys),*];
                KEYS
            }
        }

        #(#lenses)*
    })
}

fn model_fields(input: &DeriveInput) -> syn::Result<Vec<ModelField<'_>>> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "FormModel cannot be derived for generic structs",
        ));
    }
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            Span::call_site(),
            "FormModel can only be derived for structs",
        ));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &data.fields,
            "FormModel requires named fields",
        ));
    };
    if named.named.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "FormModel requires at least one named field",
        ));
    }

    let mut fields = Vec::with_capacity(named.named.len());
    for field in &named.named {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let key = ident.to_string();
        if key == RESERVED_KEY {
            return Err(syn::Error::new_spanned(
                ident,
                "`_submit` is reserved for submit errors and cannot name a form field",
            ));
        }
        fields.push(ModelField {
            lens: format_ident!("{}{}Lens", input.ident, pascal_case(&key)),
            ident,
            ty: &field.ty,
            key,
        });
    }
    Ok(fields)
}

fn calmform_path() -> TokenStream2 {
    match crate_name("calmform") {
        Ok(FoundCrate::Itself) => quote!(crate),
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Err(_) => quote!(::calmform),
    }
}

fn pascal_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|segment| !segment.is_empty())
        .flat_map(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .map(|first| first.to_ascii_uppercase())
                .into_iter()
                .chain(chars)
        })
        .collect()
}
