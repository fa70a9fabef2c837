use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    ext::IdentExt, meta::ParseNestedMeta, parse::Parse, punctuated::Punctuated, Attribute, Data,
    DeriveInput, Fields, Ident, LitStr, Token,
};

pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Struct-level `#[document(...)]` options.
#[derive(Default)]
struct ModelOptions {
    collection: Option<String>,
    name: Option<String>,
    timestamps: bool,
    defaults: bool,
    sortable: Option<Vec<LitStr>>,
    default_sort: Option<LitStr>,
}

struct FieldInfo {
    ident: Ident,
    /// Key the field serializes under.
    serde_name: String,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let options = model_options(input)?;
    let rename_all = serde_value(&input.attrs, "rename_all")?;

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Document derive: only structs with named fields are supported",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Document derive: only structs are supported",
            ))
        }
    };

    let mut fields = Vec::new();
    let mut marked_id = None;
    for field in named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let serde_name = match serde_value(&field.attrs, "rename")? {
            Some(rename) => rename.value(),
            None => match &rename_all {
                Some(rule) => apply_rename_rule(rule, &ident.unraw().to_string())?,
                None => ident.unraw().to_string(),
            },
        };
        if is_marked_id(&field.attrs)? {
            if marked_id.is_some() {
                return Err(syn::Error::new_spanned(
                    &ident,
                    "Document derive: more than one field marked with #[document(id)]",
                ));
            }
            marked_id = Some(fields.len());
        }
        fields.push(FieldInfo { ident, serde_name });
    }

    // Default: a field named `id`
    let id_index = marked_id
        .or_else(|| fields.iter().position(|field| field.ident == "id"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                name,
                "Document derive: no field marked with #[document(id)] and no field named `id`",
            )
        })?;
    let id_field = &fields[id_index].ident;
    let id_key = &fields[id_index].serde_name;

    let model_name = options
        .name
        .clone()
        .unwrap_or_else(|| name.unraw().to_string());
    let collection = options
        .collection
        .clone()
        .unwrap_or_else(|| format!("{}s", to_snake_case(&name.unraw().to_string())));
    let timestamps = options.timestamps;

    let aliases = fields
        .iter()
        .enumerate()
        .filter(|(index, field)| *index != id_index && field.ident.unraw() != field.serde_name)
        .map(|(_, field)| {
            let from = field.ident.unraw().to_string();
            let to = &field.serde_name;
            quote! { (#from, #to) }
        });

    let defaults_fn = if options.defaults {
        quote! {
            fn defaults() -> ::core::option::Option<Self> {
                ::core::option::Option::Some(<Self as ::core::default::Default>::default())
            }
        }
    } else {
        quote! {}
    };

    let mut expanded = quote! {
        impl #impl_generics ::docbase::Document for #name #ty_generics #where_clause {
            const NAME: &'static str = #model_name;
            const COLLECTION: &'static str = #collection;
            const TIMESTAMPS: bool = #timestamps;
            const ID_KEY: &'static str = #id_key;

            fn id(&self) -> ::core::option::Option<::docbase::ObjectId> {
                self.#id_field
            }

            fn set_id(&mut self, id: ::docbase::ObjectId) {
                self.#id_field = ::core::option::Option::Some(id);
            }

            fn field_aliases() -> &'static [(&'static str, &'static str)] {
                &[#(#aliases),*]
            }

            #defaults_fn
        }
    };

    if timestamps {
        for required in ["created_at", "updated_at"] {
            if !fields.iter().any(|field| field.ident == required) {
                return Err(syn::Error::new_spanned(
                    name,
                    format!("Document derive: `timestamps` needs a `{required}` field"),
                ));
            }
        }
        expanded.extend(quote! {
            impl #impl_generics ::docbase::Timestamped for #name #ty_generics #where_clause {
                fn created_at(&self) -> ::core::option::Option<::docbase::bson::DateTime> {
                    self.created_at
                        .or_else(|| self.#id_field.map(|id| id.timestamp()))
                }

                fn updated_at(&self) -> ::core::option::Option<::docbase::bson::DateTime> {
                    self.updated_at
                }

                fn set_updated_at(&mut self, at: ::docbase::bson::DateTime) {
                    self.updated_at = ::core::option::Option::Some(at);
                }
            }
        });
    }

    match (&options.sortable, &options.default_sort) {
        (Some(sortable), default_sort) => {
            let default_sort_fn = match default_sort {
                Some(default_sort) => {
                    let keys = parse_default_sort(default_sort, &fields[id_index])?;
                    let keys = keys.iter().map(|(field, descending)| {
                        let direction = if *descending {
                            quote! { ::docbase::Direction::Descending }
                        } else {
                            quote! { ::docbase::Direction::Ascending }
                        };
                        quote! { (#field, #direction) }
                    });
                    quote! {
                        fn default_sort() -> &'static [(&'static str, ::docbase::Direction)] {
                            &[#(#keys),*]
                        }
                    }
                }
                None => quote! {},
            };
            expanded.extend(quote! {
                impl #impl_generics ::docbase::Sortable for #name #ty_generics #where_clause {
                    fn sortable_fields() -> &'static [&'static str] {
                        &[#(#sortable),*]
                    }

                    #default_sort_fn
                }
            });
        }
        (None, Some(default_sort)) => {
            return Err(syn::Error::new_spanned(
                default_sort,
                "Document derive: `default_sort` needs `sortable(...)`",
            ))
        }
        (None, None) => {}
    }

    Ok(expanded)
}

fn model_options(input: &DeriveInput) -> syn::Result<ModelOptions> {
    let mut options = ModelOptions::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("document") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                options.collection = Some(value.value());
            } else if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                options.name = Some(value.value());
            } else if meta.path.is_ident("timestamps") {
                options.timestamps = true;
            } else if meta.path.is_ident("defaults") {
                options.defaults = true;
            } else if meta.path.is_ident("sortable") {
                let content;
                syn::parenthesized!(content in meta.input);
                let fields: Punctuated<LitStr, Token![,]> =
                    content.parse_terminated(<LitStr as Parse>::parse, Token![,])?;
                options.sortable = Some(fields.into_iter().collect());
            } else if meta.path.is_ident("default_sort") {
                options.default_sort = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error("unsupported document attribute"));
            }
            Ok(())
        })?;
    }
    Ok(options)
}

fn is_marked_id(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut is_id = false;
    for attr in attrs {
        if !attr.path().is_ident("document") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                is_id = true;
                Ok(())
            } else {
                Err(meta.error("unsupported document field attribute"))
            }
        })?;
    }
    Ok(is_id)
}

/// Read `key = "..."` (or the `serialize` half of `key(...)`) from
/// `#[serde(...)]`, skipping every other serde option.
fn serde_value(attrs: &[Attribute], key: &str) -> syn::Result<Option<LitStr>> {
    let mut found = None;
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if !meta.path.is_ident(key) {
                return skip_meta(&meta);
            }
            if meta.input.peek(Token![=]) {
                found = Some(meta.value()?.parse()?);
                return Ok(());
            }
            meta.parse_nested_meta(|inner| {
                if inner.path.is_ident("serialize") {
                    found = Some(inner.value()?.parse()?);
                    Ok(())
                } else {
                    skip_meta(&inner)
                }
            })
        })?;
    }
    Ok(found)
}

fn skip_meta(meta: &ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|inner| skip_meta(&inner))?;
    }
    Ok(())
}

/// `"-a, b"` into `[("a", true), ("b", false)]`; the identifier field
/// resolves to `_id`.
fn parse_default_sort(value: &LitStr, id: &FieldInfo) -> syn::Result<Vec<(String, bool)>> {
    let mut keys = Vec::new();
    for segment in value.value().split(',').map(str::trim) {
        if segment.is_empty() {
            continue;
        }
        let (field, descending) = match segment.strip_prefix('-') {
            Some(field) => (field.trim(), true),
            None => (segment, false),
        };
        if field.is_empty() {
            return Err(syn::Error::new_spanned(value, "empty field in `default_sort`"));
        }
        let field = if field == "id" || field == id.serde_name || id.ident.unraw() == field {
            "_id"
        } else {
            field
        };
        keys.push((field.to_string(), descending));
    }
    if keys.is_empty() {
        return Err(syn::Error::new_spanned(value, "`default_sort` names no field"));
    }
    Ok(keys)
}

fn apply_rename_rule(rule: &LitStr, field: &str) -> syn::Result<String> {
    let pascal = || {
        field
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<String>()
    };
    let renamed = match rule.value().as_str() {
        "lowercase" | "snake_case" => field.to_ascii_lowercase(),
        "UPPERCASE" | "SCREAMING_SNAKE_CASE" => field.to_ascii_uppercase(),
        "PascalCase" => pascal(),
        "camelCase" => {
            let pascal = pascal();
            let mut chars = pascal.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        "kebab-case" => field.replace('_', "-"),
        "SCREAMING-KEBAB-CASE" => field.replace('_', "-").to_ascii_uppercase(),
        other => {
            return Err(syn::Error::new_spanned(
                rule,
                format!("unsupported rename_all rule `{other}`"),
            ))
        }
    };
    Ok(renamed)
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
