use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned,
};

/// Derives `cfmapper::Entity`: mapping metadata plus the raw accessor vtable.
///
/// ```ignore
/// #[derive(Debug, Default, Entity)]
/// #[entity(table = "users", read_consistency = "QUORUM")]
/// struct User {
///     #[id]
///     id: i64,
///     name: Option<String>,
///     #[column(lazy, name = "biography")]
///     bio: Option<String>,
///     #[column(counter)]
///     visits: Option<i64>,
///     #[column(join = "Tweet")]
///     favorite: Option<Uuid>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, id, partition_key, clustering_key, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct EntityOptions {
    table_name: Option<String>,
    read_consistency: Option<TokenStream2>,
    write_consistency: Option<TokenStream2>,
    insert_strategy: Option<TokenStream2>,
    validate: Option<Ident>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum KeyRole {
    Id,
    Partition,
    Clustering,
}

#[derive(Default)]
struct ColumnOptions {
    column_name: Option<String>,
    lazy: bool,
    counter: bool,
    join: Option<String>,
    read_consistency: Option<TokenStream2>,
    write_consistency: Option<TokenStream2>,
    skip: bool,
}

struct MappedField {
    ident: Ident,
    ty: Type,
    role: Option<KeyRole>,
    options: ColumnOptions,
}

#[derive(Clone, Copy)]
enum Shape {
    Simple,
    List,
    Set,
    Map,
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let entity_options = parse_entity_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires named fields",
            ));
        }
    };

    let mut fields = Vec::<MappedField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;
        let role = parse_key_role(&field.attrs)?;
        let options = parse_column_options(&field.attrs)?;
        if role.is_some() && (options.lazy || options.counter || options.join.is_some() || options.skip) {
            return Err(syn::Error::new(
                field.span(),
                "primary key fields cannot be lazy, counters, joins or skipped",
            ));
        }
        if options.skip {
            continue;
        }
        fields.push(MappedField {
            ident,
            ty: field.ty,
            role,
            options,
        });
    }

    let has_id = fields.iter().any(|f| f.role == Some(KeyRole::Id));
    let has_partition = fields.iter().any(|f| f.role == Some(KeyRole::Partition));
    if has_id && has_partition {
        return Err(syn::Error::new(
            struct_name.span(),
            "use either #[id] or #[partition_key]/#[clustering_key], not both",
        ));
    }
    if !has_id && !has_partition {
        return Err(syn::Error::new(
            struct_name.span(),
            "Entity requires an #[id] field or at least one #[partition_key] field",
        ));
    }

    let type_name = struct_name.to_string();
    let table_name = entity_options
        .table_name
        .clone()
        .unwrap_or_else(|| to_snake_case(&type_name));

    let mut builder_steps = Vec::<TokenStream2>::new();
    for field in &fields {
        builder_steps.push(builder_step(field)?);
    }
    if let Some(level) = &entity_options.read_consistency {
        builder_steps.push(quote! { .read_consistency(#level) });
    }
    if let Some(level) = &entity_options.write_consistency {
        builder_steps.push(quote! { .write_consistency(#level) });
    }
    if let Some(strategy) = &entity_options.insert_strategy {
        builder_steps.push(quote! { .insert_strategy(#strategy) });
    }

    let names = fields.iter().map(|f| f.ident.to_string()).collect::<Vec<_>>();
    let idents = fields.iter().map(|f| f.ident.clone()).collect::<Vec<_>>();
    let types = fields.iter().map(|f| f.ty.clone()).collect::<Vec<_>>();

    let validate_fn = entity_options.validate.as_ref().map(|method| {
        quote! {
            fn validate(&self) -> Vec<::cfmapper::ConstraintViolation> {
                self.#method()
            }
        }
    });

    let type_checks = format_ident!("__cfmapper_type_checks_{}", to_snake_case(&type_name));

    Ok(quote! {
        impl ::cfmapper::Entity for #struct_name {
            fn entity_meta() -> ::cfmapper::Result<::cfmapper::EntityMeta> {
                ::cfmapper::EntityMeta::builder(#type_name, #table_name)
                    #(#builder_steps)*
                    .build()
            }

            fn get_raw(&self, property: &str) -> ::cfmapper::Result<::cfmapper::Value> {
                Ok(match property {
                    #(#names => ::cfmapper::ColumnValue::to_value(&self.#idents),)*
                    other => return Err(::cfmapper::unknown_property(#type_name, other)),
                })
            }

            fn set_raw(
                &mut self,
                property: &str,
                value: ::cfmapper::Value,
            ) -> ::cfmapper::Result<()> {
                match property {
                    #(#names => self.#idents = ::cfmapper::ColumnValue::from_value(value)?,)*
                    other => return Err(::cfmapper::unknown_property(#type_name, other)),
                }
                Ok(())
            }

            #validate_fn
        }

        #[allow(non_snake_case, dead_code)]
        fn #type_checks() {
            fn assert_column_value<T: ::cfmapper::ColumnValue>() {}
            #(assert_column_value::<#types>();)*
        }
    })
}

fn builder_step(field: &MappedField) -> syn::Result<TokenStream2> {
    let name = field.ident.to_string();
    let options = &field.options;

    let mut spec = match field.role {
        Some(_) => quote! { ::cfmapper::PropertySpec::new(#name, ::cfmapper::PropertyKind::Simple) },
        None => {
            let kind = property_kind(field)?;
            quote! { ::cfmapper::PropertySpec::new(#name, ::cfmapper::PropertyKind::#kind) }
        }
    };
    if let Some(column) = &options.column_name {
        spec = quote! { #spec.column(#column) };
    }
    if let Some(level) = &options.read_consistency {
        spec = quote! { #spec.read_consistency(#level) };
    }
    if let Some(level) = &options.write_consistency {
        spec = quote! { #spec.write_consistency(#level) };
    }
    if let Some(target) = &options.join {
        spec = quote! { #spec.join_entity(#target) };
    }

    Ok(match field.role {
        Some(KeyRole::Id) => quote! { .id_spec(#spec) },
        Some(KeyRole::Partition) => quote! { .partition_key_spec(#spec) },
        Some(KeyRole::Clustering) => quote! { .clustering_key_spec(#spec) },
        None => quote! { .property_spec(#spec) },
    })
}

fn property_kind(field: &MappedField) -> syn::Result<Ident> {
    let options = &field.options;
    let span = field.ident.span();

    if options.counter {
        if options.lazy || options.join.is_some() {
            return Err(syn::Error::new(
                span,
                "#[column(counter)] cannot be combined with lazy or join",
            ));
        }
        return Ok(Ident::new("Counter", span));
    }

    let shape = field_shape(&field.ty);
    let prefix = if options.join.is_some() {
        "Join"
    } else if options.lazy {
        "Lazy"
    } else {
        ""
    };
    let suffix = match shape {
        Shape::Simple => "Simple",
        Shape::List => "List",
        Shape::Set => "Set",
        Shape::Map => "Map",
    };
    Ok(format_ident!("{}{}", prefix, suffix, span = span))
}

fn field_shape(ty: &Type) -> Shape {
    let inner = option_inner_type(ty).unwrap_or_else(|| ty.clone());
    let Type::Path(type_path) = &inner else {
        return Shape::Simple;
    };
    let Some(segment) = type_path.path.segments.last() else {
        return Shape::Simple;
    };
    match segment.ident.to_string().as_str() {
        "Vec" | "VecDeque" => Shape::List,
        "BTreeSet" | "HashSet" => Shape::Set,
        "BTreeMap" | "HashMap" => Shape::Map,
        _ => Shape::Simple,
    }
}

fn option_inner_type(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    first_generic_type(segment)
}

fn first_generic_type(segment: &syn::PathSegment) -> Option<Type> {
    let syn::PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };

    for arg in &arguments.args {
        if let syn::GenericArgument::Type(ty) = arg {
            return Some(ty.clone());
        }
    }
    None
}

fn parse_key_role(attrs: &[syn::Attribute]) -> syn::Result<Option<KeyRole>> {
    let mut role = None;
    for attr in attrs {
        let found = if attr.path().is_ident("id") {
            KeyRole::Id
        } else if attr.path().is_ident("partition_key") {
            KeyRole::Partition
        } else if attr.path().is_ident("clustering_key") {
            KeyRole::Clustering
        } else {
            continue;
        };
        if !matches!(attr.meta, syn::Meta::Path(_)) {
            return Err(syn::Error::new(
                attr.span(),
                "key markers take no arguments, use #[column(name = \"...\")] to rename",
            ));
        }
        if role.is_some() {
            return Err(syn::Error::new(
                attr.span(),
                "a field can carry only one of #[id], #[partition_key], #[clustering_key]",
            ));
        }
        role = Some(found);
    }
    Ok(role)
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let lit: LitStr = meta.value()?.parse()?;
                options.table_name = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("read_consistency") {
                let lit: LitStr = meta.value()?.parse()?;
                options.read_consistency = Some(consistency_tokens(&lit)?);
                return Ok(());
            }

            if meta.path.is_ident("write_consistency") {
                let lit: LitStr = meta.value()?.parse()?;
                options.write_consistency = Some(consistency_tokens(&lit)?);
                return Ok(());
            }

            if meta.path.is_ident("insert_strategy") {
                let lit: LitStr = meta.value()?.parse()?;
                let variant = match lit.value().to_ascii_uppercase().as_str() {
                    "ALL_FIELDS" => quote!(AllFields),
                    "NOT_NULL_FIELDS" => quote!(NotNullFields),
                    other => {
                        return Err(syn::Error::new(
                            lit.span(),
                            format!(
                                "unknown insert strategy '{}', expected ALL_FIELDS or NOT_NULL_FIELDS",
                                other
                            ),
                        ));
                    }
                };
                options.insert_strategy = Some(quote!(::cfmapper::InsertStrategy::#variant));
                return Ok(());
            }

            if meta.path.is_ident("validate") {
                let lit: LitStr = meta.value()?.parse()?;
                options.validate = Some(lit.parse::<Ident>()?);
                return Ok(());
            }

            Err(meta.error(
                "Unsupported entity attribute. Supported: table = \"...\", read_consistency = \"...\", \
                 write_consistency = \"...\", insert_strategy = \"...\", validate = \"method\"",
            ))
        })?;
    }

    Ok(options)
}

fn parse_column_options(attrs: &[syn::Attribute]) -> syn::Result<ColumnOptions> {
    let mut options = ColumnOptions::default();
    let mut seen = false;

    for attr in attrs {
        if !attr.path().is_ident("column") {
            continue;
        }

        if seen {
            return Err(syn::Error::new(
                attr.span(),
                "Duplicate #[column(...)] attribute on field",
            ));
        }
        seen = true;

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("lazy") {
                options.lazy = true;
                return Ok(());
            }

            if meta.path.is_ident("counter") {
                options.counter = true;
                return Ok(());
            }

            if meta.path.is_ident("skip") {
                options.skip = true;
                return Ok(());
            }

            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                options.column_name = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("join") {
                let lit: LitStr = meta.value()?.parse()?;
                options.join = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("read_consistency") {
                let lit: LitStr = meta.value()?.parse()?;
                options.read_consistency = Some(consistency_tokens(&lit)?);
                return Ok(());
            }

            if meta.path.is_ident("write_consistency") {
                let lit: LitStr = meta.value()?.parse()?;
                options.write_consistency = Some(consistency_tokens(&lit)?);
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[column(...)] option. Supported: name = \"...\", lazy, counter, \
                 join = \"Type\", read_consistency = \"...\", write_consistency = \"...\", skip",
            ))
        })?;
    }

    if options.skip
        && (options.lazy || options.counter || options.join.is_some() || options.column_name.is_some())
    {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[column(skip)] cannot be combined with other column options",
        ));
    }

    Ok(options)
}

fn consistency_tokens(lit: &LitStr) -> syn::Result<TokenStream2> {
    let variant = match lit.value().trim().to_ascii_uppercase().as_str() {
        "ANY" => quote!(Any),
        "ONE" => quote!(One),
        "TWO" => quote!(Two),
        "THREE" => quote!(Three),
        "QUORUM" => quote!(Quorum),
        "ALL" => quote!(All),
        "LOCAL_ONE" => quote!(LocalOne),
        "LOCAL_QUORUM" => quote!(LocalQuorum),
        "EACH_QUORUM" => quote!(EachQuorum),
        "SERIAL" => quote!(Serial),
        "LOCAL_SERIAL" => quote!(LocalSerial),
        other => {
            return Err(syn::Error::new(
                lit.span(),
                format!("unknown consistency level '{}'", other),
            ));
        }
    };
    Ok(quote!(::cfmapper::ConsistencyLevel::#variant))
}

fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (index, ch) in input.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_table_names() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("TweetLine"), "tweet_line");
    }

    #[test]
    fn test_shape_unwraps_option() {
        let ty: Type = syn::parse_quote!(Option<Vec<String>>);
        assert!(matches!(field_shape(&ty), Shape::List));
        let ty: Type = syn::parse_quote!(std::collections::BTreeMap<i64, String>);
        assert!(matches!(field_shape(&ty), Shape::Map));
        let ty: Type = syn::parse_quote!(Option<String>);
        assert!(matches!(field_shape(&ty), Shape::Simple));
    }

    #[test]
    fn test_unknown_consistency_is_rejected() {
        let lit = LitStr::new("SOMETIMES", proc_macro2::Span::call_site());
        assert!(consistency_tokens(&lit).is_err());
    }
}
