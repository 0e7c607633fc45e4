//! `#[derive(Entity)]` for Pivotal.
//!
//! The struct holds a single `Record<Self>` field; columns and relations are
//! declared with attributes:
//!
//! ```ignore
//! #[derive(Entity)]
//! #[entity(table = "posts", validators = post_rules)]
//! #[fields(title: String, views: i64)]
//! #[one_to_many(Comment)]
//! #[many_to_many(Tag, name = "labels")]
//! #[one_to_one(Author, column = "author_id")]
//! pub struct Post {
//!     record: Record<Post>,
//! }
//! ```
//!
//! Each field gets a typed getter and `set_*` setter, each collection a
//! `name()`/`name_mut()` pair, and each one-to-one target `name()`/`set_name()`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, Ident, Type};

mod attrs;

use attrs::{FieldDecl, RelationDecl, RelationKind};

#[proc_macro_derive(Entity, attributes(entity, fields, one_to_one, one_to_many, many_to_many))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match derive_entity_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}


fn derive_entity_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let record = record_field(input)?;
    let args = attrs::entity_args(&input.attrs)?;
    let fields = attrs::field_decls(&input.attrs)?;
    let relations = attrs::relation_decls(&input.attrs)?;
    check_names(&fields, &relations)?;

    let ident = &input.ident;
    let name = args
        .name
        .map(|lit| lit.value())
        .unwrap_or_else(|| ident.to_string());
    let table = match &args.table {
        Some(table) => quote! { ::core::option::Option::Some(#table) },
        None => quote! { ::core::option::Option::None },
    };
    let columns = fields.iter().map(|f| f.ident.to_string());
    let relation_ctors = relations.iter().map(relation_ctor);
    let validators = args.validators.as_ref().map(|path| {
        quote! {
            fn validators() -> ::pivotal::Validators {
                #path()
            }
        }
    });
    let filters = args.filters.as_ref().map(|path| {
        quote! {
            fn filters() -> ::pivotal::Filters {
                #path()
            }
        }
    });

    let field_accessors = fields.iter().map(|f| field_accessors(&record, f));
    let relation_accessors = relations
        .iter()
        .map(|r| relation_accessors(&record, r))
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::pivotal::Entity for #ident {
            const NAME: &'static str = #name;

            fn table() -> ::core::option::Option<&'static str> {
                #table
            }

            fn fields() -> ::std::vec::Vec<::pivotal::Field> {
                ::std::vec![#(::pivotal::Field::new(#columns)),*]
            }

            fn relations() -> ::std::vec::Vec<::pivotal::Relation> {
                ::std::vec![#(#relation_ctors),*]
            }

            #validators
            #filters

            fn record(&self) -> &::pivotal::Record<Self> {
                &self.#record
            }

            fn record_mut(&mut self) -> &mut ::pivotal::Record<Self> {
                &mut self.#record
            }

            fn from_record(record: ::pivotal::Record<Self>) -> Self {
                Self { #record: record }
            }
        }

        impl #ident {
            #(#field_accessors)*
            #(#relation_accessors)*
        }
    })
}

/// The ident of the struct's only field, which must be a `Record<_>`.
fn record_field(input: &DeriveInput) -> syn::Result<Ident> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Entity derive only supports structs",
        ));
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Entity derive does not support generic structs",
        ));
    }
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &data.fields,
            "Entity derive requires named fields",
        ));
    };
    let mut iter = named.named.iter();
    match (iter.next(), iter.next()) {
        (Some(field), None) if is_record(&field.ty) => Ok(field
            .ident
            .clone()
            .unwrap_or_else(|| format_ident!("record"))),
        _ => Err(syn::Error::new_spanned(
            &named.named,
            "Entity derive expects a single `Record<Self>` field",
        )),
    }
}

fn is_record(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|s| s.ident == "Record"),
        _ => false,
    }
}

fn check_names(fields: &[FieldDecl], relations: &[RelationDecl]) -> syn::Result<()> {
    let mut keys: Vec<String> = Vec::with_capacity(relations.len());
    for relation in relations {
        let key = relation.key();
        if keys.contains(&key) {
            return Err(syn::Error::new_spanned(
                &relation.target,
                format!("relation `{}` declared twice", key),
            ));
        }
        keys.push(key);
    }
    for field in fields {
        let name = field.ident.to_string();
        if keys.contains(&name) {
            return Err(syn::Error::new(
                field.ident.span(),
                format!("field `{}` shadows relation `{}`", name, name),
            ));
        }
    }
    Ok(())
}

fn relation_ctor(relation: &RelationDecl) -> TokenStream2 {
    let target = &relation.target;
    let ctor = match relation.kind {
        RelationKind::OneToOne => quote! { one_to_one },
        RelationKind::OneToMany => quote! { one_to_many },
        RelationKind::ManyToMany => quote! { many_to_many },
    };
    let key = relation.key();
    let parent = relation
        .parent
        .as_ref()
        .map(|column| quote! { .parent_column(#column) });
    let child = relation
        .child
        .as_ref()
        .map(|column| quote! { .child_column(#column) });
    quote! {
        ::pivotal::Relation::#ctor::<#target>().named(#key) #parent #child
    }
}

fn field_accessors(record: &Ident, field: &FieldDecl) -> TokenStream2 {
    let getter = &field.ident;
    let setter = format_ident!("set_{}", field.ident);
    let column = field.ident.to_string();
    let ty = &field.ty;
    quote! {
        pub fn #getter(&self) -> ::core::option::Option<#ty> {
            self.#record.get_as::<#ty>(#column)
        }

        /// Returns false when the value is rejected by the field's validators.
        pub fn #setter(&mut self, value: impl ::core::convert::Into<#ty>) -> bool {
            self.#record.set(#column, ::pivotal::Value::from(value.into()))
        }
    }
}

fn relation_accessors(record: &Ident, relation: &RelationDecl) -> syn::Result<TokenStream2> {
    let getter = relation.key_ident()?;
    let key = relation.key();
    let target = &relation.target;
    Ok(match relation.kind {
        RelationKind::OneToOne => {
            let setter = format_ident!("set_{}", getter);
            quote! {
                pub fn #getter(&self) -> ::core::option::Option<&#target> {
                    self.#record.related::<#target>(#key)
                }

                pub fn #setter(&mut self, value: #target) -> bool {
                    self.#record.set_related::<#target>(#key, value)
                }
            }
        }
        RelationKind::OneToMany | RelationKind::ManyToMany => {
            let getter_mut = format_ident!("{}_mut", getter);
            quote! {
                pub fn #getter(&self) -> &::pivotal::LazyAssociation {
                    self.#record.many(#key)
                }

                pub fn #getter_mut(&mut self) -> &mut ::pivotal::LazyAssociation {
                    self.#record.many_mut(#key)
                }
            }
        }
    })
}
