//! Procedural macros for entitycache.
//!
//! `entitycache-macros` is the **compile-time codegen layer**. It turns plain
//! structs into trackable entities by generating static metadata, the
//! read-only field accessor and a typed mutator trait for the tracking proxy.
//!
//! These macros are used by application crates via the `entitycache` facade.

use proc_macro::TokenStream;
use quote::{format_ident, quote};

mod parse;
mod validate;

use parse::{EntityDef, FieldDef, parse_entity};

/// Derive macro for the `Entity` trait.
///
/// This macro generates:
/// - an `entitycache_core::Entity` implementation with static
///   `EntityMetadata` and a `field_value` accessor
/// - `entitycache_core::Embeds` impls for the struct itself and for its
///   `parent` field, if any
/// - a `<Name>Mutators` trait, one method per setter, each running through
///   the proxy's change tracking. It is implemented for
///   `entitycache_session::Tracked<T>` of every `T` embedding `Name`, so a
///   child's proxy also carries its parent's mutators
///
/// # Attributes
///
/// Struct level:
/// - `#[entity(table = "name")]` - Override table name (defaults to snake_case struct name)
/// - `#[entity(identifier = "field")]` - Name the identifier inherited from a parent
///
/// Field level:
/// - `#[entity(id)]` - The identifier field
/// - `#[entity(version)]` - The optimistic-locking version field
/// - `#[entity(column = "name")]` - Override column name
/// - `#[entity(setter = "name")]` - Override mutator name (default `set_<field>`)
/// - `#[entity(no_setter)]` - Generate no mutator for this field
/// - `#[entity(readonly)]` - Mutator calls fail with `NotUpdatable`
/// - `#[entity(nullable)]` - Mark nullable (inferred for `Option<T>`)
/// - `#[entity(skip)]` - Not a column
/// - `#[entity(parent)]` - Embedded parent entity (two-table inheritance)
///
/// The struct must be `Clone` for its mutators to be callable. Field types
/// must be `Clone` and convertible into `Value`.
///
/// # Example
///
/// ```ignore
/// use entitycache::prelude::*;
///
/// #[derive(Entity, Debug, Clone)]
/// #[entity(table = "orders")]
/// struct Order {
///     #[entity(id, readonly)]
///     id: i64,
///     #[entity(version, no_setter)]
///     ver: i32,
///     total: i64,
/// }
///
/// let order = cache.register_by_identifier(Order { id: 7, ver: 1, total: 100 })?;
/// order.set_total(150)?;
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_entity(&entity) {
        return e.to_compile_error().into();
    }

    let entity_impl = generate_entity_impl(&entity);
    let embeds = generate_embeds(&entity);
    let mutators = generate_mutators(&entity);
    quote! {
        #entity_impl
        #embeds
        #mutators
    }
    .into()
}

/// Generate the `Entity` trait implementation.
fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let name_str = name.to_string();
    let table_name = &entity.table_name;
    let identifier = entity.identifier_name();
    let columns = entity.column_fields();

    let field_infos = columns.iter().map(|f| field_info_tokens(f));

    let version_ts = match entity.version_field() {
        Some(f) => {
            let version = f.name.to_string();
            quote! { .version(#version) }
        }
        None => quote! {},
    };

    let parent_ts = match entity.parent_field() {
        Some(f) => {
            let ty = &f.ty;
            quote! { .parent(<#ty as entitycache_core::Entity>::metadata) }
        }
        None => quote! {},
    };

    let value_arms = columns.iter().map(|f| {
        let field_name = &f.name;
        let key = field_name.to_string();
        quote! {
            #key => ::core::option::Option::Some(entitycache_core::Value::from(
                ::core::clone::Clone::clone(&self.#field_name),
            )),
        }
    });

    let fallback_arm = match entity.parent_field() {
        Some(f) => {
            let parent = &f.name;
            quote! { other => entitycache_core::Entity::field_value(&self.#parent, other), }
        }
        None => quote! { _ => ::core::option::Option::None, },
    };

    quote! {
        impl entitycache_core::Entity for #name {
            fn metadata() -> &'static entitycache_core::EntityMetadata {
                static FIELDS: &[entitycache_core::FieldInfo] = &[
                    #(#field_infos),*
                ];
                static METADATA: entitycache_core::EntityMetadata =
                    entitycache_core::EntityMetadata::new(#name_str, #table_name, #identifier, FIELDS)
                        #version_ts
                        #parent_ts;
                &METADATA
            }

            fn field_value(&self, field: &str) -> ::core::option::Option<entitycache_core::Value> {
                match field {
                    #(#value_arms)*
                    #fallback_arm
                }
            }
        }
    }
}

/// Generate the `FieldInfo` constructor for one column.
fn field_info_tokens(field: &FieldDef) -> proc_macro2::TokenStream {
    let name = field.name.to_string();
    let column = &field.column_name;
    let nullable = field.nullable;
    let updatable = !field.readonly;
    let setter_ts = match &field.setter {
        Some(setter) => quote! { .setter(#setter) },
        None => quote! {},
    };

    quote! {
        entitycache_core::FieldInfo::new(#name, #column)
            #setter_ts
            .updatable(#updatable)
            .nullable(#nullable)
    }
}

/// Generate the `Embeds` impls: the entity embeds itself and, when it has a
/// `parent` field, its parent.
fn generate_embeds(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let parent_ts = match entity.parent_field() {
        Some(f) => {
            let parent = &f.name;
            let ty = &f.ty;
            quote! {
                impl entitycache_core::Embeds<#ty> for #name {
                    fn embedded(&self) -> &#ty {
                        &self.#parent
                    }

                    fn embedded_mut(&mut self) -> &mut #ty {
                        &mut self.#parent
                    }
                }
            }
        }
        None => quote! {},
    };

    quote! {
        impl entitycache_core::Embeds<#name> for #name {
            fn embedded(&self) -> &#name {
                self
            }

            fn embedded_mut(&mut self) -> &mut #name {
                self
            }
        }

        #parent_ts
    }
}

/// Generate the `<Name>Mutators` trait.
///
/// The trait is implemented for every `Tracked<T>` whose entity embeds
/// `Name`, so a child's proxy exposes its parent's mutators. Each call
/// resolves through the proxy's own dispatch table.
fn generate_mutators(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let vis = &entity.vis;
    let trait_name = format_ident!("{}Mutators", name);
    let doc = format!("Change-tracked mutators of [`{name}`].");

    let with_setter: Vec<(&FieldDef, &String)> = entity
        .column_fields()
        .into_iter()
        .filter_map(|f| f.setter.as_ref().map(|s| (f, s)))
        .collect();

    let signatures = with_setter.iter().map(|(f, setter)| {
        let method = format_ident!("{}", setter);
        let ty = &f.ty;
        let doc = format!("Set `{}` through change tracking.", f.name);
        quote! {
            #[doc = #doc]
            fn #method(&self, value: #ty) -> ::core::result::Result<(), entitycache_session::CacheError>;
        }
    });

    let bodies = with_setter.iter().map(|(f, setter)| {
        let method = format_ident!("{}", setter);
        let field_name = &f.name;
        let ty = &f.ty;
        quote! {
            fn #method(&self, value: #ty) -> ::core::result::Result<(), entitycache_session::CacheError> {
                self.invoke(
                    entitycache_session::MutatorId::new(#setter),
                    move |entity| {
                        entitycache_core::Embeds::<#name>::embedded_mut(entity).#field_name = value;
                    },
                )
            }
        }
    });

    quote! {
        #[doc = #doc]
        #vis trait #trait_name {
            #(#signatures)*
        }

        impl<T> #trait_name for entitycache_session::Tracked<T>
        where
            T: entitycache_core::Embeds<#name> + ::core::clone::Clone,
        {
            #(#bodies)*
        }
    }
}
