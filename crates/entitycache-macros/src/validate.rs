//! Compile-time validation for the Entity derive macro.
//!
//! Every check pushes into a shared error list so that all problems are
//! reported at once rather than failing on the first.

use std::collections::HashMap;

use proc_macro2::Span;
use syn::Error;

use crate::parse::{EntityDef, FieldDef};

/// Validate a parsed entity definition.
pub fn validate_entity(entity: &EntityDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    // Struct-level validations
    validate_not_generic(entity, &mut errors);
    validate_table_name(&entity.table_name, entity.table_span, &mut errors);
    validate_has_columns(entity, &mut errors);

    // Field-level validations
    for field in &entity.fields {
        validate_field(field, &mut errors);
    }

    // Cross-field validations
    validate_identifier(entity, &mut errors);
    validate_single(entity, "version", |f| f.version, &mut errors);
    validate_single(entity, "parent", |f| f.parent, &mut errors);
    validate_no_duplicate_columns(entity, &mut errors);
    validate_no_duplicate_setters(entity, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

/// Static metadata cannot vary with type parameters.
fn validate_not_generic(entity: &EntityDef, errors: &mut Vec<Error>) {
    if !entity.generics.params.is_empty() {
        errors.push(Error::new_spanned(
            &entity.generics,
            "Entity cannot be derived for generic structs",
        ));
    }
}

/// Validate that the table name is a plain SQL identifier.
fn validate_table_name(table_name: &str, span: Span, errors: &mut Vec<Error>) {
    if table_name.trim().is_empty() {
        errors.push(Error::new(span, "table name cannot be empty or whitespace"));
        return;
    }

    if let Some(ch) = table_name
        .chars()
        .find(|c| !c.is_alphanumeric() && *c != '_')
    {
        errors.push(Error::new(
            span,
            format!(
                "table name contains invalid character '{ch}'; \
                 table names should only contain alphanumeric characters and underscores"
            ),
        ));
        return;
    }

    if let Some(first) = table_name.chars().next() {
        if !first.is_alphabetic() && first != '_' {
            errors.push(Error::new(
                span,
                format!("table name must start with a letter or underscore, got '{first}'"),
            ));
        }
    }
}

fn validate_has_columns(entity: &EntityDef, errors: &mut Vec<Error>) {
    if entity.column_fields().is_empty() && entity.parent_field().is_none() {
        errors.push(Error::new(
            entity.name.span(),
            "Entity struct must have at least one mapped field",
        ));
    }
}

/// Validate attribute combinations on one field.
fn validate_field(field: &FieldDef, errors: &mut Vec<Error>) {
    let span = field.name.span();

    if field.skip && (field.id || field.version || field.parent) {
        errors.push(Error::new(
            span,
            "a skipped field cannot be `id`, `version` or `parent`",
        ));
    }
    if field.parent && (field.id || field.version) {
        errors.push(Error::new(
            span,
            "a `parent` field cannot also be `id` or `version`",
        ));
    }
    if field.id && field.version {
        errors.push(Error::new(
            span,
            "a field cannot be both the identifier and the version",
        ));
    }
}

/// Exactly one identifier, unless it is inherited through a parent field.
fn validate_identifier(entity: &EntityDef, errors: &mut Vec<Error>) {
    let ids: Vec<&FieldDef> = entity.fields.iter().filter(|f| f.id).collect();
    match ids.len() {
        0 if entity.parent_field().is_some() => {}
        0 => errors.push(Error::new(
            entity.name.span(),
            "Entity requires exactly one `#[entity(id)]` field",
        )),
        1 => {
            if let Some(declared) = &entity.identifier {
                if *declared != ids[0].name.to_string() {
                    errors.push(Error::new(
                        ids[0].name.span(),
                        format!(
                            "struct-level identifier `{declared}` conflicts with `#[entity(id)]` on `{}`",
                            ids[0].name
                        ),
                    ));
                }
            }
        }
        _ => {
            for extra in &ids[1..] {
                errors.push(Error::new(
                    extra.name.span(),
                    "only one field may be marked `#[entity(id)]`",
                ));
            }
        }
    }
}

/// At most one field carries the flag selected by `pick`.
fn validate_single(
    entity: &EntityDef,
    what: &str,
    pick: impl Fn(&FieldDef) -> bool,
    errors: &mut Vec<Error>,
) {
    for extra in entity.fields.iter().filter(|f| pick(f)).skip(1) {
        errors.push(Error::new(
            extra.name.span(),
            format!("only one field may be marked `#[entity({what})]`"),
        ));
    }
}

/// Validate that no two mapped fields share a column name.
fn validate_no_duplicate_columns(entity: &EntityDef, errors: &mut Vec<Error>) {
    let mut seen: HashMap<&str, &FieldDef> = HashMap::new();
    for field in entity.column_fields() {
        if let Some(first) = seen.insert(field.column_name.as_str(), field) {
            errors.push(Error::new(
                field.name.span(),
                format!(
                    "column '{}' is already mapped by field `{}`",
                    field.column_name, first.name
                ),
            ));
        }
    }
}

/// Validate that no two fields share a setter name.
fn validate_no_duplicate_setters(entity: &EntityDef, errors: &mut Vec<Error>) {
    let mut seen: HashMap<&str, &FieldDef> = HashMap::new();
    for field in &entity.fields {
        let Some(setter) = field.setter.as_deref() else {
            continue;
        };
        if let Some(first) = seen.insert(setter, field) {
            errors.push(Error::new(
                field.name.span(),
                format!(
                    "setter `{setter}` is already declared by field `{}`",
                    first.name
                ),
            ));
        }
    }
}
