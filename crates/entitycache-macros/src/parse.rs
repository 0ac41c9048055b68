//! Parsing logic for the Entity derive macro.
//!
//! This module extracts struct-level and field-level `#[entity(...)]`
//! attributes from the derive input to build the `EntityDef` and `FieldDef`
//! structures used for code generation.

use proc_macro2::Span;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, Generics, Ident, Lit, Result, Type,
    Visibility,
};

/// Parsed entity definition from a struct with `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityDef {
    /// The struct name (e.g., `Order`).
    pub name: Ident,
    /// Visibility of the struct, reused for the generated mutator trait.
    pub vis: Visibility,
    /// The SQL table name (e.g., `"orders"`).
    pub table_name: String,
    /// Span of the table name for error reporting.
    pub table_span: Span,
    /// Identifier field name declared at struct level for inherited identifiers.
    pub identifier: Option<String>,
    /// Parsed field definitions.
    pub fields: Vec<FieldDef>,
    /// Generic parameters from the struct.
    pub generics: Generics,
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name (e.g., `total`).
    pub name: Ident,
    /// The SQL column name.
    pub column_name: String,
    /// The Rust type of the field.
    pub ty: Type,
    /// Mutator name, `None` when the field has no setter.
    pub setter: Option<String>,
    /// Whether the field holds the identifier.
    pub id: bool,
    /// Whether the field holds the optimistic-locking version.
    pub version: bool,
    /// Whether writes through the proxy are rejected.
    pub readonly: bool,
    /// Whether the field allows NULL values.
    pub nullable: bool,
    /// Not a column at all.
    pub skip: bool,
    /// Embedded parent entity (two-table inheritance).
    pub parent: bool,
}

impl EntityDef {
    /// Fields mapped to columns of this entity's own table.
    pub fn column_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.is_column()).collect()
    }

    /// The embedded parent field, if any.
    pub fn parent_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.parent)
    }

    /// The identifier field declared on this struct, if any.
    pub fn id_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id)
    }

    /// The version field declared on this struct, if any.
    pub fn version_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.version)
    }

    /// Name of the identifier field, own or inherited.
    pub fn identifier_name(&self) -> String {
        self.id_field()
            .map(|f| f.name.to_string())
            .or_else(|| self.identifier.clone())
            .unwrap_or_else(|| "id".to_string())
    }
}

impl FieldDef {
    /// Whether the field maps to a column of the entity's own table.
    pub fn is_column(&self) -> bool {
        !self.skip && !self.parent
    }
}

/// Parse a `DeriveInput` into an `EntityDef`.
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let name = input.ident.clone();
    let StructAttrs {
        table_name,
        table_span,
        identifier,
    } = parse_struct_attrs(&input.attrs, &name)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    Ok(EntityDef {
        name,
        vis: input.vis.clone(),
        table_name,
        table_span,
        identifier,
        fields,
        generics: input.generics.clone(),
    })
}

/// Parsed struct-level attributes result.
struct StructAttrs {
    table_name: String,
    table_span: Span,
    identifier: Option<String>,
}

/// Parse struct-level `#[entity(...)]` attributes.
///
/// Supported keys:
/// - `table = "name"` (overrides the snake_case struct name)
/// - `identifier = "field"` (identifier inherited from the parent)
fn parse_struct_attrs(attrs: &[Attribute], struct_name: &Ident) -> Result<StructAttrs> {
    let mut table_name: Option<(String, Span)> = None;
    let mut identifier: Option<String> = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table_name.is_some() {
                    return Err(Error::new_spanned(
                        &meta.path,
                        "duplicate entity attribute: table",
                    ));
                }
                let value = string_value(&meta, "table")?;
                table_name = Some(value);
            } else if meta.path.is_ident("identifier") {
                let (value, _) = string_value(&meta, "identifier")?;
                identifier = Some(value);
            } else {
                return Err(meta.error(
                    "unknown entity attribute; expected `table` or `identifier`",
                ));
            }
            Ok(())
        })?;
    }

    let (table_name, table_span) = table_name
        .unwrap_or_else(|| (to_snake_case(&struct_name.to_string()), struct_name.span()));

    Ok(StructAttrs {
        table_name,
        table_span,
        identifier,
    })
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>, key: &str) -> Result<(String, Span)> {
    let value: Lit = meta.value()?.parse()?;
    if let Lit::Str(lit_str) = value {
        Ok((lit_str.value(), lit_str.span()))
    } else {
        Err(Error::new_spanned(
            value,
            format!("expected string literal for {key}"),
        ))
    }
}

/// Convert PascalCase to snake_case.
///
/// Examples:
/// - `Order` -> `order`
/// - `LineItem` -> `line_item`
/// - `HTTPLog` -> `http_log`
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let should_underscore = prev.is_lowercase()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));
                if should_underscore {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Parse all fields from a struct.
fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with fields, not a unit struct",
        )),
    }
}

/// Intermediate struct for collecting field attributes.
#[derive(Default)]
struct FieldAttrs {
    column: Option<String>,
    setter: Option<String>,
    no_setter: bool,
    id: bool,
    version: bool,
    readonly: bool,
    nullable: Option<bool>,
    skip: bool,
    parent: bool,
}

/// Parse a single field and its attributes.
fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let ty = field.ty.clone();
    let attrs = parse_field_attrs(&field.attrs)?;

    let column_name = attrs.column.unwrap_or_else(|| name.to_string());
    let setter = if attrs.no_setter || attrs.skip || attrs.parent {
        None
    } else {
        Some(attrs.setter.unwrap_or_else(|| format!("set_{name}")))
    };

    Ok(FieldDef {
        column_name,
        setter,
        id: attrs.id,
        version: attrs.version,
        readonly: attrs.readonly,
        nullable: attrs.nullable.unwrap_or_else(|| is_option_type(&ty)),
        skip: attrs.skip,
        parent: attrs.parent,
        name,
        ty,
    })
}

/// Parse all `#[entity(...)]` attributes on a field.
fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("id") {
                result.id = true;
            } else if path.is_ident("version") {
                result.version = true;
            } else if path.is_ident("readonly") {
                result.readonly = true;
            } else if path.is_ident("nullable") {
                result.nullable = Some(true);
            } else if path.is_ident("skip") {
                result.skip = true;
            } else if path.is_ident("parent") {
                result.parent = true;
            } else if path.is_ident("no_setter") {
                result.no_setter = true;
            } else if path.is_ident("column") {
                result.column = Some(string_value(&meta, "column name")?.0);
            } else if path.is_ident("setter") {
                let (setter, span) = string_value(&meta, "setter")?;
                if syn::parse_str::<Ident>(&setter).is_err() {
                    return Err(Error::new(
                        span,
                        format!("setter `{setter}` is not a valid method name"),
                    ));
                }
                result.setter = Some(setter);
            } else {
                return Err(meta.error(
                    "unknown entity attribute; expected one of `id`, `version`, `column`, \
                     `setter`, `no_setter`, `readonly`, `nullable`, `skip`, `parent`",
                ));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

/// Whether the type's last path segment is `Option`.
pub fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}
