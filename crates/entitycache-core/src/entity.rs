//! Entity trait and schema descriptors.
//!
//! An [`EntityMetadata`] describes one entity type: its table, the field
//! holding the identifier, the optional version field used for optimistic
//! locking, the mapped fields and, for entities split across two tables,
//! the descriptor of the parent table. Descriptors are `'static` and built
//! at compile time, usually by `#[derive(Entity)]`.

use crate::error::{Error, Result};
use crate::field::FieldInfo;
use crate::value::Value;

/// Static description of an entity type.
#[derive(Debug, Clone, Copy)]
pub struct EntityMetadata {
    /// Rust type name of the entity (used in diagnostics).
    pub entity: &'static str,
    /// Table this descriptor's own fields live in.
    pub table: &'static str,
    /// Name of the identifier field.
    pub identifier: &'static str,
    /// Name of the version field, if this descriptor declares one.
    pub version: Option<&'static str>,
    /// Fields declared by this descriptor (not including the parent's).
    pub fields: &'static [FieldInfo],
    /// Descriptor of the parent table for two-table inheritance.
    pub parent: Option<fn() -> &'static EntityMetadata>,
}

impl EntityMetadata {
    /// Create a descriptor with no version field and no parent.
    pub const fn new(
        entity: &'static str,
        table: &'static str,
        identifier: &'static str,
        fields: &'static [FieldInfo],
    ) -> Self {
        Self {
            entity,
            table,
            identifier,
            version: None,
            fields,
            parent: None,
        }
    }

    /// Declare the version field.
    pub const fn version(mut self, field: &'static str) -> Self {
        self.version = Some(field);
        self
    }

    /// Set the version field from optional.
    pub const fn version_opt(mut self, field: Option<&'static str>) -> Self {
        self.version = field;
        self
    }

    /// Declare the parent descriptor (two-table inheritance).
    pub const fn parent(mut self, parent: fn() -> &'static EntityMetadata) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The parent descriptor, if any.
    pub fn parent_metadata(&self) -> Option<&'static EntityMetadata> {
        self.parent.map(|parent| parent())
    }

    /// Ancestor chain, topmost first, ending with `self`.
    pub fn lineage(&'static self) -> Vec<&'static EntityMetadata> {
        let mut chain = vec![self];
        let mut current = self.parent_metadata();
        while let Some(meta) = current {
            // Guard against a descriptor that lists itself somewhere up its chain.
            if chain.iter().any(|seen| std::ptr::eq(*seen, meta)) {
                break;
            }
            chain.push(meta);
            current = meta.parent_metadata();
        }
        chain.reverse();
        chain
    }

    /// Look up a field declared by this descriptor only.
    pub fn own_field(&self, name: &str) -> Option<&'static FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field declared by this descriptor or any ancestor.
    pub fn field(&'static self, name: &str) -> Option<&'static FieldInfo> {
        self.owner_of(name).and_then(|owner| owner.own_field(name))
    }

    /// The descriptor (and so the table) that declares `name`.
    pub fn owner_of(&'static self, name: &str) -> Option<&'static EntityMetadata> {
        self.lineage()
            .into_iter()
            .rev()
            .find(|meta| meta.own_field(name).is_some())
    }

    /// The identifier field.
    pub fn identifier_field(&'static self) -> Option<&'static FieldInfo> {
        self.field(self.identifier)
    }

    /// The effective version field.
    ///
    /// An entity split across tables inherits the version of its topmost
    /// ancestor; the first version declared walking downwards wins.
    pub fn version_field(&'static self) -> Option<&'static FieldInfo> {
        self.lineage()
            .into_iter()
            .find_map(|meta| meta.version.and_then(|name| meta.field(name)))
    }

    /// Own fields that declare a setter.
    pub fn mutable_fields(&self) -> impl Iterator<Item = &'static FieldInfo> {
        self.fields.iter().filter(|f| f.is_mutable())
    }

    /// Every field of the lineage, ancestors first.
    pub fn all_fields(&'static self) -> Vec<&'static FieldInfo> {
        self.lineage()
            .into_iter()
            .flat_map(|meta| meta.fields.iter())
            .collect()
    }

    /// Check the descriptor for shape errors.
    ///
    /// Reports the first problem found: an identifier or version that names
    /// no declared field, a version equal to the identifier, or more than one
    /// version declared along the inheritance chain.
    #[allow(clippy::result_large_err)]
    pub fn validate(&'static self) -> Result<()> {
        if self.identifier_field().is_none() {
            return Err(Error::config(format!(
                "entity {}: identifier field '{}' is not declared",
                self.entity, self.identifier
            )));
        }

        let mut versions = Vec::new();
        for meta in self.lineage() {
            if let Some(version) = meta.version {
                if meta.field(version).is_none() {
                    return Err(Error::config(format!(
                        "entity {}: version field '{}' is not declared",
                        meta.entity, version
                    )));
                }
                if version == self.identifier {
                    return Err(Error::config(format!(
                        "entity {}: field '{}' cannot be both identifier and version",
                        self.entity, version
                    )));
                }
                versions.push((meta.entity, version));
            }
        }

        if versions.len() > 1 {
            let declared: Vec<String> = versions
                .iter()
                .map(|(entity, field)| format!("{entity}.{field}"))
                .collect();
            return Err(Error::config(format!(
                "entity {}: more than one version field along the inheritance chain: {}",
                self.entity,
                declared.join(", ")
            )));
        }

        Ok(())
    }
}

/// Trait for types whose instances can be tracked by a session cache.
///
/// This is the capability interface the tracking proxy is built against:
/// static metadata plus a read-only accessor returning the current value of
/// a field by name. Mutators are ordinary methods (or direct field writes)
/// that the proxy forwards to and diff-checks.
///
/// # Example
///
/// ```ignore
/// use entitycache::Entity;
///
/// #[derive(Entity)]
/// #[entity(table = "orders")]
/// struct Order {
///     #[entity(id, readonly)]
///     id: i64,
///     #[entity(version, readonly)]
///     ver: i32,
///     total: i64,
/// }
/// ```
pub trait Entity: Sized + Send + Sync + 'static {
    /// The static descriptor for this entity type.
    fn metadata() -> &'static EntityMetadata;

    /// Read the current value of a field, including inherited fields.
    ///
    /// Returns `None` for names the entity does not map.
    fn field_value(&self, field: &str) -> Option<Value>;

    /// Read the identifier value.
    fn identifier_value(&self) -> Option<Value> {
        self.field_value(Self::metadata().identifier)
    }
}

/// An entity that contains the state of entity `P`.
///
/// Every entity embeds itself. A child stored across two tables also embeds
/// its parent, which lets the parent's typed mutators run on the child's
/// proxy through the child's dispatch table.
pub trait Embeds<P: Entity>: Entity {
    /// The embedded `P`.
    fn embedded(&self) -> &P;

    /// Mutable access to the embedded `P`.
    fn embedded_mut(&mut self) -> &mut P;
}
