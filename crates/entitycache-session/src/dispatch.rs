//! Per-type mutator dispatch tables.
//!
//! A [`MutationDispatchTable`] maps every mutator of an entity type to the
//! field it writes. It is derived once from the type's [`EntityMetadata`]
//! and shared read-only by every proxy of that type, in every session.
//!
//! # Construction rules
//!
//! - Ancestor descriptors are enumerated before the entity's own, so a
//!   two-table entity sees its parent table's mutators first.
//! - A non-identifier mutator that is already registered is a fatal
//!   configuration error ([`CacheError::DuplicateMutator`]).
//! - Identifier mutators are registered last and only if absent: an
//!   identifier setter that coincides with another field's setter never
//!   shadows that field.

use crate::error::CacheError;
use entitycache_core::{Entity, EntityMetadata, FieldInfo};
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

/// Stable identity of a mutator: the setter name declared in [`FieldInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutatorId(&'static str);

impl MutatorId {
    /// Create a mutator tag.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The setter name.
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MutatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Immutable mapping from mutator to field for one entity type.
#[derive(Debug)]
pub struct MutationDispatchTable {
    type_id: TypeId,
    type_name: &'static str,
    metadata: &'static EntityMetadata,
    mutators: HashMap<MutatorId, &'static FieldInfo>,
}

impl MutationDispatchTable {
    /// Derive the dispatch table for `E`.
    ///
    /// Pure and idempotent for a given descriptor.
    #[tracing::instrument(level = "debug", fields(entity = E::metadata().entity))]
    pub fn build<E: Entity>() -> Result<Self, CacheError> {
        let metadata = E::metadata();
        metadata
            .validate()
            .map_err(|e| CacheError::InvalidMetadata {
                entity: metadata.entity,
                message: e.to_string(),
            })?;

        let lineage = metadata.lineage();
        let mut mutators: HashMap<MutatorId, &'static FieldInfo> = HashMap::new();
        let mut identifier_setters = Vec::new();

        for meta in &lineage {
            for field in meta.mutable_fields() {
                let Some(setter) = field.setter else {
                    continue;
                };
                let mutator = MutatorId::new(setter);

                if field.name == meta.identifier {
                    identifier_setters.push((mutator, field));
                    continue;
                }

                match mutators.entry(mutator) {
                    Entry::Occupied(existing) => {
                        return Err(CacheError::DuplicateMutator {
                            entity: metadata.entity,
                            mutator: setter,
                            existing: existing.get().name,
                            field: field.name,
                        });
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(field);
                    }
                }
            }
        }

        for (mutator, field) in identifier_setters {
            if mutators.contains_key(&mutator) {
                tracing::debug!(
                    mutator = mutator.name(),
                    field = field.name,
                    "Identifier setter shadowed by another field; not registered"
                );
                continue;
            }
            mutators.insert(mutator, field);
        }

        tracing::debug!(
            mutators = mutators.len(),
            tables = lineage.len(),
            "Built mutation dispatch table"
        );

        Ok(Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            metadata,
            mutators,
        })
    }

    /// Field written by `mutator`, if registered.
    pub fn resolve(&self, mutator: MutatorId) -> Option<&'static FieldInfo> {
        self.mutators.get(&mutator).copied()
    }

    /// Whether this table was built for `E`.
    pub fn is_for<E: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Type name of the entity the table was built for.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Descriptor of the entity the table was built for.
    pub fn metadata(&self) -> &'static EntityMetadata {
        self.metadata
    }

    /// Registered mutators, sorted by name.
    pub fn mutators(&self) -> Vec<MutatorId> {
        let mut names: Vec<MutatorId> = self.mutators.keys().copied().collect();
        names.sort();
        names
    }

    /// Number of registered mutators.
    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    /// Whether no mutator is registered.
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }
}
