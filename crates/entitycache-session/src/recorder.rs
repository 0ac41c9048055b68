//! Per-instance change recording.
//!
//! A [`ChangeRecorder`] is created together with its proxy and lives as long
//! as the proxy stays in the identity cache. Everything in it is fixed at
//! wrap time except the dirty set, which grows as mutators change values and
//! is cleared after a successful flush.

use entitycache_core::{Condition, Entity, EntityMetadata, FieldInfo, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Read-only access to the live field values of a wrapped entity.
pub trait FieldSource: Send + Sync {
    /// Current value of `field`, or `None` if the entity does not map it.
    fn read_field(&self, field: &str) -> Option<Value>;
}

impl<E: Entity> FieldSource for RwLock<E> {
    fn read_field(&self, field: &str) -> Option<Value> {
        self.read()
            .unwrap_or_else(PoisonError::into_inner)
            .field_value(field)
    }
}

/// Dirty-state bookkeeping for one tracked instance.
pub struct ChangeRecorder {
    metadata: &'static EntityMetadata,
    identifier: Value,
    predicates: Vec<Arc<dyn Condition>>,
    dirty: Mutex<BTreeSet<&'static str>>,
    source: Arc<dyn FieldSource>,
}

impl ChangeRecorder {
    pub(crate) fn new(
        metadata: &'static EntityMetadata,
        identifier: Value,
        predicates: Vec<Arc<dyn Condition>>,
        source: Arc<dyn FieldSource>,
    ) -> Self {
        Self {
            metadata,
            identifier,
            predicates,
            dirty: Mutex::new(BTreeSet::new()),
            source,
        }
    }

    /// Entity type name.
    pub fn entity(&self) -> &'static str {
        self.metadata.entity
    }

    /// Table of the most derived descriptor.
    pub fn table(&self) -> &'static str {
        self.metadata.table
    }

    /// Descriptor of the tracked entity type.
    pub fn metadata(&self) -> &'static EntityMetadata {
        self.metadata
    }

    /// Identifier value read at wrap time.
    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    /// Optimistic-concurrency predicates: identifier equality, then version
    /// equality for versioned entities.
    pub fn identifier_predicates(&self) -> &[Arc<dyn Condition>] {
        &self.predicates
    }

    /// Fields changed since the last flush, sorted by name.
    pub fn dirty_fields(&self) -> Vec<&'static str> {
        self.lock_dirty().iter().copied().collect()
    }

    /// Whether `field` is in the dirty set.
    pub fn is_dirty(&self, field: &str) -> bool {
        self.lock_dirty().contains(field)
    }

    /// Whether any field changed since the last flush.
    pub fn has_pending_changes(&self) -> bool {
        !self.lock_dirty().is_empty()
    }

    /// Clear the dirty set after a successful persist.
    pub fn mark_flushed(&self) {
        let cleared = std::mem::take(&mut *self.lock_dirty());
        tracing::debug!(
            entity = self.entity(),
            identifier = %self.identifier,
            fields = cleared.len(),
            "Marked flushed"
        );
    }

    /// Clear the fields a flush wrote, keeping any whose live value has
    /// moved on from the value written.
    ///
    /// Returns the fields left dirty.
    pub(crate) fn mark_fields_flushed(
        &self,
        written: &[(&'static str, &Value)],
    ) -> Vec<&'static str> {
        let mut dirty = self.lock_dirty();
        let mut kept = Vec::new();
        for (field, value) in written {
            if self.source.read_field(field).as_ref() == Some(*value) {
                dirty.remove(field);
            } else {
                kept.push(*field);
            }
        }
        tracing::debug!(
            entity = self.entity(),
            identifier = %self.identifier,
            flushed = written.len() - kept.len(),
            rewritten = ?kept,
            remaining = dirty.len(),
            "Marked fields flushed"
        );
        kept
    }

    /// Live value of `field` on the wrapped instance.
    pub fn current_value(&self, field: &str) -> Option<Value> {
        self.source.read_field(field)
    }

    /// Dirty fields with their current values, in declaration order.
    pub fn changes(&self) -> Vec<(&'static FieldInfo, Value)> {
        let dirty = self.lock_dirty().clone();
        self.metadata
            .all_fields()
            .into_iter()
            .filter(|field| dirty.contains(field.name))
            .filter_map(|field| {
                self.source
                    .read_field(field.name)
                    .map(|value| (field, value))
            })
            .collect()
    }

    /// Add `field` to the dirty set. Returns false if it was already there.
    pub(crate) fn mark_dirty(&self, field: &'static str) -> bool {
        self.lock_dirty().insert(field)
    }

    fn lock_dirty(&self) -> MutexGuard<'_, BTreeSet<&'static str>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ChangeRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecorder")
            .field("entity", &self.entity())
            .field("identifier", &self.identifier)
            .field("predicates", &self.predicates)
            .field("dirty", &self.dirty_fields())
            .finish_non_exhaustive()
    }
}
