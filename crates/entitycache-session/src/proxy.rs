//! Change-tracking proxies and the factory that builds them.
//!
//! A [`Tracked<E>`] owns the wrapped entity behind a lock. Reads go straight
//! to the entity; every mutation goes through [`Tracked::invoke`], which
//! resolves the mutator in the type's dispatch table, rejects writes to
//! fields that are not updatable or that the mutator is not registered for,
//! and marks the field dirty only when its value actually changed.

use crate::dispatch::{MutationDispatchTable, MutatorId};
use crate::error::CacheError;
use crate::recorder::{ChangeRecorder, FieldSource};
use entitycache_core::{Entity, EqualityPredicates, FieldInfo, PredicateFactory, Value};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard};

// ============================================================================
// Tracked
// ============================================================================

/// An entity wrapped for change tracking.
///
/// Comparing or printing a `Tracked<E>` compares or prints the entity.
/// Use [`Tracked::ptr_eq`] to test proxy identity.
pub struct Tracked<E: Entity> {
    entity: Arc<RwLock<E>>,
    recorder: Arc<ChangeRecorder>,
    table: Arc<MutationDispatchTable>,
}

impl<E: Entity> Tracked<E> {
    /// Shared read access to the entity.
    ///
    /// Mutators take the write side of the same lock: calling one on this
    /// proxy while the guard is alive deadlocks the calling thread. Prefer
    /// [`Tracked::with`] or [`Tracked::field_value`] for short reads.
    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.entity.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the entity.
    ///
    /// `f` runs under the read lock and must not call this proxy's
    /// mutators.
    pub fn with<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.read())
    }

    /// Clone of the entity's current state.
    pub fn snapshot(&self) -> E
    where
        E: Clone,
    {
        self.read().clone()
    }

    /// Current value of a field by name.
    pub fn field_value(&self, field: &str) -> Option<Value> {
        self.read().field_value(field)
    }

    /// Run a mutator under change tracking.
    ///
    /// `f` performs the write against a copy of the entity. The copy
    /// replaces the entity only if every mapped field other than the one
    /// `mutator` resolves to is unchanged; otherwise the write is discarded
    /// and [`CacheError::UndeclaredWrite`] is returned. The target field is
    /// marked dirty only if its value after `f` differs from its value
    /// before. The result of `f` is returned unchanged.
    pub fn invoke<R>(
        &self,
        mutator: MutatorId,
        f: impl FnOnce(&mut E) -> R,
    ) -> Result<R, CacheError>
    where
        E: Clone,
    {
        if !self.table.is_for::<E>() {
            return Err(CacheError::TypeMismatch {
                expected: self.table.type_name(),
                actual: std::any::type_name::<E>(),
            });
        }

        let entity = self.recorder.entity();
        let field = self
            .table
            .resolve(mutator)
            .ok_or(CacheError::UnregisteredMutator {
                entity,
                mutator: mutator.name(),
            })?;

        if !field.updatable {
            return Err(CacheError::NotUpdatable {
                entity,
                field: field.name,
            });
        }

        let mut guard = self.entity.write().unwrap_or_else(PoisonError::into_inner);
        let mut scratch = (*guard).clone();
        let result = f(&mut scratch);

        let mut target = None;
        for mapped in self.recorder.metadata().all_fields() {
            let before = read_image(&*guard, entity, mapped)?;
            let after = read_image(&scratch, entity, mapped)?;
            if before == after {
                continue;
            }
            if mapped.name != field.name {
                tracing::debug!(
                    entity,
                    identifier = %self.recorder.identifier(),
                    mutator = mutator.name(),
                    field = mapped.name,
                    "Mutator wrote outside its field; write discarded"
                );
                return Err(CacheError::UndeclaredWrite {
                    entity,
                    mutator: mutator.name(),
                    field: mapped.name,
                });
            }
            target = Some((before, after));
        }
        *guard = scratch;
        drop(guard);

        match target {
            Some((before, after)) => {
                let newly_dirty = self.recorder.mark_dirty(field.name);
                tracing::trace!(
                    entity,
                    identifier = %self.recorder.identifier(),
                    field = field.name,
                    before = %before,
                    after = %after,
                    newly_dirty,
                    "Field changed"
                );
            }
            None => tracing::trace!(
                entity,
                identifier = %self.recorder.identifier(),
                field = field.name,
                "Write left value unchanged"
            ),
        }

        Ok(result)
    }

    /// The recorder this proxy reports to.
    pub fn recorder(&self) -> &Arc<ChangeRecorder> {
        &self.recorder
    }

    /// The dispatch table this proxy resolves mutators with.
    pub fn dispatch_table(&self) -> &Arc<MutationDispatchTable> {
        &self.table
    }

    /// Identifier value read at wrap time.
    pub fn identifier(&self) -> &Value {
        self.recorder.identifier()
    }

    /// Whether the entity has changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.recorder.has_pending_changes()
    }

    /// Whether `self` and `other` are the same proxy.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }
}

fn read_image<E: Entity>(
    entity: &E,
    name: &'static str,
    field: &'static FieldInfo,
) -> Result<Value, CacheError> {
    entity
        .field_value(field.name)
        .ok_or(CacheError::UnknownField {
            entity: name,
            field: field.name,
        })
}

impl<E: Entity + PartialEq> PartialEq for Tracked<E> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.read() == *other.read()
    }
}

impl<E: Entity + PartialEq> PartialEq<E> for Tracked<E> {
    fn eq(&self, other: &E) -> bool {
        *self.read() == *other
    }
}

impl<E: Entity + fmt::Debug> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.read(), f)
    }
}

impl<E: Entity + fmt::Display> fmt::Display for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.read(), f)
    }
}

// ============================================================================
// ProxyFactory
// ============================================================================

/// Builds tracked proxies and owns the per-type dispatch tables.
///
/// Dispatch tables are built on first use of a type and shared read-only by
/// every proxy the factory creates afterwards. [`ProxyFactory::global`] is
/// the process-wide instance used by default.
pub struct ProxyFactory {
    tables: RwLock<HashMap<TypeId, Arc<MutationDispatchTable>>>,
    predicates: Arc<dyn PredicateFactory>,
}

impl ProxyFactory {
    /// Create a factory producing `ColumnEquals` predicates.
    pub fn new() -> Self {
        Self::with_predicates(EqualityPredicates)
    }

    /// Create a factory with a custom predicate factory.
    pub fn with_predicates(predicates: impl PredicateFactory + 'static) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            predicates: Arc::new(predicates),
        }
    }

    /// The process-wide factory.
    pub fn global() -> Arc<ProxyFactory> {
        static GLOBAL: OnceLock<Arc<ProxyFactory>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ProxyFactory::new())).clone()
    }

    /// The dispatch table for `E`, built on first request.
    pub fn dispatch_table<E: Entity>(&self) -> Result<Arc<MutationDispatchTable>, CacheError> {
        let type_id = TypeId::of::<E>();
        {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(table) = tables.get(&type_id) {
                return Ok(Arc::clone(table));
            }
        }

        let built = Arc::new(MutationDispatchTable::build::<E>()?);
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race; keep the first table.
        let table = tables.entry(type_id).or_insert(built);
        Ok(Arc::clone(table))
    }

    /// Number of entity types with a cached dispatch table.
    pub fn table_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wrap `entity` using the cached dispatch table for its type.
    pub fn wrap<E: Entity>(
        &self,
        entity: E,
    ) -> Result<(Arc<Tracked<E>>, Arc<ChangeRecorder>), CacheError> {
        let table = self.dispatch_table::<E>()?;
        self.wrap_with(entity, table)
    }

    /// Wrap `entity` with an explicit dispatch table.
    ///
    /// Fails if the table was built for another type, if the identifier is
    /// null, or if the entity is versioned and its version is null. Does not
    /// register the proxy anywhere.
    pub fn wrap_with<E: Entity>(
        &self,
        entity: E,
        table: Arc<MutationDispatchTable>,
    ) -> Result<(Arc<Tracked<E>>, Arc<ChangeRecorder>), CacheError> {
        if !table.is_for::<E>() {
            return Err(CacheError::TypeMismatch {
                expected: table.type_name(),
                actual: std::any::type_name::<E>(),
            });
        }

        let metadata = table.metadata();
        let name = metadata.entity;
        let id_field = metadata
            .identifier_field()
            .ok_or_else(|| CacheError::InvalidMetadata {
                entity: name,
                message: format!("identifier field '{}' is not declared", metadata.identifier),
            })?;

        let identifier = read_image(&entity, name, id_field)?;
        if identifier.is_null() {
            return Err(CacheError::NullIdentifier {
                entity: name,
                field: id_field.name,
            });
        }

        let mut predicates = vec![self.predicates.equality(id_field, identifier.clone())];
        if let Some(version_field) = metadata.version_field() {
            let version = read_image(&entity, name, version_field)?;
            if version.is_null() {
                return Err(CacheError::NullVersion {
                    entity: name,
                    field: version_field.name,
                });
            }
            predicates.push(self.predicates.equality(version_field, version));
        }

        let entity = Arc::new(RwLock::new(entity));
        let source: Arc<dyn FieldSource> = entity.clone();
        let recorder = Arc::new(ChangeRecorder::new(
            metadata,
            identifier,
            predicates,
            source,
        ));
        tracing::trace!(
            entity = name,
            identifier = %recorder.identifier(),
            predicates = recorder.identifier_predicates().len(),
            "Wrapped entity"
        );

        let proxy = Arc::new(Tracked {
            entity,
            recorder: Arc::clone(&recorder),
            table,
        });
        Ok((proxy, recorder))
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("tables", &self.table_count())
            .finish_non_exhaustive()
    }
}
