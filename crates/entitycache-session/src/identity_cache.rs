//! Session-scoped identity cache.
//!
//! The cache guarantees at most one live proxy per (entity type, identifier)
//! within a session, reachable both by identifier and by every alternate key
//! ever registered for that identifier.
//!
//! # Structures
//!
//! All maps are keyed first by entity type. Proxies are stored type-erased
//! and recovered by downcasting on lookup.
//!
//! | map | key | value |
//! |---|---|---|
//! | `by_identifier` | identifier | proxy |
//! | `by_alternate_key` | [`UniqueKey`] | proxy |
//! | `identifier_to_alternate_keys` | identifier | set of keys |
//! | `recorders` | identifier | [`ChangeRecorder`] |
//!
//! # Re-registration
//!
//! Registering an identifier that is already cached replaces the proxy
//! (last write wins) and re-points every alternate key of that identifier at
//! the new proxy. When the replaced recorder still has pending changes the
//! behavior follows [`CacheConfig`]: a warning by default, or
//! [`CacheError::DirtyReregistration`] in strict mode.

use crate::error::CacheError;
use crate::proxy::{ProxyFactory, Tracked};
use crate::recorder::ChangeRecorder;
use crate::unique_key::UniqueKey;
use crate::{CacheConfig, SessionToken};
use entitycache_core::{Entity, Value};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type ErasedProxy = Arc<dyn Any + Send + Sync>;

/// Key accepted by [`IdentityCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    /// Primary identifier value.
    Identifier(Value),
    /// Alternate key.
    Unique(UniqueKey),
}

impl From<Value> for LookupKey {
    fn from(value: Value) -> Self {
        LookupKey::Identifier(value)
    }
}

impl From<UniqueKey> for LookupKey {
    fn from(key: UniqueKey) -> Self {
        LookupKey::Unique(key)
    }
}

impl From<i64> for LookupKey {
    fn from(value: i64) -> Self {
        LookupKey::Identifier(Value::from(value))
    }
}

impl From<i32> for LookupKey {
    fn from(value: i32) -> Self {
        LookupKey::Identifier(Value::from(value))
    }
}

impl From<&str> for LookupKey {
    fn from(value: &str) -> Self {
        LookupKey::Identifier(Value::from(value))
    }
}

impl From<String> for LookupKey {
    fn from(value: String) -> Self {
        LookupKey::Identifier(Value::from(value))
    }
}

/// Counts describing the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entity types with at least one cached proxy.
    pub entity_types: usize,
    /// Proxies indexed by identifier.
    pub proxies: usize,
    /// Alternate keys indexed.
    pub alternate_keys: usize,
    /// Recorders held.
    pub recorders: usize,
    /// Recorders with pending changes.
    pub dirty_recorders: usize,
}

/// Per-session identity map of change-tracking proxies.
///
/// Not meant to be shared between sessions or threads; each unit of work
/// owns its own cache.
pub struct IdentityCache {
    session: SessionToken,
    config: CacheConfig,
    factory: Arc<ProxyFactory>,
    by_identifier: HashMap<TypeId, HashMap<Value, ErasedProxy>>,
    by_alternate_key: HashMap<TypeId, HashMap<UniqueKey, ErasedProxy>>,
    identifier_to_alternate_keys: HashMap<TypeId, HashMap<Value, HashSet<UniqueKey>>>,
    recorders: HashMap<TypeId, HashMap<Value, Arc<ChangeRecorder>>>,
}

impl IdentityCache {
    /// Create an empty cache for `session` with the default configuration.
    pub fn new(session: SessionToken) -> Self {
        Self::with_config(session, CacheConfig::default())
    }

    /// Create an empty cache with a custom configuration.
    pub fn with_config(session: SessionToken, config: CacheConfig) -> Self {
        Self::with_factory(session, config, ProxyFactory::global())
    }

    /// Create an empty cache that wraps entities with `factory`.
    pub fn with_factory(
        session: SessionToken,
        config: CacheConfig,
        factory: Arc<ProxyFactory>,
    ) -> Self {
        Self {
            session,
            config,
            factory,
            by_identifier: HashMap::new(),
            by_alternate_key: HashMap::new(),
            identifier_to_alternate_keys: HashMap::new(),
            recorders: HashMap::new(),
        }
    }

    /// The session this cache belongs to.
    pub fn session(&self) -> SessionToken {
        self.session
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The factory used to wrap entities.
    pub fn factory(&self) -> &Arc<ProxyFactory> {
        &self.factory
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Find the cached proxy for `key`. Never creates one.
    pub fn lookup<E: Entity>(&self, key: impl Into<LookupKey>) -> Option<Arc<Tracked<E>>> {
        let type_id = TypeId::of::<E>();
        let erased = match key.into() {
            LookupKey::Identifier(id) => self.by_identifier.get(&type_id)?.get(&id),
            LookupKey::Unique(key) => self.by_alternate_key.get(&type_id)?.get(&key),
        }?;
        Arc::clone(erased).downcast::<Tracked<E>>().ok()
    }

    /// Find the cached proxy by identifier.
    pub fn get<E: Entity>(&self, id: impl Into<Value>) -> Option<Arc<Tracked<E>>> {
        self.lookup(LookupKey::Identifier(id.into()))
    }

    /// Find the cached proxy by alternate key.
    pub fn get_by_unique_key<E: Entity>(&self, key: &UniqueKey) -> Option<Arc<Tracked<E>>> {
        self.lookup(LookupKey::Unique(key.clone()))
    }

    /// Whether a proxy is cached for `id`.
    pub fn contains<E: Entity>(&self, id: impl Into<Value>) -> bool {
        self.by_identifier
            .get(&TypeId::of::<E>())
            .is_some_and(|m| m.contains_key(&id.into()))
    }

    /// The recorder for `id`, if cached.
    pub fn recorder<E: Entity>(&self, id: impl Into<Value>) -> Option<Arc<ChangeRecorder>> {
        self.recorders
            .get(&TypeId::of::<E>())?
            .get(&id.into())
            .cloned()
    }

    /// Alternate keys registered for `id`.
    pub fn alternate_keys<E: Entity>(&self, id: impl Into<Value>) -> Vec<UniqueKey> {
        let mut keys: Vec<UniqueKey> = self
            .identifier_to_alternate_keys
            .get(&TypeId::of::<E>())
            .and_then(|m| m.get(&id.into()))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort_by_key(ToString::to_string);
        keys
    }

    /// Number of proxies indexed by identifier, across all entity types.
    pub fn len(&self) -> usize {
        self.by_identifier.values().map(HashMap::len).sum()
    }

    /// Whether the cache holds no proxy.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Wrap `entity` and cache the proxy under its identifier.
    ///
    /// Replaces any proxy cached for the same identifier and re-points its
    /// alternate keys at the new proxy.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::metadata().entity))]
    pub fn register_by_identifier<E: Entity>(
        &mut self,
        entity: E,
    ) -> Result<Arc<Tracked<E>>, CacheError> {
        let (proxy, recorder) = self.factory.wrap(entity)?;
        self.install(&proxy, recorder)?;
        Ok(proxy)
    }

    /// Wrap `entity`, cache it under its identifier and under `key`.
    ///
    /// A key that previously resolved to another identifier is moved to this
    /// one.
    #[tracing::instrument(
        level = "debug",
        skip(self, entity, key),
        fields(entity = E::metadata().entity, key = %key)
    )]
    pub fn register_by_alternate_key<E: Entity>(
        &mut self,
        entity: E,
        key: UniqueKey,
    ) -> Result<Arc<Tracked<E>>, CacheError> {
        let proxy = self.register_by_identifier(entity)?;
        let type_id = TypeId::of::<E>();
        let identifier = proxy.identifier().clone();

        let previous_owner = self
            .by_alternate_key
            .get(&type_id)
            .and_then(|m| m.get(&key))
            .and_then(|erased| erased.downcast_ref::<Tracked<E>>())
            .map(|old| old.identifier().clone());
        if let Some(old_id) = previous_owner.filter(|old_id| *old_id != identifier) {
            tracing::debug!(
                key = %key,
                from = %old_id,
                to = %identifier,
                "Moving alternate key to a new identifier"
            );
            if let Some(keys) = self
                .identifier_to_alternate_keys
                .get_mut(&type_id)
                .and_then(|m| m.get_mut(&old_id))
            {
                keys.remove(&key);
            }
        }

        let erased: ErasedProxy = proxy.clone();
        self.by_alternate_key
            .entry(type_id)
            .or_default()
            .insert(key.clone(), erased);
        self.identifier_to_alternate_keys
            .entry(type_id)
            .or_default()
            .entry(identifier)
            .or_default()
            .insert(key);

        Ok(proxy)
    }

    fn install<E: Entity>(
        &mut self,
        proxy: &Arc<Tracked<E>>,
        recorder: Arc<ChangeRecorder>,
    ) -> Result<(), CacheError> {
        let type_id = TypeId::of::<E>();
        let entity = recorder.entity();
        let identifier = recorder.identifier().clone();

        let replaced = self
            .recorders
            .get(&type_id)
            .and_then(|m| m.get(&identifier));
        if let Some(existing) = replaced.filter(|r| r.has_pending_changes()) {
            if self.config.reject_dirty_reregistration {
                return Err(CacheError::DirtyReregistration { entity, identifier });
            }
            if self.config.warn_on_dirty_replace {
                tracing::warn!(
                    entity,
                    identifier = %identifier,
                    dirty = ?existing.dirty_fields(),
                    "Replacing tracked entity with unflushed changes; they will not be flushed"
                );
            }
        }

        let erased: ErasedProxy = proxy.clone();
        let previous = self
            .by_identifier
            .entry(type_id)
            .or_default()
            .insert(identifier.clone(), Arc::clone(&erased));
        self.recorders
            .entry(type_id)
            .or_default()
            .insert(identifier.clone(), recorder);
        let backfilled = self.backfill_alternate_keys(type_id, entity, &identifier, &erased);

        tracing::debug!(
            entity,
            identifier = %identifier,
            replaced = previous.is_some(),
            backfilled,
            "Registered tracked entity"
        );
        Ok(())
    }

    /// Point every alternate key recorded for `identifier` at `proxy`.
    ///
    /// # Panics
    ///
    /// Panics if a recorded key has no entry in the alternate-key map.
    fn backfill_alternate_keys(
        &mut self,
        type_id: TypeId,
        entity: &'static str,
        identifier: &Value,
        proxy: &ErasedProxy,
    ) -> usize {
        let Some(keys) = self
            .identifier_to_alternate_keys
            .get(&type_id)
            .and_then(|m| m.get(identifier))
        else {
            return 0;
        };

        let by_key = self.by_alternate_key.entry(type_id).or_default();
        for key in keys {
            match by_key.get_mut(key) {
                Some(slot) => *slot = Arc::clone(proxy),
                None => panic!(
                    "identity cache corrupted: alternate key {} of {} {} is indexed but has no cached proxy",
                    key, entity, identifier
                ),
            }
        }
        keys.len()
    }

    // ========================================================================
    // Pending changes
    // ========================================================================

    /// Recorders with pending changes, across all entity types.
    ///
    /// The result is a snapshot ordered by entity name then identifier.
    pub fn pending_changes(&self) -> Vec<Arc<ChangeRecorder>> {
        let mut pending: Vec<Arc<ChangeRecorder>> = self
            .recorders
            .values()
            .flat_map(HashMap::values)
            .filter(|r| r.has_pending_changes())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.entity()
                .cmp(b.entity())
                .then_with(|| compare_identifiers(a.identifier(), b.identifier()))
        });
        pending
    }

    /// Whether any recorder has pending changes.
    pub fn has_pending_changes(&self) -> bool {
        self.recorders
            .values()
            .flat_map(HashMap::values)
            .any(|r| r.has_pending_changes())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove the entry for `id` from every map.
    ///
    /// Fails with [`CacheError::DirtyEviction`] if the entry has pending
    /// changes. Returns the evicted proxy, or `None` if nothing was cached.
    pub fn evict<E: Entity>(
        &mut self,
        id: impl Into<Value>,
    ) -> Result<Option<Arc<Tracked<E>>>, CacheError> {
        let id = id.into();
        if self
            .recorder::<E>(id.clone())
            .is_some_and(|r| r.has_pending_changes())
        {
            return Err(CacheError::DirtyEviction {
                entity: E::metadata().entity,
                identifier: id,
            });
        }
        Ok(self.remove_entry::<E>(&id))
    }

    /// Remove the entry for `id` from every map, dropping pending changes.
    pub fn discard_changes<E: Entity>(&mut self, id: impl Into<Value>) -> Option<Arc<Tracked<E>>> {
        let id = id.into();
        if let Some(recorder) = self.recorder::<E>(id.clone()) {
            if recorder.has_pending_changes() {
                tracing::debug!(
                    entity = recorder.entity(),
                    identifier = %id,
                    dirty = ?recorder.dirty_fields(),
                    "Discarding unflushed changes"
                );
            }
        }
        self.remove_entry::<E>(&id)
    }

    fn remove_entry<E: Entity>(&mut self, id: &Value) -> Option<Arc<Tracked<E>>> {
        let type_id = TypeId::of::<E>();
        let removed = self
            .by_identifier
            .get_mut(&type_id)
            .and_then(|m| m.remove(id));
        if let Some(m) = self.recorders.get_mut(&type_id) {
            m.remove(id);
        }
        let keys = self
            .identifier_to_alternate_keys
            .get_mut(&type_id)
            .and_then(|m| m.remove(id))
            .unwrap_or_default();
        if let Some(by_key) = self.by_alternate_key.get_mut(&type_id) {
            for key in &keys {
                by_key.remove(key);
            }
        }
        self.prune(type_id);

        tracing::debug!(
            entity = E::metadata().entity,
            identifier = %id,
            found = removed.is_some(),
            alternate_keys = keys.len(),
            "Evicted entry"
        );
        removed.and_then(|erased| erased.downcast::<Tracked<E>>().ok())
    }

    fn prune(&mut self, type_id: TypeId) {
        if self.by_identifier.get(&type_id).is_some_and(HashMap::is_empty) {
            self.by_identifier.remove(&type_id);
        }
        if self.by_alternate_key.get(&type_id).is_some_and(HashMap::is_empty) {
            self.by_alternate_key.remove(&type_id);
        }
        if self
            .identifier_to_alternate_keys
            .get(&type_id)
            .is_some_and(HashMap::is_empty)
        {
            self.identifier_to_alternate_keys.remove(&type_id);
        }
        if self.recorders.get(&type_id).is_some_and(HashMap::is_empty) {
            self.recorders.remove(&type_id);
        }
    }

    /// Clear every map at a unit-of-work boundary.
    ///
    /// Fails with [`CacheError::SessionMismatch`] if `token` is not the
    /// session this cache was created for.
    ///
    /// # Panics
    ///
    /// Panics if any recorder still has pending changes: the caller skipped
    /// the flush or ignored its failure.
    #[tracing::instrument(level = "debug", skip(self), fields(session = %self.session))]
    pub fn reset(&mut self, token: &SessionToken) -> Result<(), CacheError> {
        if *token != self.session {
            return Err(CacheError::SessionMismatch {
                expected: self.session,
                actual: *token,
            });
        }

        let pending = self.pending_changes();
        if let Some(first) = pending.first() {
            panic!(
                "identity cache reset with {} unflushed entities (first: {} {} with dirty fields {:?})",
                pending.len(),
                first.entity(),
                first.identifier(),
                first.dirty_fields()
            );
        }

        let cleared = self.len();
        self.by_identifier.clear();
        self.by_alternate_key.clear();
        self.identifier_to_alternate_keys.clear();
        self.recorders.clear();
        tracing::debug!(cleared, "Identity cache reset");
        Ok(())
    }

    /// Counts describing the cache contents.
    pub fn stats(&self) -> CacheStats {
        let recorders = self.recorders.values().flat_map(HashMap::values);
        CacheStats {
            entity_types: self.by_identifier.len(),
            proxies: self.len(),
            alternate_keys: self.by_alternate_key.values().map(HashMap::len).sum(),
            recorders: self.recorders.values().map(HashMap::len).sum(),
            dirty_recorders: recorders.filter(|r| r.has_pending_changes()).count(),
        }
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("session", &self.session)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Numeric identifiers sort numerically, everything else by rendered text.
fn compare_identifiers(a: &Value, b: &Value) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Car, Customer, Order};

    fn cache() -> (SessionToken, IdentityCache) {
        let token = SessionToken::new();
        (token, IdentityCache::new(token))
    }

    fn email(address: &str) -> UniqueKey {
        UniqueKey::single("email", address).unwrap()
    }

    #[test]
    fn test_lookup_by_identifier() {
        let (_, mut cache) = cache();
        let proxy = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();

        let found = cache.get::<Order>(7i64).unwrap();
        assert!(found.ptr_eq(&proxy));
        assert!(cache.lookup::<Order>(Value::BigInt(7)).is_some());
        assert!(cache.get::<Order>(8i64).is_none());
        assert!(cache.get::<Customer>(7i64).is_none());
        assert!(cache.contains::<Order>(7i64));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lookup_never_creates() {
        let (_, cache) = cache();
        assert!(cache.get::<Order>(7i64).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_register_by_alternate_key_reachable_both_ways() {
        let (_, mut cache) = cache();
        let proxy = cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();

        let by_key = cache
            .get_by_unique_key::<Customer>(&email("ann@example.com"))
            .unwrap();
        let by_id = cache.get::<Customer>(1i64).unwrap();
        assert!(by_key.ptr_eq(&proxy));
        assert!(by_id.ptr_eq(&proxy));
    }

    #[test]
    fn test_reregistration_replaces_and_backfills_keys() {
        let (_, mut cache) = cache();
        cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();
        let first = cache.get::<Customer>(1i64).unwrap();

        let second = cache
            .register_by_identifier(Customer::new(1, "ann@example.com"))
            .unwrap();
        assert!(!first.ptr_eq(&second));

        let by_key = cache
            .get_by_unique_key::<Customer>(&email("ann@example.com"))
            .unwrap();
        assert!(by_key.ptr_eq(&second));
        assert!(cache.get::<Customer>(1i64).unwrap().ptr_eq(&second));
    }

    #[test]
    fn test_two_alternate_keys_resolve_to_current_proxy() {
        let (_, mut cache) = cache();
        let tenant_key = UniqueKey::new(["tenant", "code"], [Value::from(1), Value::from("A")]).unwrap();
        cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();
        let current = cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), tenant_key.clone())
            .unwrap();

        let a = cache
            .get_by_unique_key::<Customer>(&email("ann@example.com"))
            .unwrap();
        let b = cache.get_by_unique_key::<Customer>(&tenant_key).unwrap();
        assert!(a.ptr_eq(&current));
        assert!(b.ptr_eq(&current));
        assert_eq!(cache.alternate_keys::<Customer>(1i64).len(), 2);
    }

    #[test]
    fn test_alternate_key_moves_between_identifiers() {
        let (_, mut cache) = cache();
        cache
            .register_by_alternate_key(Customer::new(1, "shared@example.com"), email("shared@example.com"))
            .unwrap();
        let second = cache
            .register_by_alternate_key(Customer::new(2, "shared@example.com"), email("shared@example.com"))
            .unwrap();

        assert!(cache.alternate_keys::<Customer>(1i64).is_empty());
        assert_eq!(cache.alternate_keys::<Customer>(2i64).len(), 1);
        assert!(
            cache
                .get_by_unique_key::<Customer>(&email("shared@example.com"))
                .unwrap()
                .ptr_eq(&second)
        );

        // Re-registering id 1 must not steal the key back.
        cache
            .register_by_identifier(Customer::new(1, "shared@example.com"))
            .unwrap();
        assert!(
            cache
                .get_by_unique_key::<Customer>(&email("shared@example.com"))
                .unwrap()
                .ptr_eq(&second)
        );
    }

    #[test]
    #[should_panic(expected = "identity cache corrupted")]
    fn test_backfill_panics_on_missing_alternate_key() {
        let (_, mut cache) = cache();
        cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();
        cache.by_alternate_key.clear();
        let _ = cache.register_by_identifier(Customer::new(1, "ann@example.com"));
    }

    #[test]
    fn test_last_write_wins_drops_dirty_changes() {
        let (token, mut cache) = cache();
        let first = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        first.set_total(150).unwrap();

        let second = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        assert!(!second.is_dirty());
        assert!(cache.pending_changes().is_empty());
        assert_eq!(cache.get::<Order>(7i64).unwrap().read().total, 100);
        assert!(cache.reset(&token).is_ok());
    }

    #[test]
    fn test_strict_mode_rejects_dirty_reregistration() {
        let token = SessionToken::new();
        let mut cache = IdentityCache::with_config(token, CacheConfig::strict());
        let first = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        first.set_total(150).unwrap();

        let err = cache
            .register_by_identifier(Order::new(7, 1, 100))
            .unwrap_err();
        assert!(matches!(err, CacheError::DirtyReregistration { .. }));
        assert!(cache.get::<Order>(7i64).unwrap().ptr_eq(&first));

        first.recorder().mark_flushed();
        assert!(cache.register_by_identifier(Order::new(7, 2, 150)).is_ok());
    }

    #[test]
    fn test_pending_changes_snapshot() {
        let (_, mut cache) = cache();
        let a = cache.register_by_identifier(Order::new(10, 1, 100)).unwrap();
        let b = cache.register_by_identifier(Order::new(9, 1, 100)).unwrap();
        cache.register_by_identifier(Order::new(8, 1, 100)).unwrap();
        let car = cache.register_by_identifier(Car::new(3, 1, "Saab", 4)).unwrap();

        a.set_total(1).unwrap();
        b.set_total(2).unwrap();
        car.set_doors(2).unwrap();

        let pending = cache.pending_changes();
        let ids: Vec<(&str, String)> = pending
            .iter()
            .map(|r| (r.entity(), r.identifier().to_string()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("Car", "3".to_string()),
                ("Order", "9".to_string()),
                ("Order", "10".to_string()),
            ]
        );

        // Snapshot, not a live view.
        pending[0].mark_flushed();
        assert_eq!(pending.len(), 3);
        assert_eq!(cache.pending_changes().len(), 2);
    }

    #[test]
    fn test_reset_with_foreign_token_fails() {
        let (_, mut cache) = cache();
        cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        let err = cache.reset(&SessionToken::new()).unwrap_err();
        assert!(matches!(err, CacheError::SessionMismatch { .. }));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[should_panic(expected = "unflushed entities")]
    fn test_reset_while_dirty_panics() {
        let (token, mut cache) = cache();
        cache.register_by_identifier(Order::new(1, 1, 100)).unwrap();
        let dirty = cache.register_by_identifier(Order::new(2, 1, 100)).unwrap();
        cache.register_by_identifier(Order::new(3, 1, 100)).unwrap();
        dirty.set_total(5).unwrap();
        let _ = cache.reset(&token);
    }

    #[test]
    fn test_reset_clears_all_maps() {
        let (token, mut cache) = cache();
        cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();
        cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();

        cache.reset(&token).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
        assert!(
            cache
                .get_by_unique_key::<Customer>(&email("ann@example.com"))
                .is_none()
        );
    }

    #[test]
    fn test_reset_empty_cache() {
        let (token, mut cache) = cache();
        assert!(cache.reset(&token).is_ok());
    }

    #[test]
    fn test_evict_clean_entry() {
        let (_, mut cache) = cache();
        let proxy = cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();

        let evicted = cache.evict::<Customer>(1i64).unwrap().unwrap();
        assert!(evicted.ptr_eq(&proxy));
        assert!(!cache.contains::<Customer>(1i64));
        assert!(
            cache
                .get_by_unique_key::<Customer>(&email("ann@example.com"))
                .is_none()
        );
        assert_eq!(cache.stats(), CacheStats::default());
        assert!(cache.evict::<Customer>(1i64).unwrap().is_none());
    }

    #[test]
    fn test_evict_dirty_entry_fails_discard_succeeds() {
        let (token, mut cache) = cache();
        let proxy = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        proxy.set_total(150).unwrap();

        let err = cache.evict::<Order>(7i64).unwrap_err();
        assert!(matches!(err, CacheError::DirtyEviction { .. }));
        assert!(cache.contains::<Order>(7i64));

        assert!(cache.discard_changes::<Order>(7i64).is_some());
        assert!(!cache.has_pending_changes());
        assert!(cache.reset(&token).is_ok());
    }

    #[test]
    fn test_stats() {
        let (_, mut cache) = cache();
        cache
            .register_by_alternate_key(Customer::new(1, "ann@example.com"), email("ann@example.com"))
            .unwrap();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        order.set_total(1).unwrap();

        let stats = cache.stats();
        assert_eq!(
            stats,
            CacheStats {
                entity_types: 2,
                proxies: 2,
                alternate_keys: 1,
                recorders: 2,
                dirty_recorders: 1,
            }
        );
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["dirty_recorders"], 1);
    }

    #[test]
    fn test_register_propagates_wrap_errors() {
        let (_, mut cache) = cache();
        #[derive(Debug)]
        struct Unkeyed;
        impl Entity for Unkeyed {
            fn metadata() -> &'static entitycache_core::EntityMetadata {
                static FIELDS: &[entitycache_core::FieldInfo] =
                    &[entitycache_core::FieldInfo::new("id", "id")];
                static META: entitycache_core::EntityMetadata =
                    entitycache_core::EntityMetadata::new("Unkeyed", "unkeyed", "id", FIELDS);
                &META
            }
            fn field_value(&self, field: &str) -> Option<Value> {
                (field == "id").then_some(Value::Null)
            }
        }

        let err = cache.register_by_identifier(Unkeyed).unwrap_err();
        assert!(matches!(err, CacheError::NullIdentifier { .. }));
        assert!(cache.is_empty());
    }
}
