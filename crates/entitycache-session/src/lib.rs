//! Session-scoped entity cache for entitycache.
//!
//! `entitycache-session` is the **identity map / unit-of-work layer**. Given a
//! plain entity loaded from a row it hands back a change-tracking proxy,
//! indexes that proxy by identifier and by alternate keys for the lifetime of
//! one session, and exposes the accumulated dirty state to the flush step.
//!
//! # Role In The Architecture
//!
//! - **Dispatch tables**: built once per entity type, shared by all sessions.
//! - **Tracked proxies**: forward every mutator to the entity and record the
//!   fields whose value actually changed.
//! - **Identity cache**: at most one live proxy per (entity type, identifier).
//! - **Flush planning**: minimal UPDATEs guarded by identifier and version
//!   predicates.
//!
//! # Example
//!
//! ```ignore
//! let token = SessionToken::new();
//! let mut cache = IdentityCache::new(token);
//!
//! let order = cache.register_by_identifier(Order { id: 7, ver: 1, total: 100 })?;
//! order.set_total(150)?;
//!
//! let plan = FlushPlan::from_cache(&cache);
//! plan.execute(&mut executor)?;
//!
//! cache.reset(&token)?;
//! ```

pub mod dispatch;
pub mod error;
pub mod flush;
pub mod identity_cache;
pub mod proxy;
pub mod recorder;
pub mod unique_key;

#[cfg(test)]
mod fixtures;

pub use dispatch::{MutationDispatchTable, MutatorId};
pub use error::CacheError;
pub use flush::{Assignment, FlushPlan, FlushResult, UpdateExecutor, UpdateOp};
pub use identity_cache::{CacheStats, IdentityCache, LookupKey};
pub use proxy::{ProxyFactory, Tracked};
pub use recorder::{ChangeRecorder, FieldSource};
pub use unique_key::UniqueKey;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Session Token
// ============================================================================

/// Identity of the unit of work that owns an [`IdentityCache`].
///
/// Tokens are unique within the process. A cache only accepts a reset from
/// the token it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionToken(u64);

impl SessionToken {
    /// Allocate a fresh token.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild a token from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Cache Configuration
// ============================================================================

/// Configuration for [`IdentityCache`] behavior.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Refuse to replace a cached proxy whose recorder has unflushed changes.
    ///
    /// When false (the default) re-registration is last-write-wins and the
    /// pending changes of the replaced proxy are dropped.
    pub reject_dirty_reregistration: bool,
    /// Log a warning when last-write-wins replacement drops pending changes.
    pub warn_on_dirty_replace: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reject_dirty_reregistration: false,
            warn_on_dirty_replace: true,
        }
    }
}

impl CacheConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that rejects dirty re-registration.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            reject_dirty_reregistration: true,
            ..Self::default()
        }
    }

    /// Set `reject_dirty_reregistration` (builder pattern).
    #[must_use]
    pub fn reject_dirty_reregistration(mut self, value: bool) -> Self {
        self.reject_dirty_reregistration = value;
        self
    }

    /// Set `warn_on_dirty_replace` (builder pattern).
    #[must_use]
    pub fn warn_on_dirty_replace(mut self, value: bool) -> Self {
        self.warn_on_dirty_replace = value;
        self
    }
}
