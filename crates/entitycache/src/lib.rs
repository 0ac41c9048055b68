//! entitycache - a session-scoped identity cache with change-tracking proxies.
//!
//! entitycache provides the identity-map / unit-of-work layer of an ORM:
//!
//! - One live proxy per entity type and identifier within a session
//! - Lookup by identifier or by composite alternate keys
//! - Value-diffing dirty tracking on every mutator call
//! - Optimistic-concurrency predicates (identifier and version) per entity
//! - Flush plans that emit only the changed columns
//!
//! # Quick Start
//!
//! ```ignore
//! use entitycache::prelude::*;
//!
//! #[derive(Entity, Debug, Clone)]
//! #[entity(table = "orders")]
//! struct Order {
//!     #[entity(id, readonly)]
//!     id: i64,
//!     #[entity(version, no_setter)]
//!     ver: i32,
//!     total: i64,
//! }
//!
//! let token = SessionToken::new();
//! let mut cache = IdentityCache::new(token);
//!
//! let order = cache.register_by_identifier(Order { id: 7, ver: 1, total: 100 })?;
//! order.set_total(150)?;
//!
//! // Hand the pending changes to whatever executes statements
//! FlushPlan::from_cache(&cache).execute(&mut executor)?;
//!
//! cache.reset(&token)?;
//! ```

// Re-export all public types from sub-crates
pub use entitycache_core::{
    ColumnEquals, Condition, ConfigError, Embeds, Entity, EntityMetadata, EqualityPredicates, Error,
    FieldInfo, PredicateFactory, QueryError, QueryErrorKind, Result, Value, conjunction,
    quote_ident,
};

pub use entitycache_macros::Entity;

pub use entitycache_session::{
    Assignment, CacheConfig, CacheError, CacheStats, ChangeRecorder, FieldSource, FlushPlan,
    FlushResult, IdentityCache, LookupKey, MutationDispatchTable, MutatorId, ProxyFactory,
    SessionToken, Tracked, UniqueKey, UpdateExecutor, UpdateOp,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use entitycache::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, Condition, Entity, Error, FlushPlan, FlushResult, IdentityCache,
        MutatorId, SessionToken, Tracked, UniqueKey, UpdateExecutor, UpdateOp, Value,
    };
}

#[cfg(test)]
mod derive_tests {
    use super::*;

    #[derive(Entity, Debug, Clone, PartialEq)]
    struct Tag {
        #[entity(id, no_setter)]
        id: i64,
        label: String,
        #[entity(skip)]
        hits: u32,
    }

    #[derive(Entity, Debug, Clone, PartialEq)]
    #[entity(table = "line_items")]
    struct LineItem {
        #[entity(id, readonly)]
        id: i64,
        #[entity(version, no_setter)]
        rev: i64,
        #[entity(column = "qty", setter = "change_quantity")]
        quantity: i32,
        note: Option<String>,
    }

    #[test]
    fn test_default_table_name_and_fields() {
        let meta = Tag::metadata();
        assert_eq!(meta.entity, "Tag");
        assert_eq!(meta.table, "tag");
        assert_eq!(meta.identifier, "id");
        assert!(meta.version.is_none());

        let names: Vec<&str> = meta.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["id", "label"]);
        assert!(meta.own_field("id").unwrap().setter.is_none());
        assert_eq!(meta.own_field("label").unwrap().setter, Some("set_label"));
    }

    #[test]
    fn test_field_value_skips_unmapped_fields() {
        let tag = Tag {
            id: 1,
            label: "red".to_string(),
            hits: 9,
        };
        assert_eq!(tag.field_value("label"), Some(Value::Text("red".to_string())));
        assert_eq!(tag.field_value("hits"), None);
        assert_eq!(tag.identifier_value(), Some(Value::BigInt(1)));
    }

    #[test]
    fn test_attribute_overrides() {
        let meta = LineItem::metadata();
        assert_eq!(meta.table, "line_items");
        assert_eq!(meta.version, Some("rev"));

        let quantity = meta.own_field("quantity").unwrap();
        assert_eq!(quantity.column_name, "qty");
        assert_eq!(quantity.setter, Some("change_quantity"));

        let id = meta.own_field("id").unwrap();
        assert!(!id.updatable);
        assert!(meta.own_field("note").unwrap().nullable);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_generated_mutators_track_changes() {
        let token = SessionToken::new();
        let mut cache = IdentityCache::new(token);
        let item = cache
            .register_by_identifier(LineItem {
                id: 4,
                rev: 2,
                quantity: 1,
                note: None,
            })
            .unwrap();

        item.change_quantity(1).unwrap();
        assert!(!item.is_dirty());
        item.change_quantity(3).unwrap();
        item.set_note(Some("fragile".to_string())).unwrap();
        assert_eq!(item.recorder().dirty_fields(), vec!["note", "quantity"]);

        let err = item.set_id(5).unwrap_err();
        assert!(matches!(err, CacheError::NotUpdatable { field: "id", .. }));
        assert_eq!(item.read().id, 4);
    }
}
