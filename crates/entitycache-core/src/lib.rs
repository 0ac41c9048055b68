//! Core types and traits for entitycache.
//!
//! This crate provides the foundational abstractions the session cache is
//! built against:
//!
//! - `Entity` trait, the capability interface of a trackable row object
//! - `EntityMetadata` and `FieldInfo` schema descriptors
//! - `Value`, the dynamically typed column value
//! - `Condition` and `PredicateFactory` for optimistic-concurrency predicates
//! - `Error`, the error type shared across crates

pub mod condition;
pub mod entity;
pub mod error;
pub mod field;
pub mod value;

pub use condition::{
    ColumnEquals, Condition, EqualityPredicates, PredicateFactory, conjunction, quote_ident,
};
pub use entity::{Embeds, Entity, EntityMetadata};
pub use error::{ConfigError, Error, QueryError, QueryErrorKind, Result};
pub use field::FieldInfo;
pub use value::Value;
