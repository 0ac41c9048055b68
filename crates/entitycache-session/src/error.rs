//! Error type for session cache operations.

use crate::SessionToken;
use entitycache_core::{Error, Value};

/// Failures raised by the session cache.
///
/// Every variant except [`CacheError::StaleEntity`] and
/// [`CacheError::Execution`] signals a programming or schema error: they
/// are reported at the call that triggered them and are never retried.
#[derive(Debug)]
pub enum CacheError {
    /// The entity descriptor failed validation.
    InvalidMetadata {
        /// Entity type name.
        entity: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// Two fields declare the same mutator.
    DuplicateMutator {
        /// Entity type name.
        entity: &'static str,
        /// The shared mutator name.
        mutator: &'static str,
        /// Field registered first.
        existing: &'static str,
        /// Field that collided with it.
        field: &'static str,
    },
    /// A proxy was asked to run a mutator its dispatch table does not know.
    UnregisteredMutator {
        /// Entity type name.
        entity: &'static str,
        /// The unknown mutator.
        mutator: &'static str,
    },
    /// A mutator targets a field declared not updatable.
    NotUpdatable {
        /// Entity type name.
        entity: &'static str,
        /// The protected field.
        field: &'static str,
    },
    /// A mutator wrote a field other than the one it is registered for.
    ///
    /// The write is discarded.
    UndeclaredWrite {
        /// Entity type name.
        entity: &'static str,
        /// The mutator that was run.
        mutator: &'static str,
        /// The field it changed without being registered for it.
        field: &'static str,
    },
    /// The entity's accessor does not expose a field its metadata declares.
    UnknownField {
        /// Entity type name.
        entity: &'static str,
        /// The missing field.
        field: &'static str,
    },
    /// An instance was wrapped before it had an identifier.
    NullIdentifier {
        /// Entity type name.
        entity: &'static str,
        /// The identifier field.
        field: &'static str,
    },
    /// A versioned instance was wrapped without a version value.
    NullVersion {
        /// Entity type name.
        entity: &'static str,
        /// The version field.
        field: &'static str,
    },
    /// A dispatch table was used with an instance of another type.
    TypeMismatch {
        /// Type the table was built for.
        expected: &'static str,
        /// Type actually supplied.
        actual: &'static str,
    },
    /// A unique key was built from mismatched or invalid parts.
    InvalidUniqueKey {
        /// What is wrong with it.
        message: String,
    },
    /// A cache was reset with a token from another session.
    SessionMismatch {
        /// Token the cache was created for.
        expected: SessionToken,
        /// Token the caller presented.
        actual: SessionToken,
    },
    /// Strict mode refused to replace a proxy with unflushed changes.
    DirtyReregistration {
        /// Entity type name.
        entity: &'static str,
        /// Identifier of the dirty entry.
        identifier: Value,
    },
    /// An entry with unflushed changes was evicted.
    DirtyEviction {
        /// Entity type name.
        entity: &'static str,
        /// Identifier of the dirty entry.
        identifier: Value,
    },
    /// An UPDATE guarded by the optimistic predicates matched no row.
    StaleEntity {
        /// Entity type name.
        entity: &'static str,
        /// Identifier of the stale entry.
        identifier: Value,
    },
    /// The statement executor failed.
    Execution(Error),
}

impl CacheError {
    /// Whether this error reports a schema or programming mistake.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            CacheError::StaleEntity { .. } | CacheError::Execution(_)
        )
    }

    /// Whether this error reports a concurrent modification.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CacheError::StaleEntity { .. })
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::InvalidMetadata { entity, message } => {
                write!(f, "Invalid metadata for {}: {}", entity, message)
            }
            CacheError::DuplicateMutator {
                entity,
                mutator,
                existing,
                field,
            } => write!(
                f,
                "Mutator {}::{} is declared by both '{}' and '{}'",
                entity, mutator, existing, field
            ),
            CacheError::UnregisteredMutator { entity, mutator } => {
                write!(f, "No registered field for mutator {}::{}", entity, mutator)
            }
            CacheError::NotUpdatable { entity, field } => {
                write!(f, "Field {}.{} is not updatable", entity, field)
            }
            CacheError::UndeclaredWrite {
                entity,
                mutator,
                field,
            } => write!(
                f,
                "Mutator {}::{} changed field '{}' it is not registered for",
                entity, mutator, field
            ),
            CacheError::UnknownField { entity, field } => {
                write!(f, "Entity {} does not expose field '{}'", entity, field)
            }
            CacheError::NullIdentifier { entity, field } => write!(
                f,
                "Cannot track {} with null identifier '{}'",
                entity, field
            ),
            CacheError::NullVersion { entity, field } => {
                write!(f, "Cannot track {} with null version '{}'", entity, field)
            }
            CacheError::TypeMismatch { expected, actual } => write!(
                f,
                "Dispatch table for {} used with instance of {}",
                expected, actual
            ),
            CacheError::InvalidUniqueKey { message } => {
                write!(f, "Invalid unique key: {}", message)
            }
            CacheError::SessionMismatch { expected, actual } => write!(
                f,
                "Cache belongs to session {} but was reset by session {}",
                expected, actual
            ),
            CacheError::DirtyReregistration { entity, identifier } => write!(
                f,
                "{} {} has unflushed changes and cannot be re-registered",
                entity, identifier
            ),
            CacheError::DirtyEviction { entity, identifier } => write!(
                f,
                "{} {} has unflushed changes and cannot be evicted",
                entity, identifier
            ),
            CacheError::StaleEntity { entity, identifier } => write!(
                f,
                "{} {} was modified concurrently (update matched no rows)",
                entity, identifier
            ),
            CacheError::Execution(e) => write!(f, "Flush failed: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for CacheError {
    fn from(e: Error) -> Self {
        CacheError::Execution(e)
    }
}

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Execution(inner) => inner,
            other if other.is_configuration() => Error::config(other.to_string()),
            other => Error::Custom(other.to_string()),
        }
    }
}
