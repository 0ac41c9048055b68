//! Error types shared by the entity cache crates.

use std::fmt;

/// The primary error type returned across crate boundaries.
#[derive(Debug)]
pub enum Error {
    /// Schema or configuration errors (bad metadata, misuse of the cache)
    Config(ConfigError),
    /// Errors reported by the component executing statements
    Query(QueryError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Other database error
    Database,
}

impl Error {
    /// Build a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a query error of the given kind.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: None,
            sqlstate: None,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (deadlock, serialization failure)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization
            ),
            _ => false,
        }
    }

    /// Is this a configuration error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Custom(_) => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Result type alias for entity cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_config() {
        let err = Error::config("identifier field 'id' is not declared");
        assert_eq!(
            err.to_string(),
            "Configuration error: identifier field 'id' is not declared"
        );
        assert!(err.is_config());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_query_with_sqlstate() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Serialization,
            sql: Some("UPDATE orders SET total = $1".to_string()),
            sqlstate: Some("40001".to_string()),
            message: "could not serialize access".to_string(),
            source: None,
        });
        assert_eq!(
            err.to_string(),
            "Query error (SQLSTATE 40001): could not serialize access"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error as _;

        let err = Error::Config(ConfigError {
            message: "bad".to_string(),
            source: Some(Box::new(std::fmt::Error)),
        });
        assert!(err.source().is_some());
        assert!(Error::Custom("x".to_string()).source().is_none());
    }
}
