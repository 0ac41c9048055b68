//! Composite alternate keys.

use crate::error::CacheError;
use entitycache_core::Value;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const PROPERTY_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Whether `name` can be used as a key property.
fn is_property_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| match Regex::new(PROPERTY_NAME_PATTERN) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(error = %e, "Property name pattern failed to compile");
            None
        }
    });
    pattern
        .as_ref()
        .map_or(!name.is_empty(), |regex| regex.is_match(name))
}

/// An alternate lookup key: property names paired with their values.
///
/// Equality and hashing are structural over both sequences, so two keys
/// built separately from the same names and values are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    properties: Vec<String>,
    values: Vec<Value>,
}

impl UniqueKey {
    /// Build a key from matching sequences of property names and values.
    ///
    /// Fails if the sequences are empty, differ in length, or a name is not
    /// an identifier.
    pub fn new<P, V>(
        properties: impl IntoIterator<Item = P>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, CacheError>
    where
        P: Into<String>,
        V: Into<Value>,
    {
        let properties: Vec<String> = properties.into_iter().map(Into::into).collect();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();

        if properties.is_empty() {
            return Err(CacheError::InvalidUniqueKey {
                message: "a unique key needs at least one property".to_string(),
            });
        }
        if properties.len() != values.len() {
            return Err(CacheError::InvalidUniqueKey {
                message: format!(
                    "{} properties but {} values",
                    properties.len(),
                    values.len()
                ),
            });
        }
        if let Some(bad) = properties.iter().find(|p| !is_property_name(p)) {
            return Err(CacheError::InvalidUniqueKey {
                message: format!("'{}' is not a valid property name", bad),
            });
        }

        Ok(Self { properties, values })
    }

    /// Build a single-property key.
    pub fn single(property: impl Into<String>, value: impl Into<Value>) -> Result<Self, CacheError> {
        Self::new([property.into()], [value.into()])
    }

    /// Property names, in key order.
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Values, in key order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of `property`, if it is part of the key.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties
            .iter()
            .position(|p| p == property)
            .map(|i| &self.values[i])
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Always false: keys have at least one component.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})=(", self.properties.join(", "))?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str(")")
    }
}
