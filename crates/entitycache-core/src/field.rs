//! Field descriptors.

/// Metadata about one mapped field of an entity.
///
/// A field is *mutable* when it declares a setter: the setter name is the
/// mutator identity the session layer dispatches on. A mutable field may
/// still be declared not updatable, in which case every attempt to change
/// it through a tracked proxy is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// Name of the mutator that writes this field, if any
    pub setter: Option<&'static str>,
    /// Whether UPDATE statements may change this field
    pub updatable: bool,
    /// Whether this field is nullable
    pub nullable: bool,
}

impl FieldInfo {
    /// Create a read-only field (no setter) that maps to `column_name`.
    pub const fn new(name: &'static str, column_name: &'static str) -> Self {
        Self {
            name,
            column_name,
            setter: None,
            updatable: true,
            nullable: false,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Declare the mutator that writes this field.
    pub const fn setter(mut self, name: &'static str) -> Self {
        self.setter = Some(name);
        self
    }

    /// Set the setter from optional.
    pub const fn setter_opt(mut self, name: Option<&'static str>) -> Self {
        self.setter = name;
        self
    }

    /// Set the updatable flag.
    pub const fn updatable(mut self, value: bool) -> Self {
        self.updatable = value;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Whether this field can be written through a mutator at all.
    pub const fn is_mutable(&self) -> bool {
        self.setter.is_some()
    }
}
