//! Hand-written entities shared by the unit tests of this crate.

use crate::dispatch::MutatorId;
use crate::error::CacheError;
use crate::proxy::Tracked;
use entitycache_core::{Entity, EntityMetadata, FieldInfo, Value};

/// Versioned, single-table entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub ver: i32,
    pub total: i64,
    pub note: Option<String>,
}

impl Order {
    pub fn new(id: i64, ver: i32, total: i64) -> Self {
        Self {
            id,
            ver,
            total,
            note: None,
        }
    }
}

impl Entity for Order {
    fn metadata() -> &'static EntityMetadata {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id", "id").setter("set_id").updatable(false),
            FieldInfo::new("ver", "ver").updatable(false),
            FieldInfo::new("total", "total").setter("set_total"),
            FieldInfo::new("note", "note").setter("set_note").nullable(true),
        ];
        static META: EntityMetadata =
            EntityMetadata::new("Order", "orders", "id", FIELDS).version("ver");
        &META
    }

    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "ver" => Some(Value::from(self.ver)),
            "total" => Some(Value::from(self.total)),
            "note" => Some(Value::from(self.note.clone())),
            _ => None,
        }
    }
}

impl Tracked<Order> {
    pub fn set_id(&self, id: i64) -> Result<(), CacheError> {
        self.invoke(MutatorId::new("set_id"), move |o| o.id = id)
    }

    pub fn set_total(&self, total: i64) -> Result<(), CacheError> {
        self.invoke(MutatorId::new("set_total"), move |o| o.total = total)
    }

    pub fn set_note(&self, note: Option<&str>) -> Result<(), CacheError> {
        let note = note.map(str::to_string);
        self.invoke(MutatorId::new("set_note"), move |o| o.note = note)
    }
}

/// Unversioned entity with a normalizing setter.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub email: String,
}

impl Customer {
    pub fn new(id: i64, email: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
        }
    }
}

impl Entity for Customer {
    fn metadata() -> &'static EntityMetadata {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id", "id"),
            FieldInfo::new("email", "email").setter("set_email"),
        ];
        static META: EntityMetadata = EntityMetadata::new("Customer", "customers", "id", FIELDS);
        &META
    }

    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "email" => Some(Value::from(self.email.as_str())),
            _ => None,
        }
    }
}

impl Tracked<Customer> {
    /// Stores the address lowercased.
    pub fn set_email(&self, email: &str) -> Result<(), CacheError> {
        let email = email.to_lowercase();
        self.invoke(MutatorId::new("set_email"), move |c| c.email = email)
    }
}

/// Parent table of [`Car`].
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: i64,
    pub ver: i64,
    pub make: String,
}

impl Entity for Vehicle {
    fn metadata() -> &'static EntityMetadata {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id", "id").updatable(false),
            FieldInfo::new("ver", "ver").updatable(false),
            FieldInfo::new("make", "make").setter("set_make"),
        ];
        static META: EntityMetadata =
            EntityMetadata::new("Vehicle", "vehicles", "id", FIELDS).version("ver");
        &META
    }

    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::from(self.id)),
            "ver" => Some(Value::from(self.ver)),
            "make" => Some(Value::from(self.make.as_str())),
            _ => None,
        }
    }
}

/// Entity split across `vehicles` and `cars`.
#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    pub vehicle: Vehicle,
    pub doors: i32,
}

impl Car {
    pub fn new(id: i64, ver: i64, make: &str, doors: i32) -> Self {
        Self {
            vehicle: Vehicle {
                id,
                ver,
                make: make.to_string(),
            },
            doors,
        }
    }
}

impl Entity for Car {
    fn metadata() -> &'static EntityMetadata {
        static FIELDS: &[FieldInfo] = &[FieldInfo::new("doors", "doors").setter("set_doors")];
        static META: EntityMetadata =
            EntityMetadata::new("Car", "cars", "id", FIELDS).parent(<Vehicle as Entity>::metadata);
        &META
    }

    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "doors" => Some(Value::from(self.doors)),
            other => self.vehicle.field_value(other),
        }
    }
}

impl Tracked<Car> {
    pub fn set_make(&self, make: &str) -> Result<(), CacheError> {
        let make = make.to_string();
        self.invoke(MutatorId::new("set_make"), move |c| c.vehicle.make = make)
    }

    pub fn set_doors(&self, doors: i32) -> Result<(), CacheError> {
        self.invoke(MutatorId::new("set_doors"), move |c| c.doors = doors)
    }
}
