//! Execution context.
//!
//! Replaces global table/event registries with one explicit object owned
//! by application bootstrap: the schema registry plus an optional
//! notification bus, threaded into queries and relations by `Rc`.

use std::rc::Rc;

use loam_sql_core::{Result as SchemaResult, SchemaRegistry, TableSchema};

use crate::bus::NotificationBus;

/// Schema registry plus optional notification bus.
#[derive(Debug)]
pub struct Context {
    schemas: SchemaRegistry,
    bus: Option<Rc<NotificationBus>>,
}

impl Context {
    /// Creates a context without a notification bus.
    ///
    /// Keep-synced relations stay functional but silent: their caches
    /// are never mirrored from save/delete events.
    #[must_use]
    pub const fn new(schemas: SchemaRegistry) -> Self {
        Self { schemas, bus: None }
    }

    /// Creates a context with a notification bus.
    #[must_use]
    pub const fn with_bus(schemas: SchemaRegistry, bus: Rc<NotificationBus>) -> Self {
        Self {
            schemas,
            bus: Some(bus),
        }
    }

    /// Returns the schema registry.
    #[must_use]
    pub const fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Looks up a table schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownTable` when absent.
    pub fn schema(&self, table: &str) -> SchemaResult<&TableSchema> {
        self.schemas.get(table)
    }

    /// Returns the notification bus, when one is configured.
    #[must_use]
    pub fn bus(&self) -> Option<&Rc<NotificationBus>> {
        self.bus.as_ref()
    }
}
