//! # loam-orm
//!
//! A synchronous, driver-agnostic ORM core with relation resolution.
//!
//! This crate provides:
//! - `Entity` trait for row-mapped domain objects
//! - `FluentQuery` for schema-checked, chainable queries
//! - `HasOne`/`HasMany`/`HasForeign`/`ManyToMany` relations with
//!   batched eager loading
//! - `Collection` for ordered, keyed result sets with delta memory
//! - `Context` carrying the schema registry and an optional
//!   notification bus
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use loam_orm::{Context, FluentQuery};
//! use loam_sql_core::Where;
//!
//! fn example(ctx: &Rc<Context>, driver: &dyn loam_orm::Driver) -> loam_orm::Result<()> {
//!     // Fetch active users, newest first
//!     let mut query = FluentQuery::<User>::new(ctx)?;
//!     query
//!         .and_where(Where::eq("is_active", true))?
//!         .order_by("id", loam_sql_core::OrderDirection::Desc)?
//!         .take(10);
//!     let users = query.results(driver)?;
//!
//!     // Point lookup
//!     let user = query.find_or_fail(driver, 1)?;
//!     Ok(())
//! }
//! ```
//!
//! Queries are lazy: nothing reaches the driver until a terminal
//! (`results`, `first`, `count`, `find*`) runs, and every column
//! reference is validated against the registered schemas at declaration
//! time, before any SQL is emitted.
//!
//! ## Eager loading
//!
//! Declaring `with("books")` on a query resolves the relation for the
//! whole result set in one extra query, however many parents matched:
//!
//! ```ignore
//! let mut query = FluentQuery::<Author>::new(ctx)?;
//! query.with("books", None);
//! let authors = query.results(driver)?; // 2 queries total
//! ```

pub mod bus;
pub mod collection;
pub mod context;
pub mod driver;
pub mod entity;
pub mod error;
pub mod query;
pub mod relation;

pub use bus::{EventKind, Notification, NotificationBus, SubscriptionId};
pub use collection::Collection;
pub use context::Context;
pub use driver::{row, Driver, DriverError, ExecResult, RecordingDriver, Row};
pub use entity::{
    delete_entity, no_customize, save_entity, split_path, Customize, Entity, EntitySaver,
    ValueSaver,
};
pub use error::{OrmError, Result};
pub use query::{FluentQuery, BASE_ALIAS};
pub use relation::{BelongsToMany, DeletePolicy, HasForeign, HasMany, HasOne, ManyToMany};
