//! # loam-sql-core
//!
//! SQL fragment rendering, filter trees and schema descriptors for the
//! loam ORM.
//!
//! This crate provides:
//! - [`SqlValue`] / [`ToSqlValue`] for literal value rendering with
//!   injection-safe escaping
//! - [`Where`] filter trees built functionally and rendered as a pure fold
//! - [`Tag`] clause AST and the [`Builder`] fragment list
//! - [`TableSchema`] / [`SchemaRegistry`] descriptors with pluggable
//!   [`ColumnType`] handles
//!
//! Rendering is deterministic throughout: identical state always yields
//! byte-identical SQL. Nothing here talks to a database; finished
//! statements are handed to an external driver by the `loam-orm` crate.
//!
//! ## Quick Start
//!
//! ```
//! use loam_sql_core::{Builder, Tag, Where};
//!
//! let mut b = Builder::new();
//! b.push(Tag::Select { distinct: false, columns: vec!["t1.id".into()] });
//! b.push(Tag::From { table: "users".into(), alias: "t1".into() });
//! b.push(Tag::Where(Where::eq("t1.role", "admin")));
//! assert_eq!(
//!     b.render(),
//!     "SELECT t1.id FROM users t1 WHERE t1.role = 'admin'"
//! );
//! ```

mod error;
mod expr;
mod schema;
mod tag;
mod types;
mod value;

pub use error::{Result, SchemaError};
pub use expr::{BoolOp, CompareOp, Where};
pub use schema::{Column, Mutator, SchemaRegistry, TableSchema, Validator};
pub use tag::{Builder, Fragment, JoinKind, OrderDirection, Tag};
pub use types::{
    BooleanColumn, ColumnType, DateColumn, DateTimeColumn, EnumColumn, FloatColumn, IntegerColumn,
    StorageKind, TextColumn,
};
pub use value::{SqlValue, ToSqlValue};
