//! Error types for the ORM.

use thiserror::Error;

use crate::driver::DriverError;
use loam_sql_core::SchemaError;

/// ORM-specific errors.
///
/// Declaration-time failures surface as `Schema` variants before any
/// driver call; execution-time failures surface as `Driver`, carrying
/// the external driver's message unmodified.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Declaration-time schema failure (invalid column, bad data).
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Failure from the external driver, propagated unmodified.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// No object found matching the requested key(s).
    #[error("object not found")]
    NotFound,

    /// Delete blocked by dependent rows under the restrict policy.
    #[error("delete restricted by dependent rows in {table}")]
    DeleteRestricted {
        /// Table holding the dependents.
        table: String,
    },

    /// Eager-load path naming no registered relation.
    #[error("unknown relation: {0}")]
    UnknownRelation(String),

    /// Relation operation that needs a bound parent ran without one.
    #[error("relation is not bound to a parent instance")]
    UnboundRelation,

    /// A row could not be materialized into an entity.
    #[error("materialization failed: {0}")]
    Materialize(String),
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
