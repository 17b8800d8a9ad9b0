//! Error types for schema validation.

use thiserror::Error;

/// Declaration-time schema errors.
///
/// These are raised while a query is being assembled, before any SQL is
/// handed to a driver, so callers can tell a malformed query apart from
/// a rejected one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Table absent from the registry.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Column or alias absent from the schema.
    #[error("invalid column: {0}")]
    InvalidColumn(String),

    /// Value failed type coercion or validation.
    #[error("invalid data for column {column}: {reason}")]
    InvalidDataForColumn {
        /// Offending column name.
        column: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Result type alias for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
