//! The external driver seam.
//!
//! The engine renders literal SQL and hands finished statements to a
//! [`Driver`]; it never binds parameters or manages connections. Every
//! call is synchronous and blocking, and failures come back unmodified
//! inside [`DriverError`].

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

use loam_sql_core::SqlValue;

/// One raw result row, column name to raw value.
pub type Row = BTreeMap<String, SqlValue>;

/// Outcome of one executed statement.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Result rows, empty for write statements.
    pub rows: Vec<Row>,
    /// Rows affected by a write.
    pub affected: u64,
    /// Auto-generated key from the last INSERT, when the driver reports one.
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    /// Wraps a row set.
    #[must_use]
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Reads the single scalar cell of a one-row result.
    #[must_use]
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.values().next())
    }
}

/// Failure reported by the external driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

/// A synchronous database driver.
pub trait Driver {
    /// Executes one literal SQL statement.
    ///
    /// # Errors
    ///
    /// Returns the driver's own failure, which the engine propagates
    /// unmodified.
    fn execute(&self, sql: &str) -> std::result::Result<ExecResult, DriverError>;

    /// Total matching rows of the last limited SELECT, ignoring LIMIT.
    ///
    /// Drivers without this facility return `None` and the engine falls
    /// back to a rendered COUNT query.
    fn found_rows(&self) -> Option<u64> {
        None
    }
}

/// Builds a [`Row`] from column/value pairs.
#[must_use]
pub fn row(pairs: &[(&str, SqlValue)]) -> Row {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

/// In-memory scripted driver.
///
/// Pops canned results in order and records every executed statement,
/// which is what the test suites assert against (including the
/// zero-invocation checks for declaration-time failures).
#[derive(Debug, Default)]
pub struct RecordingDriver {
    responses: RefCell<VecDeque<ExecResult>>,
    executed: RefCell<Vec<String>>,
    total: std::cell::Cell<Option<u64>>,
}

impl RecordingDriver {
    /// Creates a driver with no canned responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a canned response.
    pub fn push_result(&self, result: ExecResult) {
        self.responses.borrow_mut().push_back(result);
    }

    /// Queues a canned row set.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.push_result(ExecResult::with_rows(rows));
    }

    /// Sets the value reported by [`Driver::found_rows`].
    pub fn set_found_rows(&self, total: u64) {
        self.total.set(Some(total));
    }

    /// Returns every statement executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    /// Returns how many statements have been executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.executed.borrow().len()
    }
}

impl Driver for RecordingDriver {
    fn execute(&self, sql: &str) -> std::result::Result<ExecResult, DriverError> {
        self.executed.borrow_mut().push(sql.to_string());
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_default())
    }

    fn found_rows(&self) -> Option<u64> {
        self.total.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_driver_pops_in_order() {
        let driver = RecordingDriver::new();
        driver.push_rows(vec![row(&[("id", SqlValue::Int(1))])]);

        let first = driver.execute("SELECT 1").unwrap();
        assert_eq!(first.rows.len(), 1);

        // Exhausted script yields empty results, not failures
        let second = driver.execute("SELECT 2").unwrap();
        assert!(second.rows.is_empty());

        assert_eq!(driver.executed(), vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(driver.call_count(), 2);
    }

    #[test]
    fn scalar_reads_first_cell() {
        let result = ExecResult::with_rows(vec![row(&[("COUNT(*)", SqlValue::Int(9))])]);
        assert_eq!(result.scalar(), Some(&SqlValue::Int(9)));
    }
}
