//! Transactional database handle capability.
//!
//! The command engine never talks to a database directly. It consumes a
//! [`Database`] that can open a transaction and hand the body a
//! [`Transaction`] on which statements are issued. Results come back through
//! callbacks, which the handle may invoke synchronously inside `execute_sql`,
//! later from another thread, or in any order relative to issue order.

use serde::{Deserialize, Serialize};

use crate::Value;

/// Invoked once with the result of a successful statement.
pub type SuccessCallback = Box<dyn FnOnce(ResultSet) + Send>;

/// Invoked once with the error of a failed statement.
pub type ErrorCallback = Box<dyn FnOnce(SqlError) + Send>;

/// Body run by [`Database::transaction`] with the open transaction.
pub type TransactionBody = Box<dyn FnOnce(&mut dyn Transaction) + Send>;

/// An open transaction.
pub trait Transaction {
    /// Issue one statement. Exactly one of the callbacks must eventually run.
    fn execute_sql(
        &mut self,
        text: &str,
        params: &[Value],
        on_success: SuccessCallback,
        on_error: ErrorCallback,
    );
}

/// A handle able to open transactions.
///
/// Whether a transaction whose statements partially failed is committed or
/// rolled back is the handle's decision.
pub trait Database: Send + Sync {
    /// Open a transaction and run `body` inside it.
    fn transaction(&self, body: TransactionBody);
}

/// Error reported by a handle for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct SqlError {
    /// Driver-specific error code, when the driver has one
    pub code: Option<i32>,
    /// Human-readable message
    pub message: String,
}

impl SqlError {
    /// Error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Error with a driver code.
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// One result row: column names paired with values, in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Build a row from `(column, value)` pairs.
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Value at a position.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Raw result of one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Rows returned by a query; empty for writes
    pub rows: Vec<Row>,
    /// Rows changed by a write
    pub rows_affected: u64,
    /// Row id of the last inserted row, when the statement inserted one
    pub insert_id: Option<i64>,
}

impl ResultSet {
    /// Result of a write.
    pub fn affected(rows_affected: u64, insert_id: Option<i64>) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
            insert_id,
        }
    }

    /// Result of a query.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }
}
