//! Error types for statement compilation and command execution.
//!
//! All errors surfaced by this crate are represented by the [`Error`] enum.
//! These errors are:
//! - **Structured**: Each variant has typed fields for error details
//! - **Cloneable**: Rollback notifications carry them by value to every receiver
//!
//! # Categories
//!
//! | Category | Variants | Raised |
//! |----------|----------|--------|
//! | Compile | `Compile` | synchronously by `compile()` / `execute()` |
//! | Statement | `Statement` | asynchronously, only inside rollback notifications |
//! | Precondition | `Precondition` | synchronously by the `Orm` factories |
//! | Model | `Model` | schema, registry and record errors |
//! | System | `Config`, `Io` | config files |

use crate::database::SqlError;
use crate::selection::CompileError;

/// Command layer errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    // ==================== Compile ====================
    /// A selection's clause description has an unrecognized shape
    #[error("cannot compile {selection}: {source}")]
    Compile {
        /// Name of the offending selection
        selection: String,
        /// What was wrong with its description
        #[source]
        source: CompileError,
    },

    // ==================== Statement ====================
    /// The database handle reported a statement failure
    #[error("statement failed: {0}")]
    Statement(#[from] SqlError),

    // ==================== Precondition ====================
    /// An operation ran before the state it needs was established
    #[error("precondition failed: {reason}")]
    Precondition {
        /// What was missing
        reason: String,
    },

    // ==================== Model ====================
    /// Schema, registry or record error
    #[error(transparent)]
    Model(#[from] batchsql_core::Error),

    // ==================== System ====================
    /// Configuration value or file content is invalid
    #[error("invalid config: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },

    /// Reading or writing a file failed
    #[error("I/O error: {reason}")]
    Io {
        /// Underlying error message
        reason: String,
    },
}

impl Error {
    /// Wrap a compile error with the name of the selection that raised it.
    pub fn compile(selection: impl Into<String>, source: CompileError) -> Self {
        Error::Compile {
            selection: selection.into(),
            source,
        }
    }

    /// Shorthand for [`Error::Precondition`].
    pub fn precondition(reason: impl Into<String>) -> Self {
        Error::Precondition {
            reason: reason.into(),
        }
    }

    /// Whether this error came from compiling a selection.
    pub fn is_compile(&self) -> bool {
        matches!(self, Error::Compile { .. })
    }
}
