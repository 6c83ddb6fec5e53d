//! Error types for the model layer
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//! Errors are `Clone + PartialEq` so they can travel inside notifications.

use thiserror::Error;

/// Result type alias for model-layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading schemas or building records
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Table metadata failed validation
    #[error("invalid schema: {reason}")]
    InvalidSchema {
        /// What was wrong
        reason: String,
    },

    /// No table with this name is registered
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Requested table name
        table: String,
    },

    /// A property could not be converted into a column value
    #[error("invalid value for {table}.{column}: {reason}")]
    InvalidValue {
        /// Table name
        table: String,
        /// Column name
        column: String,
        /// Why the conversion failed
        reason: String,
    },

    /// JSON/TOML decoding failed
    #[error("serialization error: {reason}")]
    Serialization {
        /// Decoder message
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidSchema`].
    pub fn invalid_schema(reason: impl Into<String>) -> Self {
        Error::InvalidSchema {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Serialization {
            reason: e.to_string(),
        }
    }
}
