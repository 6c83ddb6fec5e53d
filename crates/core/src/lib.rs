//! Core types and traits for batchsql
//!
//! This crate defines the foundational types used by the statement builder
//! and the command engine:
//! - Value: bindable SQL value
//! - Model: the capability a selection compiles against
//! - TableInfo / ColumnInfo / Schema: table metadata, validated once at load
//! - Record: generic Model backed by table metadata
//! - Registry: table name to metadata map handing out records
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod record;
pub mod registry;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use model::{Model, SharedModel};
pub use record::Record;
pub use registry::Registry;
pub use schema::{ColumnInfo, Schema, TableInfo, DEFAULT_PRIMARY_KEY};
pub use value::Value;
