//! # batchsql executor
//!
//! Statement builders and the batched command engine.
//!
//! - [`Selection`] - one unit of SQL work against a model, compiled into a
//!   parameterized [`CompiledStatement`]
//! - [`Command`] - queues batches of selections and runs each batch inside
//!   one transaction of a [`Database`] handle
//! - [`Receiver`] - observer of begin / commit / rollback events
//! - [`Orm`] - factory tying a model registry, selections and commands together
//!
//! ## Quick Start
//!
//! ```text
//! use batchsql_executor::{Command, InsertOptions, Selection};
//!
//! let command = Command::new(database);
//! command.add_receiver(receiver);
//! command.add_selection(vec![
//!     Selection::insert(ada, InsertOptions::default()),
//!     Selection::insert(bob, InsertOptions::default()),
//! ]);
//! command.execute()?;
//! ```
//!
//! ## Statement Shapes
//!
//! | Selection | Text |
//! |-----------|------|
//! | Drop | `DROP TABLE IF EXISTS t;` |
//! | Insert | `INSERT[ OR X] INTO t(a,b) VALUES(?,?)` |
//! | Delete | `DELETE FROM t WHERE ...` |
//! | Update | `UPDATE t SET ... [JOIN ...] WHERE ...` |
//! | Select | `SELECT ... FROM t [JOIN ...] WHERE ... [ORDER ...]` |

#![warn(missing_docs)]

mod command;
mod config;
mod database;
mod error;
mod orm;
mod receiver;
mod result;
mod scheduler;
mod selection;

#[cfg(feature = "sqlite")]
mod sqlite;

// Test modules
#[cfg(test)]
mod tests;

// =============================================================================
// Public API
// =============================================================================

pub use command::{BatchId, Command, Phase};
pub use config::{CommandConfig, FailurePolicy, CONFIG_FILE_NAME};
pub use database::{
    Database, ErrorCallback, ResultSet, Row, SqlError, SuccessCallback, Transaction, TransactionBody,
};
pub use error::Error;
pub use orm::Orm;
pub use receiver::{Action, ActionKind, CallbackReceiver, HandlerReceiver, Message, Receiver};
pub use result::QueryResult;
pub use scheduler::{Scheduler, Task, TimerScheduler};
pub use selection::{
    Algorithm, Batch, CaseArm, CaseColumn, ClauseDescriptor, CompileError, CompiledStatement,
    ConflictAlgorithm, DeleteOptions, FromDescription, InsertOptions, Join, JoinKind, Membership,
    SelectAlgorithm, SelectOptions, Selection, SelectionKind, UpdateAlgorithm, UpdateOptions,
    WhereAlgorithm,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use batchsql_core::{ColumnInfo, Model, Record, Registry, Schema, SharedModel, TableInfo, Value};

/// Result type for command layer operations.
pub type Result<T> = std::result::Result<T, Error>;
