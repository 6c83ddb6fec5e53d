//! batchsql - batched, transactional SQL over any database handle
//!
//! batchsql turns model objects into parameterized statements and runs them
//! in ordered batches, one transaction per batch, reporting every
//! statement's begin, commit or rollback to registered receivers.
//!
//! # Quick Start
//!
//! ```ignore
//! use batchsql::{Command, HandlerReceiver, InsertOptions, Orm, Schema};
//!
//! let mut orm = Orm::new(database);
//! orm.new_models(&Schema::from_toml(SCHEMA)?)?;
//!
//! let ada = orm.new_model_instance("users")?.with("name", "ada");
//! let (handler, events) = HandlerReceiver::channel();
//! let command = orm.new_command_with_receiver(Arc::new(handler))?;
//! command.add_selection(vec![orm.new_insert(Arc::new(ada), InsertOptions::default())?]);
//! command.execute()?;
//! ```
//!
//! # Architecture
//!
//! Statement building and the command queue live in `batchsql-executor`;
//! table metadata, values and records live in `batchsql-core`. Only the
//! executor API is re-exported here. Enable the `sqlite` feature for a
//! ready-made `SqliteDatabase` handle.

// Re-export the public API from batchsql-executor
pub use batchsql_executor::*;
