//! Executor Layer Tests
//!
//! Tests for the batchsql executor as seen through the public facade:
//! - Selection builders - model plus options compiled to `{text, params}`
//! - Command - batch queues over an asynchronous database handle
//! - CommandConfig - TOML configuration files
//! - SqliteDatabase - the rusqlite-backed handle (feature `sqlite`)

mod common;

mod command_flow;
mod statements;

#[cfg(feature = "sqlite")]
mod sqlite_store;
