//! SQLite transactional handle backed by rusqlite.
//!
//! Each batch runs in one `BEGIN IMMEDIATE ... COMMIT`. Every statement gets
//! its own SAVEPOINT, so a failing statement is undone on its own and its
//! siblings keep their effects:
//!
//! ```text
//! BEGIN IMMEDIATE
//!   SAVEPOINT stmt_0 → RELEASE            (ok)
//!   SAVEPOINT stmt_1 → ROLLBACK TO, RELEASE (failed)
//!   SAVEPOINT stmt_2 → RELEASE            (ok)
//! COMMIT                                  (CommitSurvivors)
//! ROLLBACK                                (RollbackAll, any failure)
//! ```
//!
//! Callbacks run after the transaction has finished and the connection lock
//! is released, so a receiver may issue its own queries. Under
//! `RollbackAll`, or when COMMIT itself fails, statements that had
//! succeeded are reported as failed.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use tracing::{debug, warn};

use crate::config::{CommandConfig, FailurePolicy};
use crate::database::{Database, ErrorCallback, ResultSet, Row, SqlError, SuccessCallback, Transaction, TransactionBody};
use crate::{Error, Result, Value};

struct Bind<'a>(&'a Value);

impl ToSql for Bind<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn sql_error(e: rusqlite::Error) -> SqlError {
    match &e {
        rusqlite::Error::SqliteFailure(code, message) => SqlError::with_code(
            code.extended_code,
            message.clone().unwrap_or_else(|| code.to_string()),
        ),
        _ => SqlError::new(e.to_string()),
    }
}

enum Outcome {
    Ok(SuccessCallback, ErrorCallback, ResultSet),
    Err(ErrorCallback, SqlError),
}

struct SqliteTransaction<'c> {
    conn: &'c Connection,
    begin_error: Option<SqlError>,
    savepoints: usize,
    outcomes: Vec<Outcome>,
}

impl SqliteTransaction<'_> {
    fn run(&self, text: &str, params: &[Value]) -> rusqlite::Result<ResultSet> {
        let mut stmt = self.conn.prepare(text)?;
        let binds = params.iter().map(Bind);
        if stmt.column_count() > 0 {
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(binds))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut columns = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    columns.push((name.clone(), from_sql(row.get_ref(i)?)));
                }
                out.push(Row::new(columns));
            }
            Ok(ResultSet::with_rows(out))
        } else {
            let changed = stmt.execute(rusqlite::params_from_iter(binds))?;
            let inserted = text.trim_start().get(..6).map_or(false, |p| p.eq_ignore_ascii_case("insert"));
            let insert_id = (inserted && changed > 0).then(|| self.conn.last_insert_rowid());
            Ok(ResultSet::affected(changed as u64, insert_id))
        }
    }

    fn run_in_savepoint(&mut self, text: &str, params: &[Value]) -> std::result::Result<ResultSet, SqlError> {
        if let Some(e) = &self.begin_error {
            return Err(e.clone());
        }
        let name = format!("stmt_{}", self.savepoints);
        self.savepoints += 1;
        self.conn
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(sql_error)?;
        match self.run(text, params) {
            Ok(result) => {
                self.conn.execute_batch(&format!("RELEASE {name}")).map_err(sql_error)?;
                Ok(result)
            }
            Err(e) => {
                let undo = format!("ROLLBACK TO {name}; RELEASE {name}");
                if let Err(undo_err) = self.conn.execute_batch(&undo) {
                    warn!(savepoint = %name, error = %undo_err, "savepoint rollback failed");
                }
                Err(sql_error(e))
            }
        }
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn execute_sql(&mut self, text: &str, params: &[Value], on_success: SuccessCallback, on_error: ErrorCallback) {
        let outcome = match self.run_in_savepoint(text, params) {
            Ok(result) => Outcome::Ok(on_success, on_error, result),
            Err(e) => {
                debug!(error = %e, "statement failed");
                Outcome::Err(on_error, e)
            }
        };
        self.outcomes.push(outcome);
    }
}

/// [`Database`] over one SQLite connection.
///
/// Callbacks run synchronously on the thread that called `transaction`.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    policy: FailurePolicy,
}

impl SqliteDatabase {
    /// Open or create a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Io {
            reason: format!("failed to open '{}': {}", path.display(), e),
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Io {
            reason: format!("failed to open in-memory database: {e}"),
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            policy: FailurePolicy::default(),
        }
    }

    /// Set the partial-failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply the handle settings of a loaded config.
    pub fn with_config(self, config: &CommandConfig) -> Self {
        self.with_policy(config.failure_policy)
    }

    /// Partial-failure policy.
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run `f` with the connection, outside any batch.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.conn.lock())
    }
}

impl Database for SqliteDatabase {
    fn transaction(&self, body: TransactionBody) {
        let (outcomes, rolled_back) = {
            let conn = self.conn.lock();
            let begin_error = conn.execute_batch("BEGIN IMMEDIATE").err().map(sql_error);
            let mut tx = SqliteTransaction {
                conn: &conn,
                begin_error,
                savepoints: 0,
                outcomes: Vec::new(),
            };
            body(&mut tx);
            let SqliteTransaction {
                begin_error,
                outcomes,
                ..
            } = tx;

            let failed = outcomes.iter().filter(|o| matches!(o, Outcome::Err(..))).count();
            let rolled_back = if let Some(e) = begin_error {
                warn!(error = %e, "BEGIN failed");
                None
            } else if failed > 0 && self.policy == FailurePolicy::RollbackAll {
                debug!(failed, "rolling back batch");
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(error = %e, "ROLLBACK failed");
                }
                Some(SqlError::new("transaction rolled back: a statement in the batch failed"))
            } else {
                match conn.execute_batch("COMMIT") {
                    Ok(()) => None,
                    Err(e) => {
                        let e = sql_error(e);
                        warn!(error = %e, "COMMIT failed");
                        let _ = conn.execute_batch("ROLLBACK");
                        Some(SqlError {
                            code: e.code,
                            message: format!("commit failed: {}", e.message),
                        })
                    }
                }
            };
            (outcomes, rolled_back)
        };

        for outcome in outcomes {
            match (outcome, &rolled_back) {
                (Outcome::Ok(_, on_error, _), Some(e)) => on_error(e.clone()),
                (Outcome::Ok(on_success, _, result), None) => on_success(result),
                (Outcome::Err(on_error, e), _) => on_error(e),
            }
        }
    }
}
