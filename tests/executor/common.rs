//! Common test utilities for executor tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use batchsql::{
    Command, Database, ErrorCallback, Orm, ResultSet, Schema, SqlError, SuccessCallback, Transaction,
    TransactionBody, Value,
};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (RUST_LOG filters it).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub const SCHEMA: &str = r#"
[[tables]]
name = "users"
columns = [
    { name = "_id", type = "INTEGER", primary_key = true },
    { name = "name", type = "TEXT" },
    { name = "age", type = "INTEGER" },
]

[[tables]]
name = "pets"
columns = [
    { name = "_id", type = "INTEGER", primary_key = true },
    { name = "owner", type = "INTEGER" },
    { name = "kind", type = "TEXT" },
]
"#;

pub fn schema() -> Schema {
    Schema::from_toml(SCHEMA).unwrap()
}

/// Orm over `database` with the test schema loaded.
pub fn orm(database: Arc<dyn Database>) -> Orm {
    let mut orm = Orm::new(database);
    orm.new_models(&schema()).unwrap();
    orm
}

/// Poll until the command has drained everything or five seconds pass.
pub fn wait_idle(command: &Command) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if command.is_idle() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    command.is_idle()
}

// ============================================================================
// ThreadedDatabase - completes statements on a worker thread
// ============================================================================

struct Job {
    text: String,
    params: Vec<Value>,
    on_success: SuccessCallback,
    on_error: ErrorCallback,
}

/// Statement recorded by [`ThreadedDatabase`].
#[derive(Debug, Clone, PartialEq)]
pub struct Logged {
    pub transaction: usize,
    pub text: String,
    pub params: Vec<Value>,
}

struct Shared {
    log: Mutex<Vec<Logged>>,
    failing: Mutex<Vec<String>>,
    issued: AtomicUsize,
    completed: AtomicUsize,
    transactions: AtomicUsize,
    overlaps: AtomicUsize,
}

/// Database handle whose callbacks always arrive on another thread.
///
/// Each transaction's statements are handed to a worker over a channel and
/// completed in reverse order, so the command sees out-of-order,
/// cross-thread completions.
pub struct ThreadedDatabase {
    shared: Arc<Shared>,
    jobs: Mutex<Option<Sender<Vec<Job>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedDatabase {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(Shared {
            log: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
        });
        let (sender, receiver) = unbounded::<Vec<Job>>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("threaded-db".into())
            .spawn(move || {
                for jobs in receiver {
                    for job in jobs.into_iter().rev() {
                        let fail = {
                            let failing = worker_shared.failing.lock();
                            failing.iter().any(|p| {
                                job.text.contains(p.as_str())
                                    || job.params.iter().any(|v| v.to_string().contains(p.as_str()))
                            })
                        };
                        worker_shared.completed.fetch_add(1, Ordering::SeqCst);
                        if fail {
                            (job.on_error)(SqlError::with_code(19, "constraint failed"));
                        } else {
                            (job.on_success)(ResultSet::affected(1, None));
                        }
                    }
                }
            })
            .unwrap();
        Arc::new(Self {
            shared,
            jobs: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn fail_when(&self, pattern: &str) {
        self.shared.failing.lock().push(pattern.to_string());
    }

    pub fn log(&self) -> Vec<Logged> {
        self.shared.log.lock().clone()
    }

    pub fn transactions(&self) -> usize {
        self.shared.transactions.load(Ordering::SeqCst)
    }

    /// Transactions opened while statements of an earlier one were unfinished.
    pub fn overlaps(&self) -> usize {
        self.shared.overlaps.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadedDatabase {
    fn drop(&mut self) {
        self.jobs.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

struct Collect<'a> {
    shared: &'a Shared,
    transaction: usize,
    jobs: Vec<Job>,
}

impl Transaction for Collect<'_> {
    fn execute_sql(&mut self, text: &str, params: &[Value], on_success: SuccessCallback, on_error: ErrorCallback) {
        self.shared.issued.fetch_add(1, Ordering::SeqCst);
        self.shared.log.lock().push(Logged {
            transaction: self.transaction,
            text: text.to_string(),
            params: params.to_vec(),
        });
        self.jobs.push(Job {
            text: text.to_string(),
            params: params.to_vec(),
            on_success,
            on_error,
        });
    }
}

impl Database for ThreadedDatabase {
    fn transaction(&self, body: TransactionBody) {
        let shared = &*self.shared;
        if shared.issued.load(Ordering::SeqCst) != shared.completed.load(Ordering::SeqCst) {
            shared.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let transaction = shared.transactions.fetch_add(1, Ordering::SeqCst) + 1;
        let mut collect = Collect {
            shared,
            transaction,
            jobs: Vec::new(),
        };
        body(&mut collect);
        if let Some(sender) = self.jobs.lock().as_ref() {
            let _ = sender.send(collect.jobs);
        }
    }
}
