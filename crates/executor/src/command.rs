//! Batch execution engine.
//!
//! A [`Command`] owns three queues of batches for one database handle:
//!
//! - **main**: batches added while the command is not processing
//! - **pending**: batches added while it is; promoted once the drain ends
//! - **in flight**: batches accepted by `execute()`, dispatched one at a time
//!
//! Each dispatched batch runs inside exactly one transaction. The batch is
//! complete when every issued statement has reported back, in whatever order
//! the handle chooses. Only then, after the configured timeout, does the
//! next batch start.
//!
//! # States
//!
//! ```text
//!            execute()                     last callback
//!   Idle ──────────────► Dispatching ─────────────────────► Draining
//!    ▲                                                          │
//!    └──────────────────────── after timeout ───────────────────┘
//! ```
//!
//! # Re-entrancy
//!
//! Handles may complete statements synchronously inside `execute_sql`, which
//! means the last callback of a batch can fire before `transaction()` has
//! returned. The drain loop is therefore a trampoline: a completion that
//! arrives while the loop is running only flags it to go round again, so
//! the next transaction is never opened from inside the previous one.
//! No internal lock is held while calling the handle, receivers or the
//! scheduler.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::CommandConfig;
use crate::database::{Database, ResultSet, SqlError, Transaction};
use crate::receiver::{Action, Receiver, Receivers};
use crate::result::QueryResult;
use crate::scheduler::{Scheduler, TimerScheduler};
use crate::selection::{Batch, CompiledStatement, Selection};
use crate::{Error, Result};

/// Identifies a queued batch for [`Command::remove_selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Where the engine is in its batch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transaction open; ready to dispatch
    Idle,
    /// A batch's statements are outstanding
    Dispatching,
    /// The batch completed; waiting out the timeout
    Draining,
}

struct QueuedBatch {
    id: BatchId,
    batch: Batch,
}

struct QueueState {
    main: VecDeque<QueuedBatch>,
    pending: VecDeque<QueuedBatch>,
    in_flight: VecDeque<QueuedBatch>,
    phase: Phase,
    processing: bool,
    remaining: Option<usize>,
    current_index: usize,
    driving: bool,
    rerun: bool,
    next_id: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            main: VecDeque::new(),
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            phase: Phase::Idle,
            processing: false,
            remaining: None,
            current_index: 0,
            driving: false,
            rerun: false,
            next_id: 0,
        }
    }

    /// Next batch to dispatch, promoting pending batches once the drain ends.
    fn next_batch(&mut self) -> Option<QueuedBatch> {
        if !self.processing || self.phase != Phase::Idle {
            return None;
        }
        if self.in_flight.is_empty() {
            self.processing = false;
            self.current_index = 0;
            let pending = std::mem::take(&mut self.pending);
            self.main.extend(pending);
            if self.main.is_empty() {
                return None;
            }
            trace!(batches = self.main.len(), "promoting pending batches");
            self.in_flight.extend(self.main.drain(..));
            self.processing = true;
        }
        let next = self.in_flight.pop_front()?;
        self.phase = Phase::Dispatching;
        self.remaining = None;
        Some(next)
    }
}

struct Inner {
    database: Arc<dyn Database>,
    timeout: Duration,
    scheduler: Option<Arc<dyn Scheduler>>,
    receivers: Receivers,
    state: Mutex<QueueState>,
}

/// Queue of selection batches executed one transaction at a time.
///
/// `Command` is a cheap handle; clones share the same queues. Completion
/// callbacks may arrive on any thread.
///
/// # Example
///
/// ```ignore
/// let command = Command::new(database);
/// command.add_receiver(Arc::new(HandlerReceiver::channel().0));
/// command.add_selection(vec![Selection::insert(user, InsertOptions::default())]);
/// command.execute()?;
/// ```
#[derive(Clone)]
pub struct Command {
    inner: Arc<Inner>,
}

impl Command {
    /// Command without an inter-batch delay.
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self::build(database, Duration::ZERO, None)
    }

    /// Command waiting `timeout` between batches on its own timer thread.
    pub fn with_timeout(database: Arc<dyn Database>, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Ok(Self::new(database));
        }
        let scheduler: Arc<dyn Scheduler> = Arc::new(TimerScheduler::new()?);
        Ok(Self::build(database, timeout, Some(scheduler)))
    }

    /// Command waiting `timeout` between batches on a caller-supplied scheduler.
    pub fn with_scheduler(database: Arc<dyn Database>, timeout: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::build(database, timeout, Some(scheduler))
    }

    /// Command configured from a [`CommandConfig`].
    pub fn from_config(database: Arc<dyn Database>, config: &CommandConfig) -> Result<Self> {
        Self::with_timeout(database, config.timeout())
    }

    fn build(database: Arc<dyn Database>, timeout: Duration, scheduler: Option<Arc<dyn Scheduler>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                database,
                timeout,
                scheduler,
                receivers: Receivers::default(),
                state: Mutex::new(QueueState::new()),
            }),
        }
    }

    /// The shared database handle.
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.inner.database
    }

    /// Delay between batches.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    // =========================================================================
    // Receivers
    // =========================================================================

    /// Register a receiver. Returns `false` if it was already registered.
    pub fn add_receiver(&self, receiver: Arc<dyn Receiver>) -> bool {
        self.inner.receivers.add(receiver)
    }

    /// Unregister a receiver. Returns `false` if it was not registered.
    pub fn remove_receiver(&self, receiver: &Arc<dyn Receiver>) -> bool {
        self.inner.receivers.remove(receiver)
    }

    /// Number of registered receivers.
    pub fn receiver_count(&self) -> usize {
        self.inner.receivers.len()
    }

    fn notify(&self, action: &Action) {
        self.inner.receivers.notify(self, action);
    }

    // =========================================================================
    // Queues
    // =========================================================================

    /// Queue a batch.
    ///
    /// While a drain is in progress the batch goes to the pending queue and
    /// runs after every in-flight batch.
    pub fn add_selection(&self, batch: impl Into<Batch>) -> BatchId {
        let batch = batch.into();
        let mut state = self.inner.state.lock();
        let id = BatchId(state.next_id);
        state.next_id += 1;
        let len = batch.len();
        if state.processing {
            state.pending.push_back(QueuedBatch { id, batch });
            debug!(batch = %id, selections = len, pending = state.pending.len(), "batch pending");
        } else {
            state.main.push_back(QueuedBatch { id, batch });
            debug!(batch = %id, selections = len, queued = state.main.len(), "batch queued");
        }
        id
    }

    /// Remove a queued batch.
    ///
    /// Looks in the main queue while idle and in the pending queue while
    /// processing. Batches already accepted by `execute()` cannot be removed.
    pub fn remove_selection(&self, id: BatchId) -> bool {
        let mut state = self.inner.state.lock();
        let queue = if state.processing {
            &mut state.pending
        } else {
            &mut state.main
        };
        match queue.iter().position(|queued| queued.id == id) {
            Some(position) => {
                queue.remove(position);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Start draining the main queue.
    ///
    /// A no-op while already processing. Returns the first compile error of
    /// the batches dispatched during this call; those selections were also
    /// reported to receivers as rollbacks, and their siblings still ran.
    pub fn execute(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.processing || state.main.is_empty() {
                return Ok(());
            }
            let main = std::mem::take(&mut state.main);
            debug!(batches = main.len(), "execute");
            state.in_flight.extend(main);
            state.processing = true;
            state.current_index = 0;
        }
        self.drive()
    }

    fn drive(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.driving {
                state.rerun = true;
                return Ok(());
            }
            state.driving = true;
        }
        let mut first_error = None;
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                state.rerun = false;
                state.next_batch()
            };
            match next {
                Some(queued) => {
                    if let Err(e) = self.dispatch(queued) {
                        first_error.get_or_insert(e);
                    }
                }
                None => {
                    let mut state = self.inner.state.lock();
                    if state.rerun {
                        continue;
                    }
                    state.driving = false;
                    break;
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn dispatch(&self, queued: QueuedBatch) -> Result<()> {
        let QueuedBatch { id, batch } = queued;
        let mut first_error = None;
        let mut statements: Vec<(Arc<Selection>, CompiledStatement)> = Vec::with_capacity(batch.len());
        for (index, selection) in batch.selections().iter().enumerate() {
            selection.set_index(index);
            match selection.compile() {
                Ok(statement) => statements.push((Arc::clone(selection), statement)),
                Err(e) => {
                    warn!(batch = %id, selection = %selection.name(), error = %e, "selection dropped from batch");
                    self.notify(&Action::Rollback {
                        selection: Arc::clone(selection),
                        error: e.clone(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        self.inner.state.lock().remaining = Some(statements.len());
        if statements.is_empty() {
            debug!(batch = %id, "nothing to issue");
            self.batch_completed();
            return first_error.map_or(Ok(()), Err);
        }

        debug!(batch = %id, statements = statements.len(), "opening transaction");
        let command = self.clone();
        self.inner.database.transaction(Box::new(move |tx: &mut dyn Transaction| {
            for (selection, statement) in statements {
                command.notify(&Action::Begin {
                    selection: Arc::clone(&selection),
                });
                let on_success = {
                    let command = command.clone();
                    let selection = Arc::clone(&selection);
                    Box::new(move |result_set: ResultSet| command.on_success(selection, result_set))
                };
                let on_error = {
                    let command = command.clone();
                    Box::new(move |error: SqlError| command.on_error(selection, error))
                };
                tx.execute_sql(&statement.text, &statement.params, on_success, on_error);
            }
        }));
        first_error.map_or(Ok(()), Err)
    }

    /// Count one statement as finished; `Some(true)` when it was the last.
    fn complete_one(&self, selection: &Selection) -> Option<bool> {
        let mut state = self.inner.state.lock();
        match state.remaining {
            Some(n) if n > 0 && state.phase == Phase::Dispatching => {
                state.remaining = Some(n - 1);
                Some(n == 1)
            }
            _ => {
                warn!(selection = %selection.name(), "completion without an open batch ignored");
                None
            }
        }
    }

    fn on_success(&self, selection: Arc<Selection>, result_set: ResultSet) {
        let Some(last) = self.complete_one(&selection) else {
            return;
        };
        trace!(selection = %selection.indexed_name(), rows = result_set.rows.len(), "statement committed");
        let result = QueryResult::new(Arc::clone(selection.model()), result_set);
        self.notify(&Action::Commit { selection, result });
        if last {
            self.batch_completed();
        }
    }

    fn on_error(&self, selection: Arc<Selection>, error: SqlError) {
        let Some(last) = self.complete_one(&selection) else {
            return;
        };
        debug!(selection = %selection.indexed_name(), error = %error, "statement failed");
        self.notify(&Action::Rollback {
            selection,
            error: Error::Statement(error),
        });
        if last {
            self.batch_completed();
        }
    }

    fn batch_completed(&self) {
        let index = {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Draining;
            state.current_index += 1;
            state.current_index
        };
        debug!(completed = index, "batch complete");
        match &self.inner.scheduler {
            Some(scheduler) if !self.inner.timeout.is_zero() => {
                let weak = Arc::downgrade(&self.inner);
                scheduler.schedule(
                    self.inner.timeout,
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            Command { inner }.resume();
                        }
                    }),
                );
            }
            _ => self.resume(),
        }
    }

    fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Draining {
                state.phase = Phase::Idle;
            }
        }
        if let Err(e) = self.drive() {
            debug!(error = %e, "compile error in a later batch");
        }
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Whether the open batch has every statement reported (`remaining == 0`).
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().remaining == Some(0)
    }

    /// Whether nothing is queued anywhere and no drain is in progress.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.processing && state.main.is_empty() && state.pending.is_empty() && state.in_flight.is_empty()
    }

    /// Whether a drain is in progress.
    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().processing
    }

    /// Current phase of the batch cycle.
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Statements of the open batch not yet reported; `None` before any batch opened.
    pub fn remaining_in_batch(&self) -> Option<usize> {
        self.inner.state.lock().remaining
    }

    /// Batches completed in the current drain.
    pub fn current_index(&self) -> usize {
        self.inner.state.lock().current_index
    }

    /// Batches in the main queue.
    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().main.len()
    }

    /// Batches in the pending queue.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Batches accepted by `execute()` and not yet dispatched.
    pub fn in_flight_len(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Command")
            .field("timeout", &self.inner.timeout)
            .field("phase", &state.phase)
            .field("processing", &state.processing)
            .field("remaining", &state.remaining)
            .field("queued", &state.main.len())
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}
