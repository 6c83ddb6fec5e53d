//! Delayed execution for the inter-batch timeout.
//!
//! A [`Command`](crate::Command) with a non-zero timeout hands the
//! continuation of its drain loop to a [`Scheduler`] instead of sleeping on
//! the completing thread. [`TimerScheduler`] is the default: one named
//! worker thread running tasks from a deadline-ordered heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::{Error, Result};

/// Work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, task: Task);
}

static TIMER_COUNTER: AtomicU64 = AtomicU64::new(0);

struct TimerEntry {
    deadline: Instant,
    sequence: u64,
    task: Task,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

// Earliest deadline first, then submission order
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TimerInner {
    queue: Mutex<BinaryHeap<TimerEntry>>,
    ready: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
    completed: AtomicUsize,
}

/// Single-threaded timer running tasks at their deadlines.
///
/// The worker is named `batchsql-timer-N`. Dropping the scheduler stops the
/// worker; tasks not yet due are discarded.
pub struct TimerScheduler {
    inner: Arc<TimerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl TimerScheduler {
    /// Start the worker thread.
    pub fn new() -> Result<Self> {
        let inner = Arc::new(TimerInner {
            queue: Mutex::new(BinaryHeap::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            completed: AtomicUsize::new(0),
        });
        let n = TIMER_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(format!("batchsql-timer-{n}"))
            .spawn(move || timer_loop(&worker_inner))
            .map_err(|e| Error::Io {
                reason: format!("failed to spawn timer thread: {e}"),
            })?;
        let worker_id = handle.thread().id();
        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
            worker_id,
        })
    }

    /// Tasks waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Tasks run so far.
    pub fn completed(&self) -> usize {
        self.inner.completed.load(AtomicOrdering::Relaxed)
    }

    /// Stop the worker and join it.
    ///
    /// Safe to call from a task running on the worker itself; the join is
    /// skipped there.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.ready.notify_all();
        }
        if std::thread::current().id() == self.worker_id {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            debug!("timer shut down, task dropped");
            return;
        }
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            sequence: self.inner.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            task,
        };
        {
            let mut queue = self.inner.queue.lock();
            queue.push(entry);
        }
        self.inner.ready.notify_one();
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("pending", &self.pending())
            .field("completed", &self.completed())
            .finish()
    }
}

fn timer_loop(inner: &TimerInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    if !queue.is_empty() {
                        debug!(discarded = queue.len(), "timer stopping");
                    }
                    return;
                }
                match queue.peek().map(|entry| entry.deadline) {
                    Some(deadline) if deadline <= Instant::now() => {
                        if let Some(entry) = queue.pop() {
                            break entry.task;
                        }
                    }
                    Some(deadline) => {
                        inner.ready.wait_until(&mut queue, deadline);
                    }
                    None => inner.ready.wait(&mut queue),
                }
            }
        };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                "timer task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
        inner.completed.fetch_add(1, AtomicOrdering::Relaxed);
    }
}
