//! Lifecycle notifications and the receivers that observe them.
//!
//! A [`Command`] reports three kinds of event per selection: `Begin` right
//! before the statement is issued, then exactly one of `Commit` (with the
//! wrapped result) or `Rollback` (with the error). Receivers are delivered
//! to in registration order, on whatever thread completed the statement.
//! They should be cheap: a receiver that blocks stalls that statement's
//! completion handling.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver as ChannelReceiver, Sender};
use parking_lot::RwLock;
use tracing::trace;

use crate::command::Command;
use crate::result::QueryResult;
use crate::selection::Selection;
use crate::Error;

/// Event discriminant, with the bit values used on message channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ActionKind {
    /// A statement is about to be issued
    Begin = 0x1,
    /// A statement succeeded
    Commit = 0x10,
    /// A statement failed or could not be compiled
    Rollback = 0x100,
}

impl ActionKind {
    /// Numeric code.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// One lifecycle event.
#[derive(Debug, Clone)]
pub enum Action {
    /// A statement is about to be issued
    Begin {
        /// Selection being issued
        selection: Arc<Selection>,
    },
    /// A statement succeeded
    Commit {
        /// Selection that succeeded
        selection: Arc<Selection>,
        /// Raw result wrapped with the selection's model
        result: QueryResult,
    },
    /// A statement failed or could not be compiled
    Rollback {
        /// Selection that failed
        selection: Arc<Selection>,
        /// Statement or compile error
        error: Error,
    },
}

impl Action {
    /// Event discriminant.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Begin { .. } => ActionKind::Begin,
            Action::Commit { .. } => ActionKind::Commit,
            Action::Rollback { .. } => ActionKind::Rollback,
        }
    }

    /// The selection the event is about.
    pub fn selection(&self) -> &Arc<Selection> {
        match self {
            Action::Begin { selection }
            | Action::Commit { selection, .. }
            | Action::Rollback { selection, .. } => selection,
        }
    }
}

/// Observer of command lifecycle events.
///
/// Implement `action_performed` to see every event, or any of the per-kind
/// hooks to see only those.
pub trait Receiver: Send + Sync {
    /// Entry point for every event. Dispatches to the per-kind hooks by default.
    fn action_performed(&self, command: &Command, action: &Action) {
        match action {
            Action::Begin { selection } => self.begin(command, selection),
            Action::Commit { selection, result } => self.commit(command, selection, result),
            Action::Rollback { selection, error } => self.rollback(command, selection, error),
        }
    }

    /// A statement is about to be issued.
    fn begin(&self, _command: &Command, _selection: &Arc<Selection>) {}

    /// A statement succeeded.
    fn commit(&self, _command: &Command, _selection: &Arc<Selection>, _result: &QueryResult) {}

    /// A statement failed.
    fn rollback(&self, _command: &Command, _selection: &Arc<Selection>, _error: &Error) {}
}

fn same_receiver(a: &Arc<dyn Receiver>, b: &Arc<dyn Receiver>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Ordered set of registered receivers.
#[derive(Default)]
pub(crate) struct Receivers {
    list: RwLock<Vec<Arc<dyn Receiver>>>,
}

impl Receivers {
    /// Register; returns `false` if already registered.
    pub(crate) fn add(&self, receiver: Arc<dyn Receiver>) -> bool {
        let mut list = self.list.write();
        if list.iter().any(|r| same_receiver(r, &receiver)) {
            return false;
        }
        list.push(receiver);
        true
    }

    /// Unregister; returns `false` if it was not registered.
    pub(crate) fn remove(&self, receiver: &Arc<dyn Receiver>) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|r| !same_receiver(r, receiver));
        list.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.list.read().len()
    }

    /// Deliver to a snapshot, so receivers may (un)register during delivery.
    pub(crate) fn notify(&self, command: &Command, action: &Action) {
        let snapshot: Vec<_> = self.list.read().clone();
        trace!(kind = ?action.kind(), selection = %action.selection().name(), receivers = snapshot.len(), "notify");
        for receiver in snapshot {
            receiver.action_performed(command, action);
        }
    }
}

/// Event forwarded over a channel by [`HandlerReceiver`].
#[derive(Debug, Clone)]
pub struct Message {
    /// Event discriminant
    pub what: ActionKind,
    /// Command that produced the event
    pub command: Command,
    /// Selection the event is about
    pub selection: Arc<Selection>,
    /// Result, for commits
    pub result: Option<QueryResult>,
    /// Error, for rollbacks
    pub error: Option<Error>,
}

/// Receiver forwarding every event as a [`Message`] to a channel.
///
/// Lets another thread consume events without running inside the
/// completion path. A disconnected channel drops events silently.
pub struct HandlerReceiver {
    sender: Sender<Message>,
}

impl HandlerReceiver {
    /// Forward into an existing sender.
    pub fn new(sender: Sender<Message>) -> Self {
        Self { sender }
    }

    /// Receiver plus the unbounded channel end it feeds.
    pub fn channel() -> (Self, ChannelReceiver<Message>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    fn send(&self, message: Message) {
        if self.sender.send(message).is_err() {
            trace!("handler channel disconnected, event dropped");
        }
    }
}

impl Receiver for HandlerReceiver {
    fn begin(&self, command: &Command, selection: &Arc<Selection>) {
        self.send(Message {
            what: ActionKind::Begin,
            command: command.clone(),
            selection: selection.clone(),
            result: None,
            error: None,
        });
    }

    fn commit(&self, command: &Command, selection: &Arc<Selection>, result: &QueryResult) {
        self.send(Message {
            what: ActionKind::Commit,
            command: command.clone(),
            selection: selection.clone(),
            result: Some(result.clone()),
            error: None,
        });
    }

    fn rollback(&self, command: &Command, selection: &Arc<Selection>, error: &Error) {
        self.send(Message {
            what: ActionKind::Rollback,
            command: command.clone(),
            selection: selection.clone(),
            result: None,
            error: Some(error.clone()),
        });
    }
}

type BeginFn = Box<dyn Fn(&Command, &Arc<Selection>) + Send + Sync>;
type CommitFn = Box<dyn Fn(&Command, &Arc<Selection>, &QueryResult) + Send + Sync>;
type RollbackFn = Box<dyn Fn(&Command, &Arc<Selection>, &Error) + Send + Sync>;

/// Receiver built from closures; unset hooks ignore their events.
#[derive(Default)]
pub struct CallbackReceiver {
    on_begin: Option<BeginFn>,
    on_commit: Option<CommitFn>,
    on_rollback: Option<RollbackFn>,
}

impl CallbackReceiver {
    /// Receiver with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on begin events.
    pub fn on_begin(mut self, f: impl Fn(&Command, &Arc<Selection>) + Send + Sync + 'static) -> Self {
        self.on_begin = Some(Box::new(f));
        self
    }

    /// Run `f` on commit events.
    pub fn on_commit(
        mut self,
        f: impl Fn(&Command, &Arc<Selection>, &QueryResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_commit = Some(Box::new(f));
        self
    }

    /// Run `f` on rollback events.
    pub fn on_rollback(mut self, f: impl Fn(&Command, &Arc<Selection>, &Error) + Send + Sync + 'static) -> Self {
        self.on_rollback = Some(Box::new(f));
        self
    }
}

impl Receiver for CallbackReceiver {
    fn begin(&self, command: &Command, selection: &Arc<Selection>) {
        if let Some(f) = &self.on_begin {
            f(command, selection);
        }
    }

    fn commit(&self, command: &Command, selection: &Arc<Selection>, result: &QueryResult) {
        if let Some(f) = &self.on_commit {
            f(command, selection, result);
        }
    }

    fn rollback(&self, command: &Command, selection: &Arc<Selection>, error: &Error) {
        if let Some(f) = &self.on_rollback {
            f(command, selection, error);
        }
    }
}

impl fmt::Debug for CallbackReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackReceiver")
            .field("on_begin", &self.on_begin.is_some())
            .field("on_commit", &self.on_commit.is_some())
            .field("on_rollback", &self.on_rollback.is_some())
            .finish()
    }
}
