//! Selections: units of SQL work bound to one model.
//!
//! A [`Selection`] pairs a shared [`Model`](batchsql_core::Model) with one of
//! five compilation strategies ([`SelectionKind`]) and turns them into a
//! parameterized [`CompiledStatement`]. Compilation is pure with respect to
//! the model and memoized: once a selection is active, `compile()` returns
//! the cached statement until [`Selection::recycle`] is called.
//!
//! # Variants
//!
//! | Kind | Text | Params |
//! |------|------|--------|
//! | Drop | `DROP TABLE IF EXISTS t;` | none |
//! | Insert | `INSERT[ OR X] INTO t(cols) VALUES(?,..)` | model values |
//! | Delete | `DELETE FROM t[ WHERE ..]` | where args |
//! | Update | `UPDATE t SET ..[ JOIN ..][ WHERE ..]` | set args, then where args |
//! | Select | `SELECT .. FROM t[ JOIN ..][ WHERE ..][ ORDER ..]` | where args |

mod clause;
mod statement;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, SharedModel, Value};

pub use clause::{
    Algorithm, CaseArm, CaseColumn, ClauseDescriptor, CompileError, FromDescription, Join,
    JoinKind, Membership, SelectAlgorithm, UpdateAlgorithm, WhereAlgorithm,
};

/// Source of auto-generated selection names.
static SELECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `{text, params}` produced by compiling a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStatement {
    /// SQL text with `?` placeholders
    pub text: String,
    /// Values bound to the placeholders, in order
    pub params: Vec<Value>,
}

/// Conflict resolution keyword for inserts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAlgorithm {
    /// Plain `INSERT`
    #[default]
    None,
    /// `INSERT OR ROLLBACK`
    Rollback,
    /// `INSERT OR ABORT`
    Abort,
    /// `INSERT OR FAIL`
    Fail,
    /// `INSERT OR IGNORE`
    Ignore,
    /// `INSERT OR REPLACE`
    Replace,
}

impl ConflictAlgorithm {
    /// Text inserted after `INSERT`, with its leading space.
    pub fn keyword(self) -> &'static str {
        match self {
            ConflictAlgorithm::None => "",
            ConflictAlgorithm::Rollback => " OR ROLLBACK",
            ConflictAlgorithm::Abort => " OR ABORT",
            ConflictAlgorithm::Fail => " OR FAIL",
            ConflictAlgorithm::Ignore => " OR IGNORE",
            ConflictAlgorithm::Replace => " OR REPLACE",
        }
    }
}

impl FromStr for ConflictAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(ConflictAlgorithm::None),
            "rollback" => Ok(ConflictAlgorithm::Rollback),
            "abort" => Ok(ConflictAlgorithm::Abort),
            "fail" => Ok(ConflictAlgorithm::Fail),
            "ignore" => Ok(ConflictAlgorithm::Ignore),
            "replace" => Ok(ConflictAlgorithm::Replace),
            other => Err(Error::Config {
                reason: format!("unknown conflict algorithm '{other}'"),
            }),
        }
    }
}

/// Options for [`Selection::insert`].
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOptions {
    /// Leave the primary key out of the column list
    pub ignore_id: bool,
    /// Conflict keyword
    pub conflict: ConflictAlgorithm,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            ignore_id: true,
            conflict: ConflictAlgorithm::None,
        }
    }
}

impl InsertOptions {
    /// Set the conflict keyword.
    pub fn conflict(mut self, conflict: ConflictAlgorithm) -> Self {
        self.conflict = conflict;
        self
    }

    /// Include or omit the primary key.
    pub fn ignore_id(mut self, ignore_id: bool) -> Self {
        self.ignore_id = ignore_id;
        self
    }
}

/// Options for [`Selection::delete`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOptions {
    /// Leave the primary key out of auto-generated where clauses
    pub ignore_id: bool,
    /// Where clause; none when absent
    pub where_algorithm: Option<Algorithm<WhereAlgorithm>>,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            ignore_id: true,
            where_algorithm: None,
        }
    }
}

impl DeleteOptions {
    /// Set the where clause.
    pub fn filter(mut self, algorithm: impl Into<Algorithm<WhereAlgorithm>>) -> Self {
        self.where_algorithm = Some(algorithm.into());
        self
    }

    /// Include or omit the primary key.
    pub fn ignore_id(mut self, ignore_id: bool) -> Self {
        self.ignore_id = ignore_id;
        self
    }
}

/// Options for [`Selection::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    /// Leave the primary key out of auto-generated clauses
    pub ignore_id: bool,
    /// `SET` clause; when absent every bindable column is set to its current value
    pub update_algorithm: Option<Algorithm<UpdateAlgorithm>>,
    /// Where/join clause
    pub where_algorithm: Option<Algorithm<WhereAlgorithm>>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            ignore_id: true,
            update_algorithm: None,
            where_algorithm: None,
        }
    }
}

impl UpdateOptions {
    /// Set the `SET` clause.
    pub fn set(mut self, algorithm: impl Into<Algorithm<UpdateAlgorithm>>) -> Self {
        self.update_algorithm = Some(algorithm.into());
        self
    }

    /// Set the where/join clause.
    pub fn filter(mut self, algorithm: impl Into<Algorithm<WhereAlgorithm>>) -> Self {
        self.where_algorithm = Some(algorithm.into());
        self
    }

    /// Include or omit the primary key.
    pub fn ignore_id(mut self, ignore_id: bool) -> Self {
        self.ignore_id = ignore_id;
        self
    }
}

/// Options for [`Selection::select`].
///
/// The default selects `*`. Clearing `select_algorithm` selects the model's
/// own columns instead.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOptions {
    /// Leave the primary key out of auto-generated clauses
    pub ignore_id: bool,
    /// Column list
    pub select_algorithm: Option<Algorithm<SelectAlgorithm>>,
    /// Where/join/order clause
    pub where_algorithm: Option<Algorithm<WhereAlgorithm>>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            ignore_id: true,
            select_algorithm: Some(Algorithm::Typed(SelectAlgorithm::All)),
            where_algorithm: None,
        }
    }
}

impl SelectOptions {
    /// Set the column list.
    pub fn columns(mut self, algorithm: impl Into<Algorithm<SelectAlgorithm>>) -> Self {
        self.select_algorithm = Some(algorithm.into());
        self
    }

    /// Select the model's own columns.
    pub fn model_columns(mut self) -> Self {
        self.select_algorithm = None;
        self
    }

    /// Set the where/join/order clause.
    pub fn filter(mut self, algorithm: impl Into<Algorithm<WhereAlgorithm>>) -> Self {
        self.where_algorithm = Some(algorithm.into());
        self
    }

    /// Include or omit the primary key.
    pub fn ignore_id(mut self, ignore_id: bool) -> Self {
        self.ignore_id = ignore_id;
        self
    }
}

/// Compilation strategy of a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionKind {
    /// `DROP TABLE IF EXISTS`
    Drop,
    /// `INSERT`
    Insert(InsertOptions),
    /// `DELETE`
    Delete(DeleteOptions),
    /// `UPDATE`
    Update(UpdateOptions),
    /// `SELECT`
    Select(SelectOptions),
}

impl SelectionKind {
    /// Variant name, also the prefix of auto-generated selection names.
    pub fn name(&self) -> &'static str {
        match self {
            SelectionKind::Drop => "Drop",
            SelectionKind::Insert(_) => "Insert",
            SelectionKind::Delete(_) => "Delete",
            SelectionKind::Update(_) => "Update",
            SelectionKind::Select(_) => "Select",
        }
    }

    /// Whether the primary key is excluded from generated clauses.
    pub fn ignore_id(&self) -> bool {
        match self {
            SelectionKind::Drop => true,
            SelectionKind::Insert(o) => o.ignore_id,
            SelectionKind::Delete(o) => o.ignore_id,
            SelectionKind::Update(o) => o.ignore_id,
            SelectionKind::Select(o) => o.ignore_id,
        }
    }
}

#[derive(Debug, Default)]
struct SelectionState {
    index: Option<usize>,
    compiled: Option<CompiledStatement>,
}

/// One unit of SQL work against one model.
///
/// Selections are shared between a batch, the command driving it and the
/// notifications it produces, so they are normally handled as
/// `Arc<Selection>`. Interior state (index, memoized statement) sits behind
/// a mutex.
pub struct Selection {
    model: SharedModel,
    name: String,
    kind: SelectionKind,
    state: Mutex<SelectionState>,
}

impl Selection {
    /// Selection with an auto-generated `<Kind>-<n>` name.
    pub fn new(model: SharedModel, kind: SelectionKind) -> Self {
        let n = SELECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            model,
            name: format!("{}-{}", kind.name(), n),
            kind,
            state: Mutex::new(SelectionState::default()),
        }
    }

    /// `DROP TABLE IF EXISTS` for the model's table.
    pub fn drop_table(model: SharedModel) -> Self {
        Self::new(model, SelectionKind::Drop)
    }

    /// `INSERT` of the model's current values.
    pub fn insert(model: SharedModel, options: InsertOptions) -> Self {
        Self::new(model, SelectionKind::Insert(options))
    }

    /// `DELETE FROM` the model's table.
    pub fn delete(model: SharedModel, options: DeleteOptions) -> Self {
        Self::new(model, SelectionKind::Delete(options))
    }

    /// `UPDATE` the model's table.
    pub fn update(model: SharedModel, options: UpdateOptions) -> Self {
        Self::new(model, SelectionKind::Update(options))
    }

    /// `SELECT` from the model's table.
    pub fn select(model: SharedModel, options: SelectOptions) -> Self {
        Self::new(model, SelectionKind::Select(options))
    }

    /// Replace the auto-generated name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The model this selection compiles against.
    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compilation strategy.
    pub fn kind(&self) -> &SelectionKind {
        &self.kind
    }

    /// Position within its batch, assigned at dispatch.
    pub fn index(&self) -> Option<usize> {
        self.state.lock().index
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.state.lock().index = Some(index);
    }

    /// `<name>-<index>`, with `-1` before an index is assigned.
    pub fn indexed_name(&self) -> String {
        match self.index() {
            Some(i) => format!("{}-{}", self.name, i),
            None => format!("{}--1", self.name),
        }
    }

    /// Whether `compile()` has succeeded since creation or the last recycle.
    pub fn is_active(&self) -> bool {
        self.state.lock().compiled.is_some()
    }

    /// The memoized statement, if compiled.
    pub fn compiled(&self) -> Option<CompiledStatement> {
        self.state.lock().compiled.clone()
    }

    /// Compile into `{text, params}`.
    ///
    /// Returns the cached statement while active. A failure leaves the
    /// selection inactive.
    pub fn compile(&self) -> Result<CompiledStatement> {
        let mut state = self.state.lock();
        if let Some(compiled) = &state.compiled {
            return Ok(compiled.clone());
        }
        let compiled = statement::render(self.model.as_ref(), &self.kind)
            .map_err(|e| Error::compile(self.name.clone(), e))?;
        tracing::trace!(selection = %self.name, text = %compiled.text, "compiled");
        state.compiled = Some(compiled.clone());
        Ok(compiled)
    }

    /// Clear the memoized statement and index so the selection can be resubmitted.
    pub fn recycle(&self) {
        let mut state = self.state.lock();
        state.compiled = None;
        state.index = None;
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Selection")
            .field("name", &self.name)
            .field("table", &self.model.table_name())
            .field("kind", &self.kind)
            .field("index", &state.index)
            .field("compiled", &state.compiled)
            .finish()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let index = state.index.map_or(-1, |i| i as i64);
        let (query, values) = match &state.compiled {
            Some(c) => (
                c.text.as_str(),
                c.params.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
            ),
            None => ("", String::new()),
        };
        write!(
            f,
            "{}[name:{}, index:{}, active:{}, ignore_id:{}, query:{}, values[{}], model:{}]",
            self.kind.name(),
            self.name,
            index,
            state.compiled.is_some(),
            self.kind.ignore_id(),
            query,
            values,
            self.model.table_name()
        )
    }
}

/// Ordered group of selections executed inside one transaction.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    selections: Vec<Arc<Selection>>,
}

impl Batch {
    /// Batch from shared selections.
    pub fn new(selections: Vec<Arc<Selection>>) -> Self {
        Self { selections }
    }

    /// Append a selection.
    pub fn push(&mut self, selection: impl Into<Arc<Selection>>) {
        self.selections.push(selection.into());
    }

    /// Selections in issue order.
    pub fn selections(&self) -> &[Arc<Selection>] {
        &self.selections
    }

    /// Number of selections.
    pub fn len(&self) -> usize {
        self.selections.len()
    }

    /// Whether the batch has no selections.
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

impl From<Selection> for Batch {
    fn from(selection: Selection) -> Self {
        Self::new(vec![Arc::new(selection)])
    }
}

impl From<Arc<Selection>> for Batch {
    fn from(selection: Arc<Selection>) -> Self {
        Self::new(vec![selection])
    }
}

impl From<Vec<Selection>> for Batch {
    fn from(selections: Vec<Selection>) -> Self {
        Self::new(selections.into_iter().map(Arc::new).collect())
    }
}

impl From<Vec<Arc<Selection>>> for Batch {
    fn from(selections: Vec<Arc<Selection>>) -> Self {
        Self::new(selections)
    }
}

impl FromIterator<Selection> for Batch {
    fn from_iter<I: IntoIterator<Item = Selection>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Arc::new).collect())
    }
}
