//! Statement results paired with the model that produced them.

use std::fmt;

use batchsql_core::{Record, Registry};

use crate::database::{ResultSet, Row};
use crate::{Result, SharedModel, Value};

/// A successful statement's raw result together with its originating model.
///
/// Column positions follow the model's full key list (primary key included),
/// so `column_index("users.name")` and `column_index("name")` agree.
#[derive(Clone)]
pub struct QueryResult {
    model: SharedModel,
    result_set: ResultSet,
    columns: Vec<String>,
}

impl QueryResult {
    /// Wrap a raw result.
    pub fn new(model: SharedModel, result_set: ResultSet) -> Self {
        let columns = model.keys(false);
        Self {
            model,
            result_set,
            columns,
        }
    }

    /// The model of the selection that produced this result.
    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Raw result.
    pub fn result_set(&self) -> &ResultSet {
        &self.result_set
    }

    /// Table the result belongs to.
    pub fn table_name(&self) -> &str {
        self.model.table_name()
    }

    /// Returned rows.
    pub fn rows(&self) -> &[Row] {
        &self.result_set.rows
    }

    /// Number of returned rows.
    pub fn count(&self) -> usize {
        self.result_set.rows.len()
    }

    /// Row at a position.
    pub fn row(&self, position: usize) -> Option<&Row> {
        self.result_set.rows.get(position)
    }

    /// Model column names, in model order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column in the model, ignoring any `table.` qualifier.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        let bare = column.rsplit_once('.').map_or(column, |(_, name)| name);
        self.columns.iter().position(|c| c == bare)
    }

    /// Value of the model column at `column_index` in the row at `position`.
    pub fn value(&self, position: usize, column_index: usize) -> Option<&Value> {
        let column = self.columns.get(column_index)?;
        self.row(position)?.get(column)
    }

    /// Rows changed by a write.
    pub fn rows_affected(&self) -> u64 {
        self.result_set.rows_affected
    }

    /// Row id of the inserted row.
    pub fn insert_id(&self) -> Option<i64> {
        self.result_set.insert_id
    }

    /// Whether the statement changed anything.
    pub fn has_changed(&self) -> bool {
        self.result_set.rows_affected > 0
    }

    /// Decode every row into a record of the model's table.
    ///
    /// Row columns not in the table land in each record's internals.
    pub fn to_records(&self, registry: &Registry) -> Result<Vec<Record>> {
        let table = registry.table(self.table_name())?;
        let mut records = Vec::with_capacity(self.count());
        for row in self.rows() {
            let mut record = Record::new(table.clone());
            for (column, value) in row.iter() {
                let bare = column.rsplit_once('.').map_or(column, |(_, name)| name);
                if !record.set(bare, value.clone()) {
                    tracing::trace!(table = %table.name, column = bare, "column kept as internal");
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("table", &self.table_name())
            .field("result_set", &self.result_set)
            .finish()
    }
}

impl PartialEq for QueryResult {
    fn eq(&self, other: &Self) -> bool {
        self.table_name() == other.table_name() && self.result_set == other.result_set
    }
}
