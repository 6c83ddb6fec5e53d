//! Table registry built once from a [`Schema`].
//!
//! The registry replaces any process-wide model table: it is constructed
//! from validated metadata and handed to consumers by reference.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::{Error, Record, Result, Schema, TableInfo};

/// Map from table name to shared table metadata.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: BTreeMap<String, Arc<TableInfo>>,
}

impl Registry {
    /// Validate a schema and index its tables by name.
    pub fn from_schema(schema: &Schema) -> Result<Self> {
        schema.validate()?;
        let tables: BTreeMap<_, _> = schema
            .tables
            .iter()
            .map(|t| (t.name.clone(), Arc::new(t.clone())))
            .collect();
        debug!(tables = tables.len(), "model registry built");
        Ok(Self { tables })
    }

    /// Metadata for a table.
    pub fn table(&self, name: &str) -> Result<&Arc<TableInfo>> {
        self.tables.get(name).ok_or_else(|| Error::UnknownTable {
            table: name.to_string(),
        })
    }

    /// Whether a table is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the registry has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// A fresh all-Null record for a table.
    pub fn new_record(&self, table: &str) -> Result<Record> {
        Ok(Record::new(Arc::clone(self.table(table)?)))
    }

    /// A record for a table with properties applied from a JSON object.
    pub fn new_record_with(
        &self,
        table: &str,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record> {
        let mut record = self.new_record(table)?;
        record.set_properties(properties)?;
        Ok(record)
    }

    /// Decode a list of `{ "<table>": { <properties> } }` objects into records.
    ///
    /// Each element may name several tables; records come out in document order.
    pub fn records_from_json(&self, text: &str) -> Result<Vec<Record>> {
        let documents: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(text)?;
        let mut records = Vec::new();
        for document in &documents {
            for (table, properties) in document {
                let properties = properties.as_object().ok_or_else(|| Error::Serialization {
                    reason: format!("properties for table '{table}' must be an object"),
                })?;
                records.push(self.new_record_with(table, properties)?);
            }
        }
        Ok(records)
    }
}
