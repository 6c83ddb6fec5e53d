//! Generic Model implementation driven by table metadata.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Error, Model, Result, TableInfo, Value};

/// A row of one table, keyed by column name.
///
/// Every declared column always has a value (Null until set). Properties that
/// do not name a column are kept in a side map of internals instead of being
/// rejected, so records can round-trip payloads carrying extra fields.
#[derive(Debug, Clone)]
pub struct Record {
    table: Arc<TableInfo>,
    values: Vec<Value>,
    internals: BTreeMap<String, serde_json::Value>,
}

impl Record {
    /// An empty record: every column Null.
    pub fn new(table: Arc<TableInfo>) -> Self {
        let values = vec![Value::Null; table.columns.len()];
        Self {
            table,
            values,
            internals: BTreeMap::new(),
        }
    }

    /// Table metadata this record was built from.
    pub fn table(&self) -> &Arc<TableInfo> {
        &self.table
    }

    /// Whether `key` names a column of this record's table.
    pub fn contains_key(&self, key: &str) -> bool {
        self.table.column_index(key).is_some()
    }

    /// Current value of a column.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.table.column_index(key).map(|i| &self.values[i])
    }

    /// Set a column, or an internal property when `key` is not a column.
    ///
    /// Returns `true` when a column was written.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        match self.table.column_index(key) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => {
                self.internals
                    .insert(key.to_string(), serde_json::Value::from(value));
                false
            }
        }
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Apply a JSON object of properties. Returns the number of columns written.
    ///
    /// Column values must be JSON scalars; anything else is an
    /// [`Error::InvalidValue`]. Unknown keys go to the internals map.
    pub fn set_properties(&mut self, properties: &serde_json::Map<String, serde_json::Value>) -> Result<usize> {
        let mut changed = 0;
        for (key, json) in properties {
            match self.table.column_index(key) {
                Some(i) => {
                    let value = Value::from_json(json).ok_or_else(|| Error::InvalidValue {
                        table: self.table.name.clone(),
                        column: key.clone(),
                        reason: "expected a scalar".to_string(),
                    })?;
                    self.values[i] = value;
                    changed += 1;
                }
                None => {
                    self.internals.insert(key.clone(), json.clone());
                }
            }
        }
        Ok(changed)
    }

    /// Parse a JSON object string and apply it with [`Record::set_properties`].
    pub fn parse_properties(&mut self, text: &str) -> Result<usize> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        match json {
            serde_json::Value::Object(map) => self.set_properties(&map),
            other => Err(Error::Serialization {
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// Properties that did not match a column.
    pub fn internals(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.internals
    }

    /// Columns as a JSON object, in declaration order.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .table
            .columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.name.clone(), serde_json::Value::from(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Value of the primary-key column, if the table has one.
    pub fn primary_key_value(&self) -> Option<&Value> {
        self.table.primary_key().and_then(|pk| self.get(pk))
    }

    /// Order two records by primary key. Integer keys compare numerically;
    /// anything else compares equal.
    pub fn compare_by_id(&self, other: &Record) -> Ordering {
        match (self.primary_key_value(), other.primary_key_value()) {
            (Some(Value::Int(a)), Some(Value::Int(b))) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl Model for Record {
    fn table_name(&self) -> &str {
        &self.table.name
    }

    fn keys(&self, exclude_id: bool) -> Vec<String> {
        self.table.column_names(exclude_id)
    }

    fn values(&self, exclude_id: bool) -> Vec<Value> {
        let primary = if exclude_id { self.table.primary_key() } else { None };
        self.table
            .columns
            .iter()
            .zip(&self.values)
            .filter(|(c, _)| Some(c.name.as_str()) != primary)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.table.name == other.table.name && self.values == other.values
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.table.name)?;
        for (i, (column, value)) in self.table.columns.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", column.name, value)?;
        }
        write!(f, "}}")
    }
}
