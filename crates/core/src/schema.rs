//! Table metadata
//!
//! A [`Schema`] is a list of [`TableInfo`] descriptions loaded once (from
//! JSON, TOML or code) and validated before any record is built from it.
//!
//! # Example
//!
//! ```toml
//! [[tables]]
//! name = "users"
//! columns = [
//!     { name = "_id", type = "INTEGER", primary_key = true },
//!     { name = "name", type = "TEXT" },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Error, Result};

/// Primary-key column name used when no column is flagged explicitly.
pub const DEFAULT_PRIMARY_KEY: &str = "_id";

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Declared SQL type, informational only
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub sql_type: String,
    /// Whether this column is the primary key
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnInfo {
    /// A plain column.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            primary_key: false,
        }
    }

    /// A primary-key column.
    pub fn primary(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, sql_type)
        }
    }
}

/// Metadata for one table: its name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Build and validate table metadata.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Result<Self> {
        let table = Self {
            name: name.into(),
            columns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check the table name, column uniqueness and the primary-key count.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_schema("table name must not be empty"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(Error::invalid_schema(format!(
                    "table '{}' has a column with an empty name",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::invalid_schema(format!(
                    "table '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
        }
        let primary = self.columns.iter().filter(|c| c.primary_key).count();
        if primary > 1 {
            return Err(Error::invalid_schema(format!(
                "table '{}' declares {} primary keys",
                self.name, primary
            )));
        }
        Ok(())
    }

    /// Name of the primary-key column, if the table has one.
    ///
    /// An explicitly flagged column wins; otherwise a column named `_id`.
    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .or_else(|| self.columns.iter().find(|c| c.name == DEFAULT_PRIMARY_KEY))
            .map(|c| c.name.as_str())
    }

    /// Ordered column names, optionally without the primary key.
    pub fn column_names(&self, exclude_id: bool) -> Vec<String> {
        let primary = if exclude_id { self.primary_key() } else { None };
        self.columns
            .iter()
            .filter(|c| Some(c.name.as_str()) != primary)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Position of a column in declaration order.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column metadata by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A set of tables loaded together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Tables in load order
    #[serde(default)]
    pub tables: Vec<TableInfo>,
}

impl Schema {
    /// Build and validate a schema.
    pub fn new(tables: Vec<TableInfo>) -> Result<Self> {
        let schema = Self { tables };
        schema.validate()?;
        Ok(schema)
    }

    /// Parse and validate a JSON schema document.
    pub fn from_json(text: &str) -> Result<Self> {
        let schema: Schema = serde_json::from_str(text)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Parse and validate a TOML schema document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let schema: Schema = toml::from_str(text)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Validate every table and reject duplicate table names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.name.as_str()) {
                return Err(Error::invalid_schema(format!(
                    "table '{}' declared twice",
                    table.name
                )));
            }
        }
        Ok(())
    }
}
