//! Command layer configuration via `batchsql.toml`.
//!
//! Every key is optional; an empty file yields the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::selection::{ConflictAlgorithm, DeleteOptions, InsertOptions, SelectOptions, UpdateOptions};
use crate::{Error, Result};

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "batchsql.toml";

/// What the SQLite handle does with a transaction in which some statements failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Undo only the failed statements and commit the rest
    #[default]
    CommitSurvivors,
    /// Roll back the whole transaction if any statement failed
    RollbackAll,
}

/// Configuration loaded from `batchsql.toml`.
///
/// # Example
///
/// ```toml
/// timeout_ms = 50
/// ignore_id = true
/// conflict = "replace"
/// failure_policy = "rollback_all"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Delay between batches in milliseconds.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Primary-key exclusion seeded into the option builders of the `Orm`
    /// (`Orm::insert_options` and friends).
    #[serde(default = "default_ignore_id")]
    pub ignore_id: bool,
    /// Insert conflict keyword seeded by `Orm::insert_options`: `none`,
    /// `rollback`, `abort`, `fail`, `ignore` or `replace`.
    #[serde(default = "default_conflict")]
    pub conflict: String,
    /// Partial-failure policy, applied by `SqliteDatabase::with_config`.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_ignore_id() -> bool {
    true
}

fn default_conflict() -> String {
    "none".to_string()
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            ignore_id: default_ignore_id(),
            conflict: default_conflict(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl CommandConfig {
    /// Inter-batch delay.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parsed conflict keyword.
    pub fn conflict_algorithm(&self) -> Result<ConflictAlgorithm> {
        self.conflict.parse()
    }

    /// Insert options carrying the configured defaults.
    pub fn insert_options(&self) -> Result<InsertOptions> {
        Ok(InsertOptions::default()
            .ignore_id(self.ignore_id)
            .conflict(self.conflict_algorithm()?))
    }

    /// Delete options carrying the configured defaults.
    pub fn delete_options(&self) -> DeleteOptions {
        DeleteOptions::default().ignore_id(self.ignore_id)
    }

    /// Update options carrying the configured defaults.
    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions::default().ignore_id(self.ignore_id)
    }

    /// Select options carrying the configured defaults.
    pub fn select_options(&self) -> SelectOptions {
        SelectOptions::default().ignore_id(self.ignore_id)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# batchsql command configuration
#
# Delay between batches in milliseconds (default: 0, next batch starts
# as soon as the previous one completes)
timeout_ms = 0

# Leave the primary key out of generated column lists (default: true)
ignore_id = true

# Insert conflict keyword: "none", "rollback", "abort", "fail", "ignore", "replace"
conflict = "none"

# SQLite handle only: "commit_survivors" (default) undoes failed statements
# and commits the rest, "rollback_all" undoes the whole batch
failure_policy = "commit_survivors"
"#
    }

    /// Parse TOML text and validate it.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: CommandConfig = toml::from_str(text).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        config.conflict_algorithm()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config { reason } => Error::Config {
                reason: format!("'{}': {}", path.display(), reason),
            },
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| Error::Io {
                reason: format!("failed to write default config file '{}': {}", path.display(), e),
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            reason: format!("failed to serialize config: {e}"),
        })?;
        std::fs::write(path, content).map_err(|e| Error::Io {
            reason: format!("failed to write config file '{}': {}", path.display(), e),
        })
    }
}
