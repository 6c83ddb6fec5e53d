//! Entry point tying models, selections and commands to one database handle.
//!
//! The [`Orm`] holds the model registry once it has been built from a
//! schema. Selection factories refuse to run before that, since a selection
//! without known models has nothing meaningful to compile against.

use std::sync::Arc;

use batchsql_core::{Record, Registry, Schema};
use tracing::info;

use crate::command::Command;
use crate::config::CommandConfig;
use crate::database::Database;
use crate::receiver::{CallbackReceiver, HandlerReceiver, Message, Receiver};
use crate::selection::{Batch, DeleteOptions, InsertOptions, SelectOptions, Selection, UpdateOptions};
use crate::{Error, Result, SharedModel};

/// Factory for models, selections and commands over one database handle.
pub struct Orm {
    database: Arc<dyn Database>,
    config: CommandConfig,
    registry: Option<Arc<Registry>>,
}

impl Orm {
    /// Orm with default configuration and no models.
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self::with_config(database, CommandConfig::default())
    }

    /// Orm with explicit configuration and no models.
    pub fn with_config(database: Arc<dyn Database>, config: CommandConfig) -> Self {
        Self {
            database,
            config,
            registry: None,
        }
    }

    /// The shared database handle.
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    /// Active configuration.
    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Build the model registry from a schema, replacing any previous one.
    pub fn new_models(&mut self, schema: &Schema) -> Result<&Arc<Registry>> {
        let registry = Registry::from_schema(schema)?;
        info!(tables = registry.len(), "models initialized");
        Ok(&*self.registry.insert(Arc::new(registry)))
    }

    /// Whether [`Orm::new_models`] has succeeded.
    pub fn is_models_initialized(&self) -> bool {
        self.registry.is_some()
    }

    /// The model registry.
    pub fn registry(&self) -> Result<&Arc<Registry>> {
        self.registry
            .as_ref()
            .ok_or_else(|| Error::precondition("ORM model(s) not initialized"))
    }

    /// A fresh record of a registered table.
    pub fn new_model_instance(&self, table: &str) -> Result<Record> {
        Ok(self.registry()?.new_record(table)?)
    }

    /// A record of a registered table with properties applied.
    pub fn new_model_instance_with(
        &self,
        table: &str,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record> {
        Ok(self.registry()?.new_record_with(table, properties)?)
    }

    /// Decode `[{"<table>": {...}}, ...]` into records of registered tables.
    pub fn load_models(&self, json: &str) -> Result<Vec<Record>> {
        Ok(self.registry()?.records_from_json(json)?)
    }

    // =========================================================================
    // Selections
    // =========================================================================

    /// Insert options seeded from the configured `ignore_id` and `conflict`.
    pub fn insert_options(&self) -> Result<InsertOptions> {
        self.config.insert_options()
    }

    /// Delete options seeded from the configured `ignore_id`.
    pub fn delete_options(&self) -> DeleteOptions {
        self.config.delete_options()
    }

    /// Update options seeded from the configured `ignore_id`.
    pub fn update_options(&self) -> UpdateOptions {
        self.config.update_options()
    }

    /// Select options seeded from the configured `ignore_id`.
    pub fn select_options(&self) -> SelectOptions {
        self.config.select_options()
    }

    /// `DROP TABLE IF EXISTS` selection.
    pub fn new_drop(&self, model: SharedModel) -> Result<Selection> {
        self.registry()?;
        Ok(Selection::drop_table(model))
    }

    /// One drop selection per model, as a batch.
    pub fn new_drop_selections(&self, models: impl IntoIterator<Item = SharedModel>) -> Result<Batch> {
        models.into_iter().map(|m| self.new_drop(m)).collect()
    }

    /// Insert selection.
    pub fn new_insert(&self, model: SharedModel, options: InsertOptions) -> Result<Selection> {
        self.registry()?;
        Ok(Selection::insert(model, options))
    }

    /// One insert selection per model, as a batch.
    pub fn new_insert_selections(
        &self,
        models: impl IntoIterator<Item = SharedModel>,
        options: InsertOptions,
    ) -> Result<Batch> {
        models
            .into_iter()
            .map(|m| self.new_insert(m, options.clone()))
            .collect()
    }

    /// One insert per model using the configured insert options.
    pub fn new_configured_insert_selections(&self, models: impl IntoIterator<Item = SharedModel>) -> Result<Batch> {
        self.new_insert_selections(models, self.insert_options()?)
    }

    /// Delete selection.
    pub fn new_delete(&self, model: SharedModel, options: DeleteOptions) -> Result<Selection> {
        self.registry()?;
        Ok(Selection::delete(model, options))
    }

    /// One delete selection per model, as a batch.
    pub fn new_delete_selections(
        &self,
        models: impl IntoIterator<Item = SharedModel>,
        options: DeleteOptions,
    ) -> Result<Batch> {
        models
            .into_iter()
            .map(|m| self.new_delete(m, options.clone()))
            .collect()
    }

    /// Update selection.
    pub fn new_update(&self, model: SharedModel, options: UpdateOptions) -> Result<Selection> {
        self.registry()?;
        Ok(Selection::update(model, options))
    }

    /// One update selection per model, as a batch.
    pub fn new_update_selections(
        &self,
        models: impl IntoIterator<Item = SharedModel>,
        options: UpdateOptions,
    ) -> Result<Batch> {
        models
            .into_iter()
            .map(|m| self.new_update(m, options.clone()))
            .collect()
    }

    /// Select selection.
    pub fn new_select(&self, model: SharedModel, options: SelectOptions) -> Result<Selection> {
        self.registry()?;
        Ok(Selection::select(model, options))
    }

    /// One select selection per model, as a batch.
    pub fn new_select_selections(
        &self,
        models: impl IntoIterator<Item = SharedModel>,
        options: SelectOptions,
    ) -> Result<Batch> {
        models
            .into_iter()
            .map(|m| self.new_select(m, options.clone()))
            .collect()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Command over this Orm's handle, using the configured timeout.
    pub fn new_command(&self) -> Result<Command> {
        Command::from_config(Arc::clone(&self.database), &self.config)
    }

    /// Command with one receiver already registered.
    pub fn new_command_with_receiver(&self, receiver: Arc<dyn Receiver>) -> Result<Command> {
        let command = self.new_command()?;
        command.add_receiver(receiver);
        Ok(command)
    }

    /// Receiver built from closures.
    pub fn new_command_receiver(&self) -> CallbackReceiver {
        CallbackReceiver::new()
    }

    /// Receiver forwarding events to a channel.
    pub fn new_handler_receiver(&self) -> (HandlerReceiver, crossbeam_channel::Receiver<Message>) {
        HandlerReceiver::channel()
    }
}
