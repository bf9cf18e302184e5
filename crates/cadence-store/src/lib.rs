//! Cadence Store
//!
//! This crate defines the persistence contract of the orchestration engine and
//! the execution documents it writes. The document store itself is a
//! collaborator; two implementations ship here:
//! - [`MemoryStore`] keeps JSON documents in process memory
//! - [`SqliteStore`] keeps JSON documents in SQLite tables
//!
//! The [`Store`] trait covers four collections:
//! - `recipes`, keyed by recipe id
//! - `executions`, keyed by execution id (written by the execution tracker only)
//! - `prompt_templates` and `adaptor_configs`, read by the resolvers

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  ActionResult, Diagnostic, ErrorKind, Execution, ExecutionStatus, NodeError, NodeStatus, Severity,
  Usage,
};

use async_trait::async_trait;
use cadence_config::{AdaptorConfig, Capability, PromptTemplate, Recipe};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested document was not found.
  #[error("{collection} not found: {id}")]
  NotFound { collection: &'static str, id: String },

  /// A document with this id already exists.
  #[error("{collection} already exists: {id}")]
  Conflict { collection: &'static str, id: String },

  /// A stored document could not be (de)serialized.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for recipes, executions and resolver configuration.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert or replace a recipe.
  async fn put_recipe(&self, recipe: &Recipe) -> Result<(), StoreError>;

  /// Get a recipe by ID.
  async fn get_recipe(&self, recipe_id: &str) -> Result<Recipe, StoreError>;

  /// Create a new execution. Fails with `Conflict` if the id exists.
  async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError>;

  /// Replace an existing execution document.
  async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;

  /// Get an execution by ID.
  async fn get_execution(&self, execution_id: &str) -> Result<Execution, StoreError>;

  /// List executions of a recipe, oldest first.
  async fn list_executions(&self, recipe_id: &str) -> Result<Vec<Execution>, StoreError>;

  /// Insert or replace a prompt template.
  async fn put_prompt_template(&self, template: &PromptTemplate) -> Result<(), StoreError>;

  /// List all prompt templates for a stage.
  async fn list_prompt_templates(&self, stage_type: &str)
  -> Result<Vec<PromptTemplate>, StoreError>;

  /// Insert or replace an adaptor config, keyed by [`adaptor_config_key`].
  async fn put_adaptor_config(&self, config: &AdaptorConfig) -> Result<(), StoreError>;

  /// List all adaptor configs for a capability.
  async fn list_adaptor_configs(
    &self,
    capability: Capability,
  ) -> Result<Vec<AdaptorConfig>, StoreError>;
}

/// Storage key of an adaptor config: its id, or its scope when the id is empty.
pub fn adaptor_config_key(config: &AdaptorConfig) -> String {
  if !config.id.is_empty() {
    return config.id.clone();
  }
  format!(
    "{}/{}/{}",
    config.project_id.as_deref().unwrap_or("*"),
    config.stage_type.as_deref().unwrap_or("*"),
    config.capability
  )
}
