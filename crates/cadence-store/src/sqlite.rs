use std::path::Path;

use async_trait::async_trait;
use cadence_config::{AdaptorConfig, Capability, PromptTemplate, Recipe};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::types::Execution;
use crate::{Store, StoreError, adaptor_config_key};

const SCHEMA: &[&str] = &[
  r#"
  CREATE TABLE IF NOT EXISTS recipes (
    id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    body TEXT NOT NULL
  )
  "#,
  r#"
  CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    recipe_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
  )
  "#,
  "CREATE INDEX IF NOT EXISTS executions_recipe_id ON executions (recipe_id, created_at)",
  r#"
  CREATE TABLE IF NOT EXISTS prompt_templates (
    id TEXT PRIMARY KEY,
    stage_type TEXT NOT NULL,
    body TEXT NOT NULL
  )
  "#,
  "CREATE INDEX IF NOT EXISTS prompt_templates_stage ON prompt_templates (stage_type)",
  r#"
  CREATE TABLE IF NOT EXISTS adaptor_configs (
    id TEXT PRIMARY KEY,
    capability TEXT NOT NULL,
    body TEXT NOT NULL
  )
  "#,
  "CREATE INDEX IF NOT EXISTS adaptor_configs_capability ON adaptor_configs (capability)",
];

/// SQLite-based store implementation.
///
/// Each collection is a table holding the JSON document in `body`, plus the
/// columns needed for lookups.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run [`migrate`](Self::migrate).
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Create the tables if they do not exist.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    for statement in SCHEMA {
      sqlx::query(statement).execute(&self.pool).await?;
    }
    Ok(())
  }

  async fn fetch_body(&self, sql: &str, id: &str) -> Result<Option<String>, StoreError> {
    Ok(
      sqlx::query_scalar::<_, String>(sql)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn fetch_bodies(&self, sql: &str, key: &str) -> Result<Vec<String>, StoreError> {
    Ok(
      sqlx::query_scalar::<_, String>(sql)
        .bind(key)
        .fetch_all(&self.pool)
        .await?,
    )
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn put_recipe(&self, recipe: &Recipe) -> Result<(), StoreError> {
    let body = serde_json::to_string(recipe)?;
    sqlx::query(
      r#"
      INSERT INTO recipes (id, version, body) VALUES (?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET version = excluded.version, body = excluded.body
      "#,
    )
    .bind(&recipe.id)
    .bind(i64::from(recipe.version))
    .bind(body)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get_recipe(&self, recipe_id: &str) -> Result<Recipe, StoreError> {
    let body = self
      .fetch_body("SELECT body FROM recipes WHERE id = ?", recipe_id)
      .await?
      .ok_or_else(|| StoreError::NotFound {
        collection: "recipe",
        id: recipe_id.to_string(),
      })?;
    Ok(serde_json::from_str(&body)?)
  }

  async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
    let body = serde_json::to_string(execution)?;
    let status = serde_json::to_value(execution.status)?;
    let result = sqlx::query(
      r#"
      INSERT INTO executions (id, recipe_id, status, created_at, body)
      VALUES (?, ?, ?, ?, ?)
      "#,
    )
    .bind(&execution.id)
    .bind(&execution.recipe_id)
    .bind(status.as_str().unwrap_or_default())
    .bind(execution.created_at.to_rfc3339())
    .bind(body)
    .execute(&self.pool)
    .await;

    match result {
      Ok(_) => Ok(()),
      Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Conflict {
        collection: "execution",
        id: execution.id.clone(),
      }),
      Err(e) => Err(e.into()),
    }
  }

  async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
    let body = serde_json::to_string(execution)?;
    let status = serde_json::to_value(execution.status)?;
    let result = sqlx::query("UPDATE executions SET status = ?, body = ? WHERE id = ?")
      .bind(status.as_str().unwrap_or_default())
      .bind(body)
      .bind(&execution.id)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound {
        collection: "execution",
        id: execution.id.clone(),
      });
    }
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<Execution, StoreError> {
    let body = self
      .fetch_body("SELECT body FROM executions WHERE id = ?", execution_id)
      .await?
      .ok_or_else(|| StoreError::NotFound {
        collection: "execution",
        id: execution_id.to_string(),
      })?;
    Ok(serde_json::from_str(&body)?)
  }

  async fn list_executions(&self, recipe_id: &str) -> Result<Vec<Execution>, StoreError> {
    self
      .fetch_bodies(
        "SELECT body FROM executions WHERE recipe_id = ? ORDER BY created_at, id",
        recipe_id,
      )
      .await?
      .iter()
      .map(|body| Ok(serde_json::from_str(body)?))
      .collect()
  }

  async fn put_prompt_template(&self, template: &PromptTemplate) -> Result<(), StoreError> {
    let body = serde_json::to_string(template)?;
    sqlx::query(
      r#"
      INSERT INTO prompt_templates (id, stage_type, body) VALUES (?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET stage_type = excluded.stage_type, body = excluded.body
      "#,
    )
    .bind(&template.id)
    .bind(&template.stage_type)
    .bind(body)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn list_prompt_templates(
    &self,
    stage_type: &str,
  ) -> Result<Vec<PromptTemplate>, StoreError> {
    self
      .fetch_bodies(
        "SELECT body FROM prompt_templates WHERE stage_type = ? ORDER BY id",
        stage_type,
      )
      .await?
      .iter()
      .map(|body| Ok(serde_json::from_str(body)?))
      .collect()
  }

  async fn put_adaptor_config(&self, config: &AdaptorConfig) -> Result<(), StoreError> {
    let body = serde_json::to_string(config)?;
    sqlx::query(
      r#"
      INSERT INTO adaptor_configs (id, capability, body) VALUES (?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET capability = excluded.capability, body = excluded.body
      "#,
    )
    .bind(adaptor_config_key(config))
    .bind(config.capability.as_str())
    .bind(body)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn list_adaptor_configs(
    &self,
    capability: Capability,
  ) -> Result<Vec<AdaptorConfig>, StoreError> {
    self
      .fetch_bodies(
        "SELECT body FROM adaptor_configs WHERE capability = ? ORDER BY id",
        capability.as_str(),
      )
      .await?
      .iter()
      .map(|body| Ok(serde_json::from_str(body)?))
      .collect()
  }
}
