use std::collections::HashMap;

use async_trait::async_trait;
use cadence_config::{AdaptorConfig, Capability, PromptTemplate, Recipe};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::types::Execution;
use crate::{Store, StoreError, adaptor_config_key};

type Collection = RwLock<HashMap<String, serde_json::Value>>;

/// In-process store.
///
/// Documents are kept in their serialized JSON form so reads go through the
/// same schema as a real document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
  recipes: Collection,
  executions: Collection,
  prompt_templates: Collection,
  adaptor_configs: Collection,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

async fn put<T: Serialize>(collection: &Collection, id: &str, doc: &T) -> Result<(), StoreError> {
  let value = serde_json::to_value(doc)?;
  collection.write().await.insert(id.to_string(), value);
  Ok(())
}

async fn get<T: DeserializeOwned>(
  collection: &Collection,
  name: &'static str,
  id: &str,
) -> Result<T, StoreError> {
  let guard = collection.read().await;
  let value = guard.get(id).ok_or_else(|| StoreError::NotFound {
    collection: name,
    id: id.to_string(),
  })?;
  Ok(serde_json::from_value(value.clone())?)
}

async fn all<T: DeserializeOwned>(collection: &Collection) -> Result<Vec<(String, T)>, StoreError> {
  let guard = collection.read().await;
  let mut docs = guard
    .iter()
    .map(|(id, v)| Ok((id.clone(), serde_json::from_value(v.clone())?)))
    .collect::<Result<Vec<(String, T)>, StoreError>>()?;
  docs.sort_by(|a, b| a.0.cmp(&b.0));
  Ok(docs)
}

#[async_trait]
impl Store for MemoryStore {
  async fn put_recipe(&self, recipe: &Recipe) -> Result<(), StoreError> {
    put(&self.recipes, &recipe.id, recipe).await
  }

  async fn get_recipe(&self, recipe_id: &str) -> Result<Recipe, StoreError> {
    get(&self.recipes, "recipe", recipe_id).await
  }

  async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
    let value = serde_json::to_value(execution)?;
    let mut guard = self.executions.write().await;
    if guard.contains_key(&execution.id) {
      return Err(StoreError::Conflict {
        collection: "execution",
        id: execution.id.clone(),
      });
    }
    guard.insert(execution.id.clone(), value);
    Ok(())
  }

  async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
    let value = serde_json::to_value(execution)?;
    let mut guard = self.executions.write().await;
    let Some(slot) = guard.get_mut(&execution.id) else {
      return Err(StoreError::NotFound {
        collection: "execution",
        id: execution.id.clone(),
      });
    };
    *slot = value;
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<Execution, StoreError> {
    get(&self.executions, "execution", execution_id).await
  }

  async fn list_executions(&self, recipe_id: &str) -> Result<Vec<Execution>, StoreError> {
    let mut executions: Vec<Execution> = all(&self.executions)
      .await?
      .into_iter()
      .map(|(_, e): (String, Execution)| e)
      .filter(|e| e.recipe_id == recipe_id)
      .collect();
    executions.sort_by_key(|e| e.created_at);
    Ok(executions)
  }

  async fn put_prompt_template(&self, template: &PromptTemplate) -> Result<(), StoreError> {
    put(&self.prompt_templates, &template.id, template).await
  }

  async fn list_prompt_templates(
    &self,
    stage_type: &str,
  ) -> Result<Vec<PromptTemplate>, StoreError> {
    Ok(
      all(&self.prompt_templates)
        .await?
        .into_iter()
        .map(|(_, t): (String, PromptTemplate)| t)
        .filter(|t| t.stage_type == stage_type)
        .collect(),
    )
  }

  async fn put_adaptor_config(&self, config: &AdaptorConfig) -> Result<(), StoreError> {
    put(&self.adaptor_configs, &adaptor_config_key(config), config).await
  }

  async fn list_adaptor_configs(
    &self,
    capability: Capability,
  ) -> Result<Vec<AdaptorConfig>, StoreError> {
    Ok(
      all(&self.adaptor_configs)
        .await?
        .into_iter()
        .map(|(_, c): (String, AdaptorConfig)| c)
        .filter(|c| c.capability == capability)
        .collect(),
    )
  }
}
