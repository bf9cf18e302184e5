//! Contract tests run against every store implementation.

use cadence_config::{AdaptorConfig, Capability, PromptTemplate, Recipe};
use cadence_store::{
  ActionResult, ErrorKind, Execution, ExecutionStatus, MemoryStore, NodeError, SqliteStore, Store,
  StoreError,
};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;

fn sample_recipe() -> Recipe {
  serde_json::from_value(json!({
    "id": "blog-post",
    "name": "Blog post",
    "stageType": "stage_2",
    "version": 3,
    "nodes": [
      { "id": "outline", "kind": "text-generation", "outputKey": "outline",
        "inputMapping": { "topic": "external.topic" } },
      { "id": "draft", "kind": "text-generation", "outputKey": "draft",
        "inputMapping": { "outline": "outline.text", "tone": { "source": "external.tone", "optional": true } },
        "errorPolicy": { "onError": "retry", "retryCount": 2, "timeoutMs": 5000 } }
    ],
    "edges": [ { "from": "outline", "to": "draft" } ],
    "executionConfig": { "timeoutMs": 60000, "continueOnError": true }
  }))
  .unwrap()
}

fn template(id: &str, stage: &str) -> PromptTemplate {
  serde_json::from_value(json!({
    "id": id,
    "stageType": stage,
    "version": 1,
    "scope": "global-default",
    "prompts": { "textGeneration": { "userTemplate": "Write about {topic}" } }
  }))
  .unwrap()
}

fn adaptor(project: Option<&str>, capability: &str) -> AdaptorConfig {
  serde_json::from_value(json!({
    "projectId": project,
    "capability": capability,
    "providerId": "echo",
    "modelId": "echo-1"
  }))
  .unwrap()
}

async fn sqlite_store() -> SqliteStore {
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .unwrap();
  let store = SqliteStore::new(pool);
  store.migrate().await.unwrap();
  store
}

async fn exercise_recipes(store: &dyn Store) {
  let recipe = sample_recipe();
  store.put_recipe(&recipe).await.unwrap();
  assert_eq!(store.get_recipe("blog-post").await.unwrap(), recipe);

  let mut updated = recipe.clone();
  updated.version = 4;
  store.put_recipe(&updated).await.unwrap();
  assert_eq!(store.get_recipe("blog-post").await.unwrap().version, 4);

  assert!(matches!(
    store.get_recipe("missing").await,
    Err(StoreError::NotFound { .. })
  ));
}

async fn exercise_executions(store: &dyn Store) {
  let mut execution = Execution::new("exec-1", "blog-post", 3, "project-1", json!({"topic": "rust"}));
  store.insert_execution(&execution).await.unwrap();
  assert!(matches!(
    store.insert_execution(&execution).await,
    Err(StoreError::Conflict { .. })
  ));

  execution.status = ExecutionStatus::Running;
  execution.node_results.insert(
    "draft".to_string(),
    ActionResult::skipped("draft", "draft", NodeError::new(ErrorKind::Upstream, "outline failed")),
  );
  store.save_execution(&execution).await.unwrap();
  assert_eq!(store.get_execution("exec-1").await.unwrap(), execution);

  let other = Execution::new("exec-2", "another", 1, "project-1", json!({}));
  assert!(matches!(
    store.save_execution(&other).await,
    Err(StoreError::NotFound { .. })
  ));

  let listed = store.list_executions("blog-post").await.unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].id, "exec-1");
}

async fn exercise_resolver_collections(store: &dyn Store) {
  store.put_prompt_template(&template("t1", "stage_2")).await.unwrap();
  store.put_prompt_template(&template("t2", "stage_3")).await.unwrap();
  let templates = store.list_prompt_templates("stage_2").await.unwrap();
  assert_eq!(templates, vec![template("t1", "stage_2")]);

  store.put_adaptor_config(&adaptor(None, "textGeneration")).await.unwrap();
  store.put_adaptor_config(&adaptor(Some("p1"), "textGeneration")).await.unwrap();
  store.put_adaptor_config(&adaptor(None, "imageGeneration")).await.unwrap();
  // Same scope again replaces rather than duplicates.
  store.put_adaptor_config(&adaptor(None, "textGeneration")).await.unwrap();

  let text = store
    .list_adaptor_configs(Capability::TextGeneration)
    .await
    .unwrap();
  assert_eq!(text.len(), 2);
  assert!(text.iter().any(|c| c.project_id.as_deref() == Some("p1")));
}

#[tokio::test]
async fn test_memory_store_contract() {
  let store = MemoryStore::new();
  exercise_recipes(&store).await;
  exercise_executions(&store).await;
  exercise_resolver_collections(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
  let store = sqlite_store().await;
  exercise_recipes(&store).await;
  exercise_executions(&store).await;
  exercise_resolver_collections(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_persists_to_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("cadence.db");

  {
    let store = SqliteStore::open(&path).await.unwrap();
    store.put_recipe(&sample_recipe()).await.unwrap();
  }

  let reopened = SqliteStore::open(&path).await.unwrap();
  assert_eq!(reopened.get_recipe("blog-post").await.unwrap(), sample_recipe());
}
