//! Integration tests for RecipeEngine: background runs, polling and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use cadence_adaptor::{
  Adaptor, AdaptorRegistry, GenerationRequest, ProviderError, ProviderResponse, ProviderUsage,
};
use cadence_config::{AdaptorConfig, Capability, EngineSettings, PromptTemplate, Recipe};
use cadence_engine::{EngineError, RecipeEngine};
use cadence_runtime::{ChannelNotifier, ExecutionEvent, OrchestratorError};
use cadence_store::{
  ActionResult, ErrorKind, Execution, ExecutionStatus, MemoryStore, NodeStatus, Store, StoreError,
};
use serde_json::json;
use tokio::sync::Notify;

/// Blocks every call until released.
#[derive(Default)]
struct GatedAdaptor {
  started: Notify,
  release: Notify,
}

#[async_trait]
impl Adaptor for GatedAdaptor {
  fn provider_id(&self) -> &str {
    "gated"
  }

  async fn generate_text(
    &self,
    request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError> {
    self.started.notify_one();
    self.release.notified().await;
    Ok(ProviderResponse {
      payload: json!({ "text": request.prompt }),
      usage: ProviderUsage {
        input_units: 1,
        output_units: 1,
      },
    })
  }
}

/// Memory store whose `fail_on`-th execution save fails once.
struct BrokenSaveStore {
  inner: MemoryStore,
  saves: AtomicU32,
  fail_on: u32,
}

#[async_trait]
impl Store for BrokenSaveStore {
  async fn put_recipe(&self, recipe: &Recipe) -> Result<(), StoreError> {
    self.inner.put_recipe(recipe).await
  }

  async fn get_recipe(&self, recipe_id: &str) -> Result<Recipe, StoreError> {
    self.inner.get_recipe(recipe_id).await
  }

  async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
    self.inner.insert_execution(execution).await
  }

  async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
    let call = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
    if call == self.fail_on {
      return Err(StoreError::NotFound {
        collection: "execution",
        id: execution.id.clone(),
      });
    }
    self.inner.save_execution(execution).await
  }

  async fn get_execution(&self, execution_id: &str) -> Result<Execution, StoreError> {
    self.inner.get_execution(execution_id).await
  }

  async fn list_executions(&self, recipe_id: &str) -> Result<Vec<Execution>, StoreError> {
    self.inner.list_executions(recipe_id).await
  }

  async fn put_prompt_template(&self, template: &PromptTemplate) -> Result<(), StoreError> {
    self.inner.put_prompt_template(template).await
  }

  async fn list_prompt_templates(
    &self,
    stage_type: &str,
  ) -> Result<Vec<PromptTemplate>, StoreError> {
    self.inner.list_prompt_templates(stage_type).await
  }

  async fn put_adaptor_config(&self, config: &AdaptorConfig) -> Result<(), StoreError> {
    self.inner.put_adaptor_config(config).await
  }

  async fn list_adaptor_configs(
    &self,
    capability: Capability,
  ) -> Result<Vec<AdaptorConfig>, StoreError> {
    self.inner.list_adaptor_configs(capability).await
  }
}

fn recipe() -> Recipe {
  serde_json::from_value(json!({
    "id": "post",
    "name": "Post",
    "stageType": "stage_1",
    "nodes": [
      { "id": "outline", "kind": "text-generation", "outputKey": "outline",
        "inputMapping": { "topic": "external.topic" } },
      { "id": "draft", "kind": "text-generation", "outputKey": "draft",
        "inputMapping": { "topic": "outline.text" } }
    ],
    "edges": [ { "from": "outline", "to": "draft" } ]
  }))
  .unwrap()
}

fn template() -> PromptTemplate {
  serde_json::from_value(json!({
    "id": "stage1",
    "stageType": "stage_1",
    "version": 1,
    "scope": "global-default",
    "prompts": {
      "textGeneration": { "userTemplate": "Write about {topic}" }
    }
  }))
  .unwrap()
}

async fn store_with(provider_id: &str) -> Arc<MemoryStore> {
  let store = Arc::new(MemoryStore::new());
  store.put_recipe(&recipe()).await.unwrap();
  store.put_prompt_template(&template()).await.unwrap();
  let config: AdaptorConfig = serde_json::from_value(json!({
    "capability": "textGeneration", "providerId": provider_id, "modelId": "m1"
  }))
  .unwrap();
  store.put_adaptor_config(&config).await.unwrap();
  store
}

async fn echo_engine() -> (Arc<MemoryStore>, RecipeEngine) {
  let store = store_with("echo").await;
  let engine = RecipeEngine::new(
    store.clone(),
    Arc::new(AdaptorRegistry::with_builtin()),
    Arc::new(EngineSettings::default()),
  );
  (store, engine)
}

fn gated_engine(store: Arc<MemoryStore>, adaptor: Arc<GatedAdaptor>) -> RecipeEngine {
  let mut registry = AdaptorRegistry::new();
  registry.register_instance(adaptor);
  RecipeEngine::new(store, Arc::new(registry), Arc::new(EngineSettings::default()))
}

#[tokio::test]
async fn test_execute_and_wait() {
  let (_store, engine) = echo_engine().await;

  let execution_id = engine
    .execute("post", json!({ "topic": "rust" }), "acme")
    .await
    .unwrap();
  let execution = engine.wait(&execution_id).await.unwrap();

  assert_eq!(execution.id, execution_id);
  assert_eq!(execution.status, ExecutionStatus::Completed);
  assert_eq!(execution.node_results["outline"].output["text"], "Write about rust");
  assert_eq!(
    execution.node_results["draft"].output["text"],
    "Write about Write about rust"
  );

  let view = engine.execution(&execution_id).await.unwrap();
  let order: Vec<&str> = view.node_results.iter().map(|r| r.node_id.as_str()).collect();
  assert_eq!(order, vec!["outline", "draft"]);
  assert!(view.is_finished());
  assert_eq!(view.failures().count(), 0);

  // A finished execution is still readable after its handle is gone
  let again = engine.wait(&execution_id).await.unwrap();
  assert_eq!(again.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_invalid_recipe_rejected_synchronously() {
  let (store, engine) = echo_engine().await;
  let mut broken = recipe();
  broken.id = "broken".to_string();
  broken.edges.push(serde_json::from_value(json!({ "from": "draft", "to": "outline" })).unwrap());
  store.put_recipe(&broken).await.unwrap();

  let result = engine.execute("broken", json!({}), "acme").await;
  assert!(matches!(
    result,
    Err(EngineError::Orchestrator(OrchestratorError::Validation(_)))
  ));
  assert!(store.list_executions("broken").await.unwrap().is_empty());

  let missing = engine.execute("nope", json!({}), "acme").await;
  assert!(matches!(
    missing,
    Err(EngineError::Orchestrator(OrchestratorError::RecipeNotFound { .. }))
  ));
}

#[tokio::test]
async fn test_poll_while_running_then_cancel() {
  let store = store_with("gated").await;
  let adaptor = Arc::new(GatedAdaptor::default());
  let engine = gated_engine(store, adaptor.clone());

  let execution_id = engine
    .execute("post", json!({ "topic": "rust" }), "acme")
    .await
    .unwrap();
  adaptor.started.notified().await;

  let view = engine.execution(&execution_id).await.unwrap();
  assert_eq!(view.status, ExecutionStatus::Running);
  assert_eq!(view.node_results[0].status, NodeStatus::Running);
  assert_eq!(view.node_results[1].status, NodeStatus::Pending);

  engine.cancel(&execution_id).await.unwrap();
  adaptor.release.notify_one();

  let execution = engine.wait(&execution_id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Cancelled);
  // The in-flight node finishes, the rest is skipped
  assert_eq!(execution.node_results["outline"].status, NodeStatus::Completed);
  assert_eq!(execution.node_results["draft"].status, NodeStatus::Skipped);

  let again = engine.cancel(&execution_id).await;
  assert!(matches!(again, Err(EngineError::NotRunning { .. })));
}

#[tokio::test]
async fn test_shutdown_cancels_all_runs() {
  let store = store_with("gated").await;
  let adaptor = Arc::new(GatedAdaptor::default());
  let engine = gated_engine(store, adaptor.clone());

  let execution_id = engine.execute("post", json!({ "topic": "a" }), "acme").await.unwrap();
  adaptor.started.notified().await;

  engine.shutdown();
  adaptor.release.notify_one();

  let execution = engine.wait(&execution_id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_unknown_execution() {
  let (_store, engine) = echo_engine().await;

  assert!(matches!(
    engine.execution("missing").await,
    Err(EngineError::NotFound { .. })
  ));
  assert!(matches!(
    engine.cancel("missing").await,
    Err(EngineError::NotRunning { .. })
  ));
  assert!(matches!(
    engine.wait("missing").await,
    Err(EngineError::NotFound { .. })
  ));
}

#[tokio::test]
async fn test_events_forwarded() {
  let store = store_with("echo").await;
  let (sender, mut events) = tokio::sync::mpsc::unbounded_channel();
  let notifier = ChannelNotifier::new(sender);
  let engine = RecipeEngine::with_notifier(
    store,
    Arc::new(AdaptorRegistry::with_builtin()),
    Arc::new(EngineSettings::default()),
    notifier,
  );

  let execution_id = engine.execute("post", json!({ "topic": "x" }), "acme").await.unwrap();
  engine.wait(&execution_id).await.unwrap();

  let first = events.recv().await.unwrap();
  assert!(matches!(first, ExecutionEvent::WorkflowStarted { .. }));
  assert_eq!(first.execution_id(), execution_id);

  let mut last = first;
  while let Ok(event) = events.try_recv() {
    last = event;
  }
  assert!(matches!(
    last,
    ExecutionEvent::WorkflowCompleted {
      status: ExecutionStatus::Completed,
      ..
    }
  ));
}

#[tokio::test]
async fn test_store_failure_leaves_terminal_execution() {
  let store = Arc::new(BrokenSaveStore {
    inner: MemoryStore::new(),
    saves: AtomicU32::new(0),
    // start, start outline, then recording outline's result fails
    fail_on: 3,
  });
  store.put_recipe(&recipe()).await.unwrap();
  store.put_prompt_template(&template()).await.unwrap();
  let config: AdaptorConfig = serde_json::from_value(json!({
    "capability": "textGeneration", "providerId": "echo", "modelId": "m1"
  }))
  .unwrap();
  store.put_adaptor_config(&config).await.unwrap();

  let engine = RecipeEngine::new(
    store.clone(),
    Arc::new(AdaptorRegistry::with_builtin()),
    Arc::new(EngineSettings::default()),
  );
  let execution_id = engine.execute("post", json!({ "topic": "rust" }), "acme").await.unwrap();

  let result = engine.wait(&execution_id).await;
  assert!(matches!(
    result,
    Err(EngineError::Orchestrator(OrchestratorError::Tracker(_)))
  ));

  let view = engine.execution(&execution_id).await.unwrap();
  assert!(view.is_finished());
  assert_eq!(view.status, ExecutionStatus::Failed);
  let error = view.error.as_ref().unwrap();
  assert_eq!(error.kind, ErrorKind::Execution);
  assert!(error.message.contains("aborted"));
  assert_eq!(view.node_results[1].node_id, "draft");
  assert_eq!(view.node_results[1].status, NodeStatus::Skipped);

  // A terminal execution answers `wait` from the store
  let stored = engine.wait(&execution_id).await.unwrap();
  assert_eq!(stored.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_view_order_follows_version_that_ran() {
  let (store, engine) = echo_engine().await;
  let execution_id = engine.execute("post", json!({ "topic": "rust" }), "acme").await.unwrap();
  engine.wait(&execution_id).await.unwrap();

  // Legacy document without a stored order, recorded against version 1
  let mut legacy = Execution::new("legacy", "post", 1, "acme", json!({}));
  for (node_id, output_key) in [("outline", "outline"), ("draft", "draft")] {
    legacy.node_results.insert(
      output_key.to_string(),
      ActionResult::pending(node_id, output_key),
    );
  }
  store.insert_execution(&legacy).await.unwrap();
  let view = engine.execution("legacy").await.unwrap();
  assert_eq!(view.node_results[0].node_id, "outline");

  // Version 2 drops `draft` and adds a new first node
  let mut edited = recipe();
  edited.version = 2;
  edited.nodes.retain(|n| n.id == "outline");
  edited.edges.clear();
  edited.nodes.insert(
    0,
    serde_json::from_value(json!({
      "id": "intro", "kind": "text-generation", "outputKey": "intro",
      "inputMapping": { "topic": "external.topic" }
    }))
    .unwrap(),
  );
  store.put_recipe(&edited).await.unwrap();

  let view = engine.execution(&execution_id).await.unwrap();
  let order: Vec<&str> = view.node_results.iter().map(|r| r.node_id.as_str()).collect();
  assert_eq!(order, vec!["outline", "draft"]);

  // Without a stored order and with a newer recipe, output-key order is kept
  let view = engine.execution("legacy").await.unwrap();
  let order: Vec<&str> = view.node_results.iter().map(|r| r.node_id.as_str()).collect();
  assert_eq!(order, vec!["draft", "outline"]);
}
