use std::collections::HashMap;
use std::sync::Arc;

use cadence_adaptor::AdaptorRegistry;
use cadence_config::EngineSettings;
use cadence_runtime::{ExecutionNotifier, NoopNotifier, Orchestrator, OrchestratorError};
use cadence_store::{Execution, Store, StoreError};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::view::ExecutionView;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("execution not found: {execution_id}")]
  NotFound { execution_id: String },

  #[error("execution {execution_id} is not running")]
  NotRunning { execution_id: String },

  #[error(transparent)]
  Orchestrator(#[from] OrchestratorError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("execution task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

struct RunHandle {
  cancel: CancellationToken,
  handle: JoinHandle<Result<Execution, OrchestratorError>>,
}

/// Triggers executions in the background and answers status queries.
///
/// Every run gets a child of the engine's root token, so [`cancel`] stops
/// one execution and [`shutdown`] stops all of them.
///
/// [`cancel`]: RecipeEngine::cancel
/// [`shutdown`]: RecipeEngine::shutdown
pub struct RecipeEngine<N: ExecutionNotifier + 'static = NoopNotifier> {
  orchestrator: Arc<Orchestrator<N>>,
  runs: Mutex<HashMap<String, RunHandle>>,
  root: CancellationToken,
}

impl RecipeEngine<NoopNotifier> {
  pub fn new(
    store: Arc<dyn Store>,
    registry: Arc<AdaptorRegistry>,
    settings: Arc<EngineSettings>,
  ) -> Self {
    Self::from_orchestrator(Orchestrator::new(store, registry, settings))
  }
}

impl<N: ExecutionNotifier + 'static> RecipeEngine<N> {
  pub fn with_notifier(
    store: Arc<dyn Store>,
    registry: Arc<AdaptorRegistry>,
    settings: Arc<EngineSettings>,
    notifier: N,
  ) -> Self {
    Self::from_orchestrator(Orchestrator::with_notifier(
      store, registry, settings, notifier,
    ))
  }

  pub fn from_orchestrator(orchestrator: Orchestrator<N>) -> Self {
    Self {
      orchestrator: Arc::new(orchestrator),
      runs: Mutex::new(HashMap::new()),
      root: CancellationToken::new(),
    }
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    self.orchestrator.store()
  }

  /// Validate the recipe, create its execution and start running it.
  ///
  /// Returns as soon as the execution exists in `pending`. An invalid
  /// recipe is reported here and nothing is created.
  pub async fn execute(
    &self,
    recipe_id: &str,
    external_input: Value,
    project_id: &str,
  ) -> Result<String, EngineError> {
    let prepared = self
      .orchestrator
      .prepare(recipe_id, external_input, project_id)
      .await?;
    let execution_id = prepared.execution_id().to_string();

    let cancel = self.root.child_token();
    let orchestrator = self.orchestrator.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { orchestrator.run(prepared, token).await });

    let mut runs = self.runs.lock().await;
    runs.retain(|_, run| !run.handle.is_finished());
    runs.insert(execution_id.clone(), RunHandle { cancel, handle });

    info!(
      execution_id = %execution_id,
      recipe_id = %recipe_id,
      project_id = %project_id,
      "execution_spawned"
    );
    Ok(execution_id)
  }

  /// Current state of an execution as recorded in the store.
  pub async fn execution(&self, execution_id: &str) -> Result<ExecutionView, EngineError> {
    let execution = self.load(execution_id).await?;

    if !execution.node_order.is_empty() {
      return Ok(ExecutionView::new(execution, None));
    }

    // Older documents carry no order. The current recipe only orders them
    // when it is still the version that ran.
    let plan = match self.store().get_recipe(&execution.recipe_id).await {
      Ok(recipe) if recipe.version == execution.recipe_version => {
        cadence_recipe::validate(&recipe).ok()
      }
      _ => None,
    };
    Ok(ExecutionView::new(execution, plan.as_ref()))
  }

  /// Request cancellation of a running execution.
  ///
  /// Nodes already dispatched finish; the rest are skipped.
  pub async fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
    let runs = self.runs.lock().await;
    match runs.get(execution_id) {
      Some(run) if !run.handle.is_finished() => {
        run.cancel.cancel();
        info!(execution_id = %execution_id, "execution_cancel_requested");
        Ok(())
      }
      _ => Err(EngineError::NotRunning {
        execution_id: execution_id.to_string(),
      }),
    }
  }

  /// Wait for an execution to reach a terminal status.
  pub async fn wait(&self, execution_id: &str) -> Result<Execution, EngineError> {
    let run = self.runs.lock().await.remove(execution_id);
    let Some(run) = run else {
      let execution = self.load(execution_id).await?;
      if execution.status.is_terminal() {
        return Ok(execution);
      }
      return Err(EngineError::NotRunning {
        execution_id: execution_id.to_string(),
      });
    };

    match run.handle.await? {
      Ok(execution) => Ok(execution),
      Err(e) => {
        error!(execution_id = %execution_id, error = %e, "execution_task_failed");
        Err(e.into())
      }
    }
  }

  /// Cancel every running execution.
  pub fn shutdown(&self) {
    warn!("engine_shutdown");
    self.root.cancel();
  }

  async fn load(&self, execution_id: &str) -> Result<Execution, EngineError> {
    match self.store().get_execution(execution_id).await {
      Ok(execution) => Ok(execution),
      Err(StoreError::NotFound { .. }) => Err(EngineError::NotFound {
        execution_id: execution_id.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }
}
