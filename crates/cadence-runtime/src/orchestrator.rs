//! Recipe orchestration.
//!
//! The [`Orchestrator`] runs one execution per call from a single
//! coordinating task:
//!
//! ```text
//! prepare: load recipe → validate → create execution (pending)
//! run:     running → for each batch of the plan:
//!            gate (cancel / deadline / upstream) → start node
//!            → inputs → adaptor → prompt → dispatch → record
//!          → terminal status
//! ```
//!
//! Nodes in a batch are prepared and recorded in plan order; only their
//! dispatches overlap. The execution document is written by the tracker only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cadence_adaptor::AdaptorRegistry;
use cadence_config::{
  DispatchSettings, EngineSettings, InputSource, Node, NodeKind, OnError, Recipe,
};
use cadence_recipe::ExecutionPlan;
use cadence_resolver::{AdaptorResolver, PromptError, PromptResolver, ScopedAdaptorResolver};
use cadence_store::{
  ActionResult, Diagnostic, ErrorKind, Execution, ExecutionStatus, NodeError, NodeStatus, Store,
  StoreError,
};
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::dispatch::{ActionDispatcher, DispatchFailure, DispatchOutcome, Invocation};
use crate::error::{DispatchError, ExecutionError, OrchestratorError, ResolutionError};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::input::InputResolver;
use crate::tracker::ExecutionTracker;

/// A validated recipe with its freshly created execution, ready to run.
pub struct PreparedExecution {
  recipe: Recipe,
  plan: ExecutionPlan,
  tracker: ExecutionTracker,
}

impl PreparedExecution {
  pub fn execution_id(&self) -> &str {
    self.tracker.execution_id()
  }

  pub fn execution(&self) -> &Execution {
    self.tracker.execution()
  }

  pub fn recipe(&self) -> &Recipe {
    &self.recipe
  }

  pub fn plan(&self) -> &ExecutionPlan {
    &self.plan
  }
}

/// Why a node did not reach dispatch.
struct PrepareFailure {
  error: NodeError,
  input: Option<Map<String, Value>>,
  diagnostics: Vec<Diagnostic>,
}

impl PrepareFailure {
  fn new(kind: ErrorKind, message: impl Into<String>, input: Option<&Map<String, Value>>) -> Self {
    Self {
      error: NodeError::new(kind, message),
      input: input.cloned(),
      diagnostics: Vec::new(),
    }
  }
}

#[derive(Default)]
struct RunState {
  /// Set once; every later node is skipped.
  halt: Option<ExecutionError>,
  /// First node skipped for lack of a required input.
  starved: Option<ExecutionError>,
  failed_nodes: usize,
}

/// Runs recipes against the store, resolvers and an injected adaptor registry.
///
/// Generic over `N: ExecutionNotifier`; [`Orchestrator::new`] discards events
/// and [`Orchestrator::with_notifier`] forwards them.
pub struct Orchestrator<N: ExecutionNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  adaptors: AdaptorResolver,
  prompts: PromptResolver,
  dispatch: DispatchSettings,
  notifier: N,
}

impl Orchestrator<NoopNotifier> {
  pub fn new(
    store: Arc<dyn Store>,
    registry: Arc<AdaptorRegistry>,
    settings: Arc<EngineSettings>,
  ) -> Self {
    Self::with_notifier(store, registry, settings, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Orchestrator<N> {
  pub fn with_notifier(
    store: Arc<dyn Store>,
    registry: Arc<AdaptorRegistry>,
    settings: Arc<EngineSettings>,
    notifier: N,
  ) -> Self {
    Self {
      adaptors: AdaptorResolver::new(store.clone(), registry, settings.clone()),
      prompts: PromptResolver::new(store.clone(), settings.strict_prompt_variables),
      dispatch: settings.dispatch.clone(),
      store,
      notifier,
    }
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Load, validate and run a recipe to completion.
  pub async fn execute_recipe(
    &self,
    recipe_id: &str,
    external_input: Value,
    project_id: &str,
    cancel: CancellationToken,
  ) -> Result<Execution, OrchestratorError> {
    let prepared = self.prepare(recipe_id, external_input, project_id).await?;
    self.run(prepared, cancel).await
  }

  /// Validate the recipe and create its execution in `pending`.
  ///
  /// An invalid recipe fails here and no execution is created.
  #[instrument(
    name = "orchestrator_prepare",
    skip(self, external_input),
    fields(recipe_id = %recipe_id, project_id = %project_id)
  )]
  pub async fn prepare(
    &self,
    recipe_id: &str,
    external_input: Value,
    project_id: &str,
  ) -> Result<PreparedExecution, OrchestratorError> {
    let recipe = match self.store.get_recipe(recipe_id).await {
      Ok(recipe) => recipe,
      Err(StoreError::NotFound { .. }) => {
        return Err(OrchestratorError::RecipeNotFound {
          recipe_id: recipe_id.to_string(),
        });
      }
      Err(e) => return Err(e.into()),
    };

    let plan = cadence_recipe::validate(&recipe).inspect_err(|e| {
      warn!(recipe_id = %recipe_id, error = %e, "recipe_invalid");
    })?;

    let mut execution = Execution::new(
      uuid::Uuid::new_v4().to_string(),
      &recipe.id,
      recipe.version,
      project_id,
      external_input,
    );
    for node_id in plan.order() {
      if let Some(node) = recipe.get_node(node_id) {
        execution.node_results.insert(
          node.output_key.clone(),
          ActionResult::pending(&node.id, &node.output_key),
        );
        execution.node_order.push(node.id.clone());
      }
    }

    let tracker = ExecutionTracker::create(self.store.clone(), execution).await?;
    Ok(PreparedExecution {
      recipe,
      plan,
      tracker,
    })
  }

  /// Run a prepared execution until it reaches a terminal status.
  ///
  /// Node failures are recorded on the returned execution; an `Err` means
  /// the execution could not be tracked.
  #[instrument(
    name = "orchestrator_run",
    skip(self, prepared, cancel),
    fields(
      execution_id = %prepared.execution_id(),
      recipe_id = %prepared.recipe.id,
    )
  )]
  pub async fn run(
    &self,
    prepared: PreparedExecution,
    cancel: CancellationToken,
  ) -> Result<Execution, OrchestratorError> {
    let PreparedExecution {
      recipe,
      plan,
      mut tracker,
    } = prepared;

    match self.drive(&recipe, &plan, &mut tracker, &cancel).await {
      Ok(()) => Ok(tracker.into_execution()),
      Err(e) => {
        let execution_id = tracker.execution_id().to_string();
        error!(execution_id = %execution_id, error = %e, "workflow_aborted");
        let reason = NodeError::new(ErrorKind::Execution, format!("execution aborted: {}", e));
        if let Err(abort_error) = tracker.abort(reason).await {
          error!(
            execution_id = %execution_id,
            error = %abort_error,
            "workflow_abort_unsaved"
          );
        }
        self.notifier.notify(ExecutionEvent::WorkflowFailed {
          execution_id,
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  /// The batch loop. Returns early only when the tracker cannot record.
  async fn drive(
    &self,
    recipe: &Recipe,
    plan: &ExecutionPlan,
    tracker: &mut ExecutionTracker,
    cancel: &CancellationToken,
  ) -> Result<(), OrchestratorError> {
    let execution_id = tracker.execution_id().to_string();
    let config = &recipe.execution_config;

    tracker.start().await?;
    info!(
      execution_id = %execution_id,
      recipe_id = %recipe.id,
      nodes = plan.len(),
      mode = ?self.dispatch.mode,
      "workflow_started"
    );
    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.clone(),
      recipe_id: recipe.id.clone(),
    });

    let deadline = config
      .timeout_ms
      .map(|ms| (Instant::now() + Duration::from_millis(ms), ms));
    let dispatcher = ActionDispatcher::new(config.retry_policy.clone());
    let mut adaptors = self.adaptors.scoped(tracker.execution().project_id.clone());
    let mut limits: HashMap<String, Arc<Semaphore>> = HashMap::new();
    let mut state = RunState::default();

    for batch in plan.batches(self.dispatch.mode) {
      let mut ready: Vec<(&Node, Invocation)> = Vec::new();

      for node_id in &batch {
        let Some(node) = recipe.get_node(node_id) else {
          continue;
        };

        if state.halt.is_none() {
          state.halt = stop_reason(cancel, deadline);
        }
        if let Some(halt) = &state.halt {
          let reason = halt_skip_error(halt);
          self.skip_node(tracker, node, reason).await?;
          continue;
        }

        if let Some((reason, starved)) =
          upstream_gate(node, plan, tracker.execution(), config.continue_on_error)
        {
          if state.starved.is_none() {
            state.starved = starved;
          }
          self.skip_node(tracker, node, reason).await?;
          continue;
        }

        self.start_node(tracker, node).await?;
        let prepared = self
          .prepare_node(node, recipe, tracker.execution(), &mut adaptors)
          .await;
        match prepared {
          Ok(invocation) => ready.push((node, invocation)),
          Err(failure) => {
            let mut result = running_result(tracker, node);
            result.input = failure.input.map(Value::Object).unwrap_or(Value::Null);
            result.diagnostics = failure.diagnostics;
            let continue_on_error = config.continue_on_error;
            self
              .record_failure(tracker, node, result, failure.error, &mut state, continue_on_error)
              .await?;
          }
        }
      }

      if ready.is_empty() {
        continue;
      }

      let outcomes = self
        .dispatch_batch(&dispatcher, &ready, deadline.map(|(at, _)| at), &mut limits)
        .await;

      for ((node, invocation), outcome) in ready.into_iter().zip(outcomes) {
        let mut result = running_result(tracker, node);
        result.input = Value::Object(invocation.input);
        result.diagnostics = invocation
          .prompt
          .map(|p| p.diagnostics)
          .unwrap_or_default();

        match outcome {
          Ok(outcome) => self.record_success(tracker, node, result, outcome).await?,
          Err(DispatchFailure { error, attempts }) => {
            result.attempts = attempts;
            if error == DispatchError::DeadlineExceeded && state.halt.is_none() {
              state.halt = deadline.map(|(_, timeout_ms)| ExecutionError::TimedOut { timeout_ms });
            }
            let node_error = error.to_node_error();
            let continue_on_error = config.continue_on_error;
            self
              .record_failure(tracker, node, result, node_error, &mut state, continue_on_error)
              .await?;
          }
        }
      }
    }

    let (status, outcome) = match (state.halt, state.starved) {
      (Some(ExecutionError::Cancelled), _) => {
        (ExecutionStatus::Cancelled, Some(ExecutionError::Cancelled))
      }
      (Some(halt), _) => (ExecutionStatus::Failed, Some(halt)),
      (None, Some(starved)) => (ExecutionStatus::Failed, Some(starved)),
      (None, None) if state.failed_nodes > 0 => (ExecutionStatus::CompletedWithErrors, None),
      (None, None) => (ExecutionStatus::Completed, None),
    };

    tracker
      .finish(status, outcome.as_ref().map(ExecutionError::to_node_error))
      .await?;

    match (status, &outcome) {
      (ExecutionStatus::Cancelled, _) => {
        warn!(execution_id = %execution_id, "workflow_cancelled");
        self.notifier.notify(ExecutionEvent::WorkflowCancelled {
          execution_id: execution_id.clone(),
        });
      }
      (_, Some(e)) => {
        error!(execution_id = %execution_id, error = %e, "workflow_failed");
        self.notifier.notify(ExecutionEvent::WorkflowFailed {
          execution_id: execution_id.clone(),
          error: e.to_string(),
        });
      }
      (_, None) => {
        info!(
          execution_id = %execution_id,
          status = ?status,
          failed_nodes = state.failed_nodes,
          "workflow_completed"
        );
        self.notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id: execution_id.clone(),
          status,
        });
      }
    }

    Ok(())
  }

  /// Resolve inputs, provider and prompt for a node, in that order.
  async fn prepare_node(
    &self,
    node: &Node,
    recipe: &Recipe,
    execution: &Execution,
    adaptors: &mut ScopedAdaptorResolver,
  ) -> Result<Invocation, PrepareFailure> {
    let input = InputResolver::for_execution(execution)
      .resolve(node)
      .map_err(|e| PrepareFailure::new(ErrorKind::Resolution, e.to_string(), None))?;

    let adaptor = match (node.kind, node.capability()) {
      (NodeKind::DataTransform, _) | (_, None) => None,
      (_, Some(capability)) => {
        let stage_type = node.provider_stage(&recipe.stage_type);
        let resolved = adaptors
          .resolve(stage_type, capability)
          .await
          .map_err(|e| PrepareFailure::new(ErrorKind::Adaptor, e.to_string(), Some(&input)))?;
        Some(resolved)
      }
    };

    let prompt = match node.prompt_capability() {
      Some(capability) => {
        let stage_type = node.prompt_stage(&recipe.stage_type);
        match self
          .prompts
          .resolve(&execution.project_id, stage_type, capability, &input)
          .await
        {
          Ok(prompt) => Some(prompt),
          Err(PromptError::NotFound { .. }) if node.kind == NodeKind::DataTransform => None,
          Err(e) => {
            return Err(PrepareFailure::new(
              ErrorKind::Resolution,
              e.to_string(),
              Some(&input),
            ));
          }
        }
      }
      None => None,
    };

    if let Some(prompt) = &prompt {
      if prompt.has_errors() {
        let error = ResolutionError::UnresolvedVariables {
          node_id: node.id.clone(),
          placeholders: prompt
            .diagnostics
            .iter()
            .filter_map(|d| d.placeholder.clone())
            .collect(),
        };
        let mut failure = PrepareFailure::new(ErrorKind::Resolution, error.to_string(), Some(&input));
        failure.diagnostics = prompt.diagnostics.clone();
        return Err(failure);
      }
    }

    Ok(Invocation {
      node_id: node.id.clone(),
      kind: node.kind,
      input,
      adaptor,
      prompt,
      policy: node.error_policy.clone(),
    })
  }

  /// Dispatch a batch concurrently, at most `maxConcurrentPerProvider` calls
  /// per provider. Outcomes come back in batch order.
  async fn dispatch_batch(
    &self,
    dispatcher: &ActionDispatcher,
    ready: &[(&Node, Invocation)],
    deadline: Option<Instant>,
    limits: &mut HashMap<String, Arc<Semaphore>>,
  ) -> Vec<Result<DispatchOutcome, DispatchFailure>> {
    let max_concurrent = self.dispatch.max_concurrent_per_provider.max(1);
    let calls = ready.iter().map(|(_, invocation)| {
      let limit = invocation.provider_id().map(|provider_id| {
        limits
          .entry(provider_id.to_string())
          .or_insert_with(|| Arc::new(Semaphore::new(max_concurrent)))
          .clone()
      });
      async move {
        let _permit = match &limit {
          Some(semaphore) => semaphore.acquire().await.ok(),
          None => None,
        };
        dispatcher.dispatch(invocation, deadline).await
      }
    });
    join_all(calls).await
  }

  async fn start_node(
    &self,
    tracker: &mut ExecutionTracker,
    node: &Node,
  ) -> Result<(), OrchestratorError> {
    tracker.start_node(&node.id, &node.output_key).await?;
    info!(
      execution_id = %tracker.execution_id(),
      node_id = %node.id,
      kind = ?node.kind,
      "node_started"
    );
    self.notifier.notify(ExecutionEvent::NodeStarted {
      execution_id: tracker.execution_id().to_string(),
      node_id: node.id.clone(),
    });
    Ok(())
  }

  async fn skip_node(
    &self,
    tracker: &mut ExecutionTracker,
    node: &Node,
    reason: NodeError,
  ) -> Result<(), OrchestratorError> {
    info!(
      execution_id = %tracker.execution_id(),
      node_id = %node.id,
      reason = %reason.message,
      "node_skipped"
    );
    self.notifier.notify(ExecutionEvent::NodeSkipped {
      execution_id: tracker.execution_id().to_string(),
      node_id: node.id.clone(),
      reason: reason.message.clone(),
    });
    tracker
      .append_node_result(ActionResult::skipped(&node.id, &node.output_key, reason))
      .await?;
    Ok(())
  }

  async fn record_success(
    &self,
    tracker: &mut ExecutionTracker,
    node: &Node,
    mut result: ActionResult,
    outcome: DispatchOutcome,
  ) -> Result<(), OrchestratorError> {
    info!(
      execution_id = %tracker.execution_id(),
      node_id = %node.id,
      attempts = outcome.attempts,
      estimated_cost = outcome.usage.estimated_cost,
      "node_completed"
    );
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      execution_id: tracker.execution_id().to_string(),
      node_id: node.id.clone(),
      attempts: outcome.attempts,
      output: outcome.payload.clone(),
    });

    result.status = NodeStatus::Completed;
    result.output = outcome.payload;
    result.usage = outcome.usage;
    result.attempts = outcome.attempts;
    tracker.append_node_result(result).await?;
    Ok(())
  }

  /// Record a failed node. `onError = skip` turns the failure into a skip,
  /// except when the execution deadline caused it.
  async fn record_failure(
    &self,
    tracker: &mut ExecutionTracker,
    node: &Node,
    mut result: ActionResult,
    node_error: NodeError,
    state: &mut RunState,
    continue_on_error: bool,
  ) -> Result<(), OrchestratorError> {
    let tolerated =
      node.error_policy.on_error == OnError::Skip && node_error.kind != ErrorKind::Execution;

    if tolerated {
      info!(
        execution_id = %tracker.execution_id(),
        node_id = %node.id,
        error = %node_error.message,
        "node_skipped"
      );
      self.notifier.notify(ExecutionEvent::NodeSkipped {
        execution_id: tracker.execution_id().to_string(),
        node_id: node.id.clone(),
        reason: node_error.message.clone(),
      });
      result.status = NodeStatus::Skipped;
    } else {
      error!(
        execution_id = %tracker.execution_id(),
        node_id = %node.id,
        kind = ?node_error.kind,
        attempts = result.attempts,
        error = %node_error.message,
        "node_failed"
      );
      self.notifier.notify(ExecutionEvent::NodeFailed {
        execution_id: tracker.execution_id().to_string(),
        node_id: node.id.clone(),
        error: node_error.message.clone(),
      });
      result.status = NodeStatus::Failed;
      state.failed_nodes += 1;
      if !continue_on_error && state.halt.is_none() {
        state.halt = Some(ExecutionError::NodeFailed {
          node_id: node.id.clone(),
          kind: node_error.kind,
          message: node_error.message.clone(),
        });
      }
    }

    result.error = Some(node_error);
    tracker.append_node_result(result).await?;
    Ok(())
  }
}

fn running_result(tracker: &ExecutionTracker, node: &Node) -> ActionResult {
  tracker
    .execution()
    .node_results
    .get(&node.output_key)
    .cloned()
    .unwrap_or_else(|| ActionResult::pending(&node.id, &node.output_key))
}

fn stop_reason(
  cancel: &CancellationToken,
  deadline: Option<(Instant, u64)>,
) -> Option<ExecutionError> {
  if cancel.is_cancelled() {
    return Some(ExecutionError::Cancelled);
  }
  match deadline {
    Some((at, timeout_ms)) if Instant::now() >= at => Some(ExecutionError::TimedOut { timeout_ms }),
    _ => None,
  }
}

fn halt_skip_error(halt: &ExecutionError) -> NodeError {
  match halt {
    ExecutionError::NodeFailed { node_id, .. } => NodeError::new(
      ErrorKind::Upstream,
      format!("skipped after node '{}' failed", node_id),
    ),
    other => other.to_node_error(),
  }
}

/// Decide whether upstream outcomes prevent a node from running.
///
/// A required input whose producer did not complete starves the execution
/// in either mode. Without `continueOnError` any other incomplete
/// dependency also skips the node, without starving it.
fn upstream_gate(
  node: &Node,
  plan: &ExecutionPlan,
  execution: &Execution,
  continue_on_error: bool,
) -> Option<(NodeError, Option<ExecutionError>)> {
  let starved = node
    .input_mapping
    .values()
    .filter(|binding| !binding.is_optional())
    .filter_map(|binding| InputSource::parse(binding.source()))
    .find_map(|source| {
      let output_key = source.output_key()?;
      let available = execution
        .node_results
        .get(output_key)
        .is_some_and(|r| r.status == NodeStatus::Completed);
      if available {
        return None;
      }
      let reason = NodeError::new(
        ErrorKind::Upstream,
        format!("required input from '{}' is not available", output_key),
      );
      let starved = ExecutionError::RequiredInputStarved {
        node_id: node.id.clone(),
        output_key: output_key.to_string(),
      };
      Some((reason, Some(starved)))
    });
  if starved.is_some() || continue_on_error {
    return starved;
  }

  plan
    .dependencies(&node.id)
    .iter()
    .find(|dep| execution.node_status(dep) != NodeStatus::Completed)
    .map(|dep| {
      let reason = NodeError::new(
        ErrorKind::Upstream,
        format!("dependency '{}' did not complete", dep),
      );
      (reason, None)
    })
}
