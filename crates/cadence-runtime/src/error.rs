//! Runtime error types.

use cadence_adaptor::ProviderError;
use cadence_recipe::ValidationError;
use cadence_store::{ErrorKind, ExecutionStatus, NodeError, NodeStatus, StoreError};

/// Errors resolving a node's inputs or prompt variables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
  /// A required binding points at nothing.
  #[error("node '{node_id}': input '{input}' could not be resolved from '{source_ref}'")]
  MissingInput {
    node_id: String,
    input: String,
    source_ref: String,
  },

  /// A binding descriptor is malformed.
  #[error("node '{node_id}': input '{input}' has an invalid source '{source_ref}'")]
  InvalidSource {
    node_id: String,
    input: String,
    source_ref: String,
  },

  /// Required prompt placeholders stayed unresolved.
  #[error("node '{node_id}': unresolved prompt variables {placeholders:?}")]
  UnresolvedVariables {
    node_id: String,
    placeholders: Vec<String>,
  },
}

/// Errors from a single node dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
  #[error("provider error: {0}")]
  Provider(#[from] ProviderError),

  /// The node's own timeout elapsed on the last attempt.
  #[error("attempt timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// The execution-wide deadline passed while the node was running.
  #[error("execution deadline exceeded")]
  DeadlineExceeded,

  /// A generation node reached the dispatcher without a provider or prompt.
  #[error("node '{node_id}' has no {missing} to dispatch with")]
  Incomplete {
    node_id: String,
    missing: &'static str,
  },
}

impl DispatchError {
  pub fn is_transient(&self) -> bool {
    match self {
      DispatchError::Provider(e) => e.is_transient(),
      DispatchError::Timeout { .. } => true,
      DispatchError::DeadlineExceeded | DispatchError::Incomplete { .. } => false,
    }
  }

  pub fn to_node_error(&self) -> NodeError {
    let kind = match self {
      DispatchError::Provider(ProviderError::Timeout { .. }) | DispatchError::Timeout { .. } => {
        ErrorKind::Timeout
      }
      DispatchError::Provider(_) => ErrorKind::Provider,
      DispatchError::DeadlineExceeded => ErrorKind::Execution,
      DispatchError::Incomplete { .. } => ErrorKind::Adaptor,
    };
    NodeError::new(kind, self.to_string())
  }
}

/// Why an execution ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
  #[error("node '{node_id}' failed: {message}")]
  NodeFailed {
    node_id: String,
    kind: ErrorKind,
    message: String,
  },

  /// A node's required input came from a node that did not complete.
  #[error("node '{node_id}' is missing required input from '{output_key}'")]
  RequiredInputStarved { node_id: String, output_key: String },

  #[error("execution timed out after {timeout_ms}ms")]
  TimedOut { timeout_ms: u64 },

  #[error("execution cancelled")]
  Cancelled,
}

impl ExecutionError {
  pub fn to_node_error(&self) -> NodeError {
    let kind = match self {
      ExecutionError::NodeFailed { kind, .. } => *kind,
      ExecutionError::RequiredInputStarved { .. } => ErrorKind::Upstream,
      ExecutionError::TimedOut { .. } => ErrorKind::Execution,
      ExecutionError::Cancelled => ErrorKind::Cancelled,
    };
    NodeError::new(kind, self.to_string())
  }
}

/// Errors from the execution tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
  /// A terminal result for this output key was already recorded.
  #[error("result for '{output_key}' already written in execution {execution_id}")]
  ResultAlreadyWritten {
    execution_id: String,
    output_key: String,
  },

  #[error("node '{node_id}' cannot move from {from:?} to {to:?}")]
  InvalidNodeTransition {
    node_id: String,
    from: NodeStatus,
    to: NodeStatus,
  },

  #[error("execution {execution_id} cannot move from {from:?} to {to:?}")]
  InvalidTransition {
    execution_id: String,
    from: ExecutionStatus,
    to: ExecutionStatus,
  },

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// Errors that stop the orchestrator itself. Node failures are recorded on
/// the execution instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  #[error("recipe not found: {recipe_id}")]
  RecipeNotFound { recipe_id: String },

  #[error("invalid recipe: {0}")]
  Validation(#[from] ValidationError),

  #[error("tracker error: {0}")]
  Tracker(#[from] TrackerError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}
