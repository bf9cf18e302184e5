//! Execution events and notifiers for observability.
//!
//! Events are emitted during a recipe run so consumers can follow progress
//! without polling the store, e.g. to stream updates to a UI.

use cadence_store::ExecutionStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during recipe execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  WorkflowStarted {
    execution_id: String,
    recipe_id: String,
  },

  NodeStarted {
    execution_id: String,
    node_id: String,
  },

  NodeCompleted {
    execution_id: String,
    node_id: String,
    attempts: u32,
    output: serde_json::Value,
  },

  NodeFailed {
    execution_id: String,
    node_id: String,
    error: String,
  },

  /// The node never ran, or its failure was tolerated by `onError = skip`.
  NodeSkipped {
    execution_id: String,
    node_id: String,
    reason: String,
  },

  /// The run finished as `completed` or `completed_with_errors`.
  WorkflowCompleted {
    execution_id: String,
    status: ExecutionStatus,
  },

  WorkflowFailed { execution_id: String, error: String },

  WorkflowCancelled { execution_id: String },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::WorkflowStarted { execution_id, .. }
      | ExecutionEvent::NodeStarted { execution_id, .. }
      | ExecutionEvent::NodeCompleted { execution_id, .. }
      | ExecutionEvent::NodeFailed { execution_id, .. }
      | ExecutionEvent::NodeSkipped { execution_id, .. }
      | ExecutionEvent::WorkflowCompleted { execution_id, .. }
      | ExecutionEvent::WorkflowFailed { execution_id, .. }
      | ExecutionEvent::WorkflowCancelled { execution_id } => execution_id,
    }
  }
}

/// Receives execution events.
///
/// The orchestrator calls `notify` for each event from its coordinating
/// task, so implementations should not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a run. Volume is a handful of
  // events per node.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
