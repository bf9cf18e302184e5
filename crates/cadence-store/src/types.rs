use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Completed,
  /// Finished under `continueOnError` with at least one failed node.
  CompletedWithErrors,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
  }

  pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
    match self {
      ExecutionStatus::Pending => matches!(
        next,
        ExecutionStatus::Running | ExecutionStatus::Cancelled | ExecutionStatus::Failed
      ),
      ExecutionStatus::Running => next.is_terminal(),
      _ => false,
    }
  }
}

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
    )
  }

  pub fn can_transition_to(&self, next: NodeStatus) -> bool {
    match self {
      NodeStatus::Pending => matches!(next, NodeStatus::Running | NodeStatus::Skipped),
      NodeStatus::Running => next.is_terminal(),
      _ => false,
    }
  }
}

/// Category of a node or execution failure, as shown to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// A required input or prompt variable could not be resolved.
  Resolution,
  /// No usable provider configuration.
  Adaptor,
  /// The provider call failed.
  Provider,
  /// The node's own timeout elapsed.
  Timeout,
  /// An upstream node did not complete.
  Upstream,
  /// The execution was cancelled before the node started.
  Cancelled,
  /// An execution-level ceiling was hit.
  Execution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
  pub kind: ErrorKind,
  pub message: String,
}

impl NodeError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

impl std::fmt::Display for NodeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}: {}", self.kind, self.message)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Warning,
  Error,
}

/// A note recorded while preparing a node, e.g. an unresolved placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  pub severity: Severity,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placeholder: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
  pub input_units: u64,
  pub output_units: u64,
  pub estimated_cost: f64,
}

/// Outcome of a single node within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
  pub node_id: String,
  pub output_key: String,
  pub status: NodeStatus,
  /// Input after resolution.
  #[serde(default)]
  pub input: serde_json::Value,
  #[serde(default)]
  pub output: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeError>,
  /// Provider calls made, including retries.
  #[serde(default)]
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub diagnostics: Vec<Diagnostic>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub duration_ms: u64,
  #[serde(default)]
  pub usage: Usage,
}

impl ActionResult {
  pub fn pending(node_id: impl Into<String>, output_key: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      output_key: output_key.into(),
      status: NodeStatus::Pending,
      input: serde_json::Value::Null,
      output: serde_json::Value::Null,
      error: None,
      attempts: 0,
      diagnostics: Vec::new(),
      started_at: None,
      completed_at: None,
      duration_ms: 0,
      usage: Usage::default(),
    }
  }

  /// A node that never started.
  pub fn skipped(node_id: impl Into<String>, output_key: impl Into<String>, error: NodeError) -> Self {
    Self {
      status: NodeStatus::Skipped,
      error: Some(error),
      completed_at: Some(Utc::now()),
      ..Self::pending(node_id, output_key)
    }
  }
}

/// One run of a recipe against a specific external input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
  pub id: String,
  pub recipe_id: String,
  pub recipe_version: u32,
  pub project_id: String,
  pub status: ExecutionStatus,
  #[serde(default)]
  pub external_input: serde_json::Value,
  /// Node results keyed by output key.
  #[serde(default)]
  pub node_results: BTreeMap<String, ActionResult>,
  /// Node ids in the order the recipe version planned them.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub node_order: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeError>,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
  pub fn new(
    id: impl Into<String>,
    recipe_id: impl Into<String>,
    recipe_version: u32,
    project_id: impl Into<String>,
    external_input: serde_json::Value,
  ) -> Self {
    Self {
      id: id.into(),
      recipe_id: recipe_id.into(),
      recipe_version,
      project_id: project_id.into(),
      status: ExecutionStatus::Pending,
      external_input,
      node_results: BTreeMap::new(),
      node_order: Vec::new(),
      error: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    }
  }

  /// Find a node's result by node id.
  pub fn result_for_node(&self, node_id: &str) -> Option<&ActionResult> {
    self.node_results.values().find(|r| r.node_id == node_id)
  }

  /// Status of a node, `Pending` when nothing was recorded yet.
  pub fn node_status(&self, node_id: &str) -> NodeStatus {
    self
      .result_for_node(node_id)
      .map_or(NodeStatus::Pending, |r| r.status)
  }
}
