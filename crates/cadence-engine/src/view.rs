use cadence_recipe::ExecutionPlan;
use cadence_store::{ActionResult, Execution, ExecutionStatus, NodeError};
use serde::Serialize;

/// Polling view of an execution, with node results in plan order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionView {
  pub execution_id: String,
  pub recipe_id: String,
  pub status: ExecutionStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeError>,
  pub node_results: Vec<ActionResult>,
  /// Sum of the nodes' estimated cost.
  pub estimated_cost: f64,
}

impl ExecutionView {
  /// Results follow the order stored on the execution. Documents without one
  /// use `plan`, which must be for the recipe version that ran, and otherwise
  /// keep their output-key order.
  pub fn new(execution: Execution, plan: Option<&ExecutionPlan>) -> Self {
    let mut node_results: Vec<ActionResult> = execution.node_results.into_values().collect();
    if !execution.node_order.is_empty() {
      let order = &execution.node_order;
      node_results.sort_by_key(|r| {
        order
          .iter()
          .position(|id| *id == r.node_id)
          .unwrap_or(usize::MAX)
      });
    } else if let Some(plan) = plan {
      node_results.sort_by_key(|r| plan.position(&r.node_id).unwrap_or(usize::MAX));
    }
    let estimated_cost = node_results.iter().map(|r| r.usage.estimated_cost).sum();

    Self {
      execution_id: execution.id,
      recipe_id: execution.recipe_id,
      status: execution.status,
      error: execution.error,
      node_results,
      estimated_cost,
    }
  }

  pub fn is_finished(&self) -> bool {
    self.status.is_terminal()
  }

  /// Results of nodes that failed, each with its error kind and message.
  pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
    self
      .node_results
      .iter()
      .filter(|r| r.status == cadence_store::NodeStatus::Failed)
  }
}
