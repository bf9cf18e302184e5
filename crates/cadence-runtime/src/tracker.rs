use std::sync::Arc;

use cadence_store::{
  ActionResult, Execution, ExecutionStatus, NodeError, NodeStatus, Store, StoreError,
};
use chrono::Utc;

use crate::error::TrackerError;

/// Owns one execution document and persists every change to it.
///
/// The tracker is the only writer for its execution id. It keeps the current
/// document in memory and replaces the stored copy after each transition.
pub struct ExecutionTracker {
  store: Arc<dyn Store>,
  execution: Execution,
}

impl ExecutionTracker {
  /// Persist a new execution. It must be `pending`.
  pub async fn create(store: Arc<dyn Store>, execution: Execution) -> Result<Self, TrackerError> {
    if execution.status != ExecutionStatus::Pending {
      return Err(TrackerError::InvalidTransition {
        execution_id: execution.id.clone(),
        from: execution.status,
        to: ExecutionStatus::Pending,
      });
    }
    store.insert_execution(&execution).await?;
    Ok(Self { store, execution })
  }

  pub fn execution(&self) -> &Execution {
    &self.execution
  }

  pub fn execution_id(&self) -> &str {
    &self.execution.id
  }

  pub fn into_execution(self) -> Execution {
    self.execution
  }

  /// Read any execution from the underlying store.
  pub async fn get_execution(&self, execution_id: &str) -> Result<Execution, StoreError> {
    self.store.get_execution(execution_id).await
  }

  pub async fn start(&mut self) -> Result<(), TrackerError> {
    self.transition(ExecutionStatus::Running)?;
    self.execution.started_at = Some(Utc::now());
    self.save().await
  }

  /// Mark a node as running.
  pub async fn start_node(
    &mut self,
    node_id: &str,
    output_key: &str,
  ) -> Result<(), TrackerError> {
    let result = self
      .execution
      .node_results
      .entry(output_key.to_string())
      .or_insert_with(|| ActionResult::pending(node_id, output_key));

    if !result.status.can_transition_to(NodeStatus::Running) {
      return Err(TrackerError::InvalidNodeTransition {
        node_id: node_id.to_string(),
        from: result.status,
        to: NodeStatus::Running,
      });
    }
    result.status = NodeStatus::Running;
    result.started_at = Some(Utc::now());
    self.save().await
  }

  /// Record a node's terminal result. Each output key is finalized once.
  pub async fn append_node_result(&mut self, mut result: ActionResult) -> Result<(), TrackerError> {
    let recorded = self.execution.node_results.get(&result.output_key);
    let current = recorded.map_or(NodeStatus::Pending, |r| r.status);
    if result.started_at.is_none() {
      result.started_at = recorded.and_then(|r| r.started_at);
    }

    if current.is_terminal() {
      return Err(TrackerError::ResultAlreadyWritten {
        execution_id: self.execution.id.clone(),
        output_key: result.output_key,
      });
    }
    if !result.status.is_terminal() || !current.can_transition_to(result.status) {
      return Err(TrackerError::InvalidNodeTransition {
        node_id: result.node_id,
        from: current,
        to: result.status,
      });
    }

    let completed_at = result.completed_at.unwrap_or_else(Utc::now);
    result.completed_at = Some(completed_at);
    if let Some(started_at) = result.started_at {
      result.duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
    }

    self
      .execution
      .node_results
      .insert(result.output_key.clone(), result);
    self.save().await
  }

  /// Move the execution to a terminal status.
  pub async fn finish(
    &mut self,
    status: ExecutionStatus,
    error: Option<NodeError>,
  ) -> Result<(), TrackerError> {
    if !status.is_terminal() {
      return Err(TrackerError::InvalidTransition {
        execution_id: self.execution.id.clone(),
        from: self.execution.status,
        to: status,
      });
    }
    self.transition(status)?;
    self.execution.error = error;
    self.execution.completed_at = Some(Utc::now());
    self.save().await
  }

  /// Close an execution whose run broke off.
  ///
  /// Unfinished nodes are closed with `error` (pending ones skipped, running
  /// ones failed) and the execution ends `failed` unless it is already
  /// terminal. The whole document is saved again, so an earlier save that
  /// failed is retried by this one.
  pub async fn abort(&mut self, error: NodeError) -> Result<(), TrackerError> {
    let now = Utc::now();
    for result in self.execution.node_results.values_mut() {
      let status = match result.status {
        NodeStatus::Pending => NodeStatus::Skipped,
        NodeStatus::Running => NodeStatus::Failed,
        _ => continue,
      };
      result.status = status;
      result.error = Some(error.clone());
      result.completed_at = Some(now);
      if let Some(started_at) = result.started_at {
        result.duration_ms = (now - started_at).num_milliseconds().max(0) as u64;
      }
    }

    if !self.execution.status.is_terminal() {
      self.transition(ExecutionStatus::Failed)?;
      self.execution.error = Some(error);
      self.execution.completed_at = Some(now);
    }
    self.save().await
  }

  fn transition(&mut self, to: ExecutionStatus) -> Result<(), TrackerError> {
    let from = self.execution.status;
    if !from.can_transition_to(to) {
      return Err(TrackerError::InvalidTransition {
        execution_id: self.execution.id.clone(),
        from,
        to,
      });
    }
    self.execution.status = to;
    Ok(())
  }

  async fn save(&self) -> Result<(), TrackerError> {
    self.store.save_execution(&self.execution).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use cadence_store::{ErrorKind, MemoryStore};
  use serde_json::json;

  async fn tracker() -> (Arc<MemoryStore>, ExecutionTracker) {
    let store = Arc::new(MemoryStore::new());
    let mut execution = Execution::new("exec-1", "recipe-1", 1, "p1", json!({"a": 1}));
    execution
      .node_results
      .insert("draft".to_string(), ActionResult::pending("write", "draft"));
    let tracker = ExecutionTracker::create(store.clone(), execution).await.unwrap();
    (store, tracker)
  }

  fn completed(output: serde_json::Value) -> ActionResult {
    ActionResult {
      status: NodeStatus::Completed,
      output,
      attempts: 1,
      started_at: Some(Utc::now()),
      ..ActionResult::pending("write", "draft")
    }
  }

  #[tokio::test]
  async fn test_lifecycle_is_persisted() {
    let (store, mut tracker) = tracker().await;
    assert_eq!(
      store.get_execution("exec-1").await.unwrap().status,
      ExecutionStatus::Pending
    );

    tracker.start().await.unwrap();
    tracker.start_node("write", "draft").await.unwrap();
    assert_eq!(
      store.get_execution("exec-1").await.unwrap().node_status("write"),
      NodeStatus::Running
    );

    tracker
      .append_node_result(completed(json!({"text": "hi"})))
      .await
      .unwrap();
    tracker.finish(ExecutionStatus::Completed, None).await.unwrap();

    let stored = tracker.get_execution("exec-1").await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.node_results["draft"].output, json!({"text": "hi"}));
    assert!(stored.node_results["draft"].completed_at.is_some());
    assert_eq!(&stored, tracker.execution());
  }

  #[tokio::test]
  async fn test_result_written_once() {
    let (_, mut tracker) = tracker().await;
    tracker.start().await.unwrap();
    tracker.start_node("write", "draft").await.unwrap();
    tracker
      .append_node_result(completed(json!(1)))
      .await
      .unwrap();

    let err = tracker
      .append_node_result(completed(json!(2)))
      .await
      .unwrap_err();
    assert!(matches!(err, TrackerError::ResultAlreadyWritten { .. }));
    assert_eq!(tracker.execution().node_results["draft"].output, json!(1));

    let err = tracker.start_node("write", "draft").await.unwrap_err();
    assert!(matches!(err, TrackerError::InvalidNodeTransition { .. }));
  }

  #[tokio::test]
  async fn test_pending_node_can_only_skip() {
    let (_, mut tracker) = tracker().await;
    tracker.start().await.unwrap();

    let err = tracker
      .append_node_result(completed(json!(1)))
      .await
      .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidNodeTransition { .. }));

    let skipped = ActionResult::skipped("write", "draft", NodeError::new(ErrorKind::Upstream, "x"));
    tracker.append_node_result(skipped).await.unwrap();
    assert_eq!(tracker.execution().node_status("write"), NodeStatus::Skipped);
  }

  #[tokio::test]
  async fn test_non_terminal_result_rejected() {
    let (_, mut tracker) = tracker().await;
    tracker.start().await.unwrap();
    tracker.start_node("write", "draft").await.unwrap();

    let err = tracker
      .append_node_result(ActionResult::pending("write", "draft"))
      .await
      .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidNodeTransition { .. }));
  }

  #[tokio::test]
  async fn test_terminal_execution_is_final() {
    let (_, mut tracker) = tracker().await;
    tracker.start().await.unwrap();
    tracker.finish(ExecutionStatus::Failed, None).await.unwrap();

    let err = tracker
      .finish(ExecutionStatus::Completed, None)
      .await
      .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidTransition { .. }));
    assert!(tracker.start().await.is_err());
    assert!(tracker.finish(ExecutionStatus::Running, None).await.is_err());
  }

  #[tokio::test]
  async fn test_pending_can_cancel_directly() {
    let (_, mut tracker) = tracker().await;
    tracker
      .finish(ExecutionStatus::Cancelled, None)
      .await
      .unwrap();
    assert_eq!(tracker.execution().status, ExecutionStatus::Cancelled);
  }

  #[tokio::test]
  async fn test_abort_closes_unfinished_nodes() {
    let store = Arc::new(MemoryStore::new());
    let mut execution = Execution::new("exec-2", "recipe-1", 1, "p1", json!({}));
    execution
      .node_results
      .insert("draft".to_string(), ActionResult::pending("write", "draft"));
    execution
      .node_results
      .insert("review".to_string(), ActionResult::pending("check", "review"));
    let mut tracker = ExecutionTracker::create(store.clone(), execution).await.unwrap();
    tracker.start().await.unwrap();
    tracker.start_node("write", "draft").await.unwrap();

    tracker
      .abort(NodeError::new(ErrorKind::Execution, "store unavailable"))
      .await
      .unwrap();

    let stored = store.get_execution("exec-2").await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.error.as_ref().unwrap().message, "store unavailable");
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.node_status("write"), NodeStatus::Failed);
    assert_eq!(stored.node_status("check"), NodeStatus::Skipped);
    assert_eq!(
      stored.node_results["review"].error.as_ref().unwrap().kind,
      ErrorKind::Execution
    );
  }

  #[tokio::test]
  async fn test_abort_keeps_terminal_status() {
    let (store, mut tracker) = tracker().await;
    tracker.start().await.unwrap();
    tracker.finish(ExecutionStatus::Cancelled, None).await.unwrap();

    tracker
      .abort(NodeError::new(ErrorKind::Execution, "late"))
      .await
      .unwrap();
    let stored = store.get_execution("exec-1").await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
    assert!(stored.error.is_none());
    assert_eq!(stored.node_status("write"), NodeStatus::Skipped);
  }

  #[tokio::test]
  async fn test_duplicate_create_conflicts() {
    let (store, _) = tracker().await;
    let again = Execution::new("exec-1", "recipe-1", 1, "p1", json!({}));
    let err = ExecutionTracker::create(store, again).await.err().unwrap();
    assert!(matches!(
      err,
      TrackerError::Store(StoreError::Conflict { .. })
    ));
  }
}
