use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::enums::RetryBackoff;
use crate::node::Node;

/// A named, versioned workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
  pub id: String,
  pub name: String,
  pub stage_type: String,
  #[serde(default = "default_version")]
  pub version: u32,
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
  #[serde(default)]
  pub execution_config: ExecutionConfig,
}

impl Recipe {
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.id == node_id)
  }
}

fn default_version() -> u32 {
  1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
  /// Overall ceiling for the whole execution.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default)]
  pub retry_policy: RetryPolicy,
  #[serde(default)]
  pub continue_on_error: bool,
}

/// Backoff applied between retries of a node's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
  #[serde(default)]
  pub backoff: RetryBackoff,
  #[serde(default = "default_initial_delay_ms")]
  pub initial_delay_ms: u64,
  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      backoff: RetryBackoff::default(),
      initial_delay_ms: default_initial_delay_ms(),
      max_delay_ms: default_max_delay_ms(),
    }
  }
}

impl RetryPolicy {
  /// Delay before the given retry (1 for the first retry).
  pub fn delay_for(&self, retry: u32) -> Duration {
    let base = self.initial_delay_ms;
    let ms = match self.backoff {
      RetryBackoff::Constant => base,
      RetryBackoff::Linear => base.saturating_mul(u64::from(retry.max(1))),
      RetryBackoff::Exponential => {
        let shift = retry.saturating_sub(1).min(20);
        base.saturating_mul(1u64 << shift)
      }
    };
    Duration::from_millis(ms.min(self.max_delay_ms))
  }
}

fn default_initial_delay_ms() -> u64 {
  500
}

fn default_max_delay_ms() -> u64 {
  30_000
}
