use serde::{Deserialize, Serialize};

/// The kind of generation work a provider is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
  TextGeneration,
  ImageGeneration,
  VideoGeneration,
}

impl Capability {
  pub fn as_str(&self) -> &'static str {
    match self {
      Capability::TextGeneration => "textGeneration",
      Capability::ImageGeneration => "imageGeneration",
      Capability::VideoGeneration => "videoGeneration",
    }
  }
}

impl std::fmt::Display for Capability {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What happens to a node when its action fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
  /// The node is recorded as failed.
  #[default]
  Fail,
  /// The node is recorded as skipped, keeping the error.
  Skip,
  /// Transient failures are retried `retry_count` times before failing.
  Retry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  #[default]
  Exponential,
}

/// How the orchestrator hands nodes to the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
  /// One dispatch in flight per execution, in topological order.
  #[default]
  Sequential,
  /// Nodes sharing a topological rank are dispatched together.
  RankParallel,
}
