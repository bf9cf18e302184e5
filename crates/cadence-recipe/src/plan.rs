use std::collections::HashMap;

use cadence_config::DispatchMode;

/// A validated recipe's deterministic execution order.
///
/// Holds ids only; node definitions stay in the recipe. Re-validating the same
/// recipe always produces an equal plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
  order: Vec<String>,
  position: HashMap<String, usize>,
  dependencies: HashMap<String, Vec<String>>,
  ranks: HashMap<String, usize>,
  producers: HashMap<String, String>,
}

impl ExecutionPlan {
  pub(crate) fn new(
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    ranks: HashMap<String, usize>,
    producers: HashMap<String, String>,
  ) -> Self {
    let position = order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.clone(), i))
      .collect();
    Self {
      order,
      position,
      dependencies,
      ranks,
      producers,
    }
  }

  /// Node ids in execution order.
  pub fn order(&self) -> &[String] {
    &self.order
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Index of a node in the execution order.
  pub fn position(&self, node_id: &str) -> Option<usize> {
    self.position.get(node_id).copied()
  }

  /// Direct upstream node ids, in declaration order.
  pub fn dependencies(&self, node_id: &str) -> &[String] {
    self
      .dependencies
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Longest-path depth of a node from the roots.
  pub fn rank(&self, node_id: &str) -> Option<usize> {
    self.ranks.get(node_id).copied()
  }

  /// Node id publishing the given output key.
  pub fn producer(&self, output_key: &str) -> Option<&str> {
    self.producers.get(output_key).map(|s| s.as_str())
  }

  /// Groups of nodes that may be handed to the dispatcher together.
  ///
  /// Sequential mode yields one node per batch. Rank-parallel mode yields one
  /// batch per rank; nodes of equal rank never have an edge between them.
  pub fn batches(&self, mode: DispatchMode) -> Vec<Vec<String>> {
    match mode {
      DispatchMode::Sequential => self.order.iter().map(|id| vec![id.clone()]).collect(),
      DispatchMode::RankParallel => {
        let depth = self.ranks.values().copied().max().map_or(0, |m| m + 1);
        let mut batches = vec![Vec::new(); depth];
        for id in &self.order {
          batches[self.ranks[id]].push(id.clone());
        }
        batches
      }
    }
  }
}
