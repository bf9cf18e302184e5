use std::collections::HashMap;

use cadence_config::{Edge, Node};

/// Index-based adjacency over a recipe's nodes.
///
/// Node indices are declaration positions in `nodes[]`. Duplicate edges are
/// collapsed; edges with unknown endpoints are ignored (the validator rejects
/// them before a graph is built).
#[derive(Debug, Clone)]
pub struct Graph {
  ids: Vec<String>,
  index: HashMap<String, usize>,
  /// node -> downstream nodes, ascending.
  adjacency: Vec<Vec<usize>>,
  /// node -> upstream nodes, ascending.
  reverse_adjacency: Vec<Vec<usize>>,
}

impl Graph {
  pub fn new(nodes: &[Node], edges: &[Edge]) -> Self {
    let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let index: HashMap<String, usize> = ids
      .iter()
      .enumerate()
      .map(|(i, id)| (id.clone(), i))
      .collect();

    let mut adjacency = vec![Vec::new(); ids.len()];
    let mut reverse_adjacency = vec![Vec::new(); ids.len()];

    for edge in edges {
      let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
        continue;
      };
      if !adjacency[from].contains(&to) {
        adjacency[from].push(to);
        reverse_adjacency[to].push(from);
      }
    }

    for list in adjacency.iter_mut().chain(reverse_adjacency.iter_mut()) {
      list.sort_unstable();
    }

    Self {
      ids,
      index,
      adjacency,
      reverse_adjacency,
    }
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  pub fn id(&self, index: usize) -> &str {
    &self.ids[index]
  }

  pub fn index_of(&self, node_id: &str) -> Option<usize> {
    self.index.get(node_id).copied()
  }

  /// Downstream node indices of a node.
  pub fn downstream(&self, index: usize) -> &[usize] {
    &self.adjacency[index]
  }

  /// Upstream node indices of a node.
  pub fn upstream(&self, index: usize) -> &[usize] {
    &self.reverse_adjacency[index]
  }

  /// Nodes with no incoming edges, in declaration order.
  pub fn entry_points(&self) -> Vec<usize> {
    (0..self.len())
      .filter(|&i| self.reverse_adjacency[i].is_empty())
      .collect()
  }
}
