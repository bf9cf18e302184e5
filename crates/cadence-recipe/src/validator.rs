use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use cadence_config::{EXTERNAL_ROOT, InputSource, Recipe};

use crate::error::ValidationError;
use crate::graph::Graph;
use crate::plan::ExecutionPlan;

/// Validate a recipe and compute its execution plan.
pub fn validate(recipe: &Recipe) -> Result<ExecutionPlan, ValidationError> {
  check_node_ids(recipe)?;
  let producers = check_output_keys(recipe)?;
  check_edges(recipe)?;

  let graph = Graph::new(&recipe.nodes, &recipe.edges);
  check_dependencies(recipe, &graph)?;

  let order = topological_order(&graph)?;
  let ancestors = ancestors(&graph, &order);
  check_inputs(recipe, &graph, &producers, &ancestors)?;

  let mut ranks = vec![0usize; graph.len()];
  for &i in &order {
    ranks[i] = graph
      .upstream(i)
      .iter()
      .map(|&up| ranks[up] + 1)
      .max()
      .unwrap_or(0);
  }

  let dependencies = (0..graph.len())
    .map(|i| {
      let deps = graph.upstream(i).iter().map(|&up| graph.id(up).to_string());
      (graph.id(i).to_string(), deps.collect())
    })
    .collect();
  let ranks = (0..graph.len())
    .map(|i| (graph.id(i).to_string(), ranks[i]))
    .collect();
  let order = order.iter().map(|&i| graph.id(i).to_string()).collect();

  Ok(ExecutionPlan::new(order, dependencies, ranks, producers))
}

fn check_node_ids(recipe: &Recipe) -> Result<(), ValidationError> {
  let mut seen = HashSet::new();
  for node in &recipe.nodes {
    if !seen.insert(node.id.as_str()) {
      return Err(ValidationError::DuplicateNodeId {
        node_id: node.id.clone(),
      });
    }
  }
  Ok(())
}

/// Returns output key -> producing node id.
fn check_output_keys(recipe: &Recipe) -> Result<HashMap<String, String>, ValidationError> {
  let mut producers: HashMap<String, String> = HashMap::new();
  for node in &recipe.nodes {
    let key = &node.output_key;
    if key.is_empty() || key.contains('.') || key == EXTERNAL_ROOT {
      return Err(ValidationError::InvalidOutputKey {
        node_id: node.id.clone(),
        output_key: key.clone(),
      });
    }
    if let Some(first) = producers.get(key) {
      return Err(ValidationError::DuplicateOutputKey {
        output_key: key.clone(),
        first: first.clone(),
        second: node.id.clone(),
      });
    }
    producers.insert(key.clone(), node.id.clone());
  }
  Ok(producers)
}

fn check_edges(recipe: &Recipe) -> Result<(), ValidationError> {
  let ids: HashSet<&str> = recipe.nodes.iter().map(|n| n.id.as_str()).collect();
  for edge in &recipe.edges {
    for endpoint in [&edge.from, &edge.to] {
      if !ids.contains(endpoint.as_str()) {
        return Err(ValidationError::UnknownEdgeNode {
          node_id: endpoint.clone(),
          from: edge.from.clone(),
          to: edge.to.clone(),
        });
      }
    }
  }
  Ok(())
}

/// Edges are the source of truth. A node may restate its dependencies, but
/// the restated set must match its incoming edges exactly.
fn check_dependencies(recipe: &Recipe, graph: &Graph) -> Result<(), ValidationError> {
  for (i, node) in recipe.nodes.iter().enumerate() {
    if node.dependencies.is_empty() {
      continue;
    }
    for dependency in &node.dependencies {
      if graph.index_of(dependency).is_none() {
        return Err(ValidationError::UnknownDependency {
          node_id: node.id.clone(),
          dependency: dependency.clone(),
        });
      }
    }

    let declared: HashSet<&str> = node.dependencies.iter().map(|d| d.as_str()).collect();
    let from_edges: HashSet<&str> = graph.upstream(i).iter().map(|&up| graph.id(up)).collect();
    if declared != from_edges {
      return Err(ValidationError::DependencyMismatch {
        node_id: node.id.clone(),
        declared: node.dependencies.clone(),
        from_edges: graph
          .upstream(i)
          .iter()
          .map(|&up| graph.id(up).to_string())
          .collect(),
      });
    }
  }
  Ok(())
}

/// Kahn's algorithm. Among eligible nodes the one declared first runs first.
fn topological_order(graph: &Graph) -> Result<Vec<usize>, ValidationError> {
  let mut in_degree: Vec<usize> = (0..graph.len()).map(|i| graph.upstream(i).len()).collect();
  let mut ready: BinaryHeap<Reverse<usize>> = graph.entry_points().into_iter().map(Reverse).collect();
  let mut order = Vec::with_capacity(graph.len());

  while let Some(Reverse(i)) = ready.pop() {
    order.push(i);
    for &down in graph.downstream(i) {
      in_degree[down] -= 1;
      if in_degree[down] == 0 {
        ready.push(Reverse(down));
      }
    }
  }

  if order.len() == graph.len() {
    return Ok(order);
  }

  Err(ValidationError::CycleDetected {
    nodes: find_cycle(graph, &in_degree),
  })
}

/// Extract one concrete cycle from the nodes Kahn's algorithm could not place.
///
/// Every unplaced node still has an unplaced predecessor, so walking
/// predecessors from any of them must revisit a node.
fn find_cycle(graph: &Graph, in_degree: &[usize]) -> Vec<String> {
  let remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
  let Some(start) = remaining.iter().position(|&r| r) else {
    return Vec::new();
  };

  let mut walk = vec![start];
  let mut seen_at: HashMap<usize, usize> = HashMap::from([(start, 0)]);
  let mut current = start;
  loop {
    let Some(&prev) = graph.upstream(current).iter().find(|&&up| remaining[up]) else {
      return vec![graph.id(current).to_string()];
    };
    if let Some(&at) = seen_at.get(&prev) {
      let mut cycle: Vec<String> = walk[at..].iter().map(|&i| graph.id(i).to_string()).collect();
      cycle.reverse();
      return cycle;
    }
    seen_at.insert(prev, walk.len());
    walk.push(prev);
    current = prev;
  }
}

fn ancestors(graph: &Graph, order: &[usize]) -> Vec<HashSet<usize>> {
  let mut ancestors = vec![HashSet::new(); graph.len()];
  for &i in order {
    let mut set = HashSet::new();
    for &up in graph.upstream(i) {
      set.insert(up);
      set.extend(ancestors[up].iter().copied());
    }
    ancestors[i] = set;
  }
  ancestors
}

fn check_inputs(
  recipe: &Recipe,
  graph: &Graph,
  producers: &HashMap<String, String>,
  ancestors: &[HashSet<usize>],
) -> Result<(), ValidationError> {
  for (i, node) in recipe.nodes.iter().enumerate() {
    for (input, binding) in &node.input_mapping {
      let source = InputSource::parse(binding.source()).ok_or_else(|| {
        ValidationError::InvalidInputSource {
          node_id: node.id.clone(),
          input: input.clone(),
          source_ref: binding.source().to_string(),
        }
      })?;

      let Some(output_key) = source.output_key() else {
        continue;
      };
      let producer = producers
        .get(output_key)
        .ok_or_else(|| ValidationError::UnknownInputSource {
          node_id: node.id.clone(),
          input: input.clone(),
          output_key: output_key.to_string(),
        })?;

      let upstream = graph
        .index_of(producer)
        .is_some_and(|p| ancestors[i].contains(&p));
      if !upstream {
        return Err(ValidationError::InputNotUpstream {
          node_id: node.id.clone(),
          input: input.clone(),
          output_key: output_key.to_string(),
          producer: producer.clone(),
        });
      }
    }
  }
  Ok(())
}
