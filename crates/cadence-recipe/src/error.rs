use thiserror::Error;

/// A structural problem with a recipe. Always raised before an execution exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  #[error("duplicate output key '{output_key}' on nodes '{first}' and '{second}'")]
  DuplicateOutputKey {
    output_key: String,
    first: String,
    second: String,
  },

  #[error("node '{node_id}' has invalid output key '{output_key}'")]
  InvalidOutputKey { node_id: String, output_key: String },

  #[error("edge references unknown node '{node_id}': from={from}, to={to}")]
  UnknownEdgeNode {
    node_id: String,
    from: String,
    to: String,
  },

  #[error("node '{node_id}' depends on unknown node '{dependency}'")]
  UnknownDependency { node_id: String, dependency: String },

  #[error("node '{node_id}' declares dependencies {declared:?} but its edges give {from_edges:?}")]
  DependencyMismatch {
    node_id: String,
    declared: Vec<String>,
    from_edges: Vec<String>,
  },

  #[error("cycle detected in recipe graph: {}", nodes.join(" -> "))]
  CycleDetected { nodes: Vec<String> },

  #[error("node '{node_id}' input '{input}' has malformed source '{source_ref}'")]
  InvalidInputSource {
    node_id: String,
    input: String,
    source_ref: String,
  },

  #[error("node '{node_id}' input '{input}' reads unknown output key '{output_key}'")]
  UnknownInputSource {
    node_id: String,
    input: String,
    output_key: String,
  },

  #[error(
    "node '{node_id}' input '{input}' reads '{output_key}' from node '{producer}', which is not upstream"
  )]
  InputNotUpstream {
    node_id: String,
    input: String,
    output_key: String,
    producer: String,
  },
}
