//! Input resolution for recipe nodes.
//!
//! A node's `inputMapping` is resolved against two sources:
//! - `external.<path>` reads the caller payload
//! - `<outputKey>.<path>` reads the output of the node publishing that key,
//!   but only once that node has completed
//!
//! Explicit JSON `null` counts as a resolved value.

use std::collections::BTreeMap;

use cadence_config::{InputSource, Node, select_path};
use cadence_store::{ActionResult, Execution, NodeStatus};
use serde_json::{Map, Value};

use crate::error::ResolutionError;

/// Read-only view over an execution's inputs and completed outputs.
#[derive(Debug, Clone, Copy)]
pub struct InputResolver<'a> {
  external: &'a Value,
  results: &'a BTreeMap<String, ActionResult>,
}

impl<'a> InputResolver<'a> {
  pub fn new(external: &'a Value, results: &'a BTreeMap<String, ActionResult>) -> Self {
    Self { external, results }
  }

  pub fn for_execution(execution: &'a Execution) -> Self {
    Self::new(&execution.external_input, &execution.node_results)
  }

  /// Value addressed by a parsed source, if it is currently available.
  pub fn lookup(&self, source: &InputSource) -> Option<&'a Value> {
    match source {
      InputSource::External { path } => select_path(self.external, path),
      InputSource::Upstream { output_key, path } => {
        let result = self
          .results
          .get(output_key)
          .filter(|r| r.status == NodeStatus::Completed)?;
        select_path(&result.output, path)
      }
    }
  }

  /// Resolve every binding of `node`. Optional bindings that cannot be
  /// resolved are left out of the map.
  pub fn resolve(&self, node: &Node) -> Result<Map<String, Value>, ResolutionError> {
    let mut resolved = Map::new();
    for (name, binding) in &node.input_mapping {
      let source =
        InputSource::parse(binding.source()).ok_or_else(|| ResolutionError::InvalidSource {
          node_id: node.id.clone(),
          input: name.clone(),
          source_ref: binding.source().to_string(),
        })?;

      match self.lookup(&source) {
        Some(value) => {
          resolved.insert(name.clone(), value.clone());
        }
        None if binding.is_optional() => {}
        None => {
          return Err(ResolutionError::MissingInput {
            node_id: node.id.clone(),
            input: name.clone(),
            source_ref: binding.source().to_string(),
          });
        }
      }
    }
    Ok(resolved)
  }
}
