use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::enums::{Capability, OnError};
use crate::input::InputBinding;

/// One step of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
  pub id: String,
  pub kind: NodeKind,
  #[serde(default)]
  pub input_mapping: BTreeMap<String, InputBinding>,
  pub output_key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider_selector: Option<Selector>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub prompt_selector: Option<Selector>,
  /// Declared upstream node ids. Edges are authoritative; when this list is
  /// non-empty it must match the node's incoming edges.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub error_policy: ErrorPolicy,
}

impl Node {
  /// The capability this node asks a provider for, if any.
  pub fn capability(&self) -> Option<Capability> {
    self
      .provider_selector
      .as_ref()
      .and_then(|s| s.capability)
      .or_else(|| self.kind.capability())
  }

  /// Stage used to choose the provider, falling back to the recipe stage.
  pub fn provider_stage<'a>(&'a self, recipe_stage: &'a str) -> &'a str {
    self
      .provider_selector
      .as_ref()
      .and_then(|s| s.stage_type.as_deref())
      .unwrap_or(recipe_stage)
  }

  /// Stage used to choose the prompt template, falling back to the recipe stage.
  pub fn prompt_stage<'a>(&'a self, recipe_stage: &'a str) -> &'a str {
    self
      .prompt_selector
      .as_ref()
      .and_then(|s| s.stage_type.as_deref())
      .unwrap_or(recipe_stage)
  }

  /// Capability whose prompt is used, falling back to the provider capability.
  pub fn prompt_capability(&self) -> Option<Capability> {
    self
      .prompt_selector
      .as_ref()
      .and_then(|s| s.capability)
      .or_else(|| self.capability())
  }
}

/// The closed set of actions a node can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
  TextGeneration,
  ImageGeneration,
  VideoGeneration,
  DataTransform,
}

impl NodeKind {
  pub fn capability(&self) -> Option<Capability> {
    match self {
      NodeKind::TextGeneration => Some(Capability::TextGeneration),
      NodeKind::ImageGeneration => Some(Capability::ImageGeneration),
      NodeKind::VideoGeneration => Some(Capability::VideoGeneration),
      NodeKind::DataTransform => None,
    }
  }
}

/// A stage + capability reference used by the adaptor and prompt resolvers.
/// Missing fields fall back to the recipe stage and the node kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stage_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub capability: Option<Capability>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
  #[serde(default)]
  pub on_error: OnError,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}
