use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::enums::Capability;

/// A versioned, variable-templated instruction set for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
  pub id: String,
  pub stage_type: String,
  pub version: u32,
  /// Owning project, required for the project scopes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,
  pub prompts: BTreeMap<Capability, CapabilityPrompt>,
  pub scope: TemplateScope,
  #[serde(default = "default_active")]
  pub is_active: bool,
}

fn default_active() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityPrompt {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub system_prompt: Option<String>,
  /// Template text with `{variable}` placeholders.
  pub user_template: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_format: Option<String>,
  /// Placeholders that must resolve, otherwise the node fails.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub required_variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateScope {
  GlobalDefault,
  ProjectDefault,
  ProjectOverride,
}
