use serde::{Deserialize, Serialize};

use crate::enums::Capability;

/// Which provider and model serve a capability.
///
/// Entries without `project_id` are global defaults. Entries with a
/// `project_id` but no `stage_type` are project-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptorConfig {
  #[serde(default)]
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stage_type: Option<String>,
  pub capability: Capability,
  pub provider_id: String,
  pub model_id: String,
  #[serde(default)]
  pub parameters: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pricing: Option<UnitPricing>,
}

/// Per-unit cost of a model, in the billing currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPricing {
  #[serde(default)]
  pub input_unit_cost: f64,
  #[serde(default)]
  pub output_unit_cost: f64,
}

impl UnitPricing {
  pub fn cost(&self, input_units: u64, output_units: u64) -> f64 {
    input_units as f64 * self.input_unit_cost + output_units as f64 * self.output_unit_cost
  }
}
