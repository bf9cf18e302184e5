//! Process-wide engine settings.
//!
//! Loaded once at startup from a JSON file. Every field has a default, so an
//! empty object is a valid settings file:
//!
//! ```json
//! {
//!   "defaultAdaptors": [
//!     { "capability": "textGeneration", "providerId": "echo", "modelId": "echo-1" }
//!   ],
//!   "providers": { "echo": { "prefix": "draft: " } },
//!   "pricing": { "echo-1": { "inputUnitCost": 0.000001, "outputUnitCost": 0.000002 } },
//!   "dispatch": { "mode": "rank_parallel", "maxConcurrentPerProvider": 2 },
//!   "strictPromptVariables": false
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::adaptor::{AdaptorConfig, UnitPricing};
use crate::enums::DispatchMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
  /// Last-resort adaptor per capability when no stored config matches.
  #[serde(default)]
  pub default_adaptors: Vec<AdaptorConfig>,
  /// Provider construction settings (credentials, endpoints), keyed by provider id.
  #[serde(default)]
  pub providers: HashMap<String, serde_json::Value>,
  /// Unit pricing keyed by model id.
  #[serde(default)]
  pub pricing: HashMap<String, UnitPricing>,
  #[serde(default)]
  pub dispatch: DispatchSettings,
  /// Treat every unresolved prompt placeholder as an error.
  #[serde(default)]
  pub strict_prompt_variables: bool,
}

impl EngineSettings {
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  pub fn provider_settings(&self, provider_id: &str) -> serde_json::Value {
    self
      .providers
      .get(provider_id)
      .cloned()
      .unwrap_or(serde_json::Value::Null)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSettings {
  #[serde(default)]
  pub mode: DispatchMode,
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent_per_provider: usize,
}

impl Default for DispatchSettings {
  fn default() -> Self {
    Self {
      mode: DispatchMode::default(),
      max_concurrent_per_provider: default_max_concurrent(),
    }
  }
}

fn default_max_concurrent() -> usize {
  4
}
