use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Everything a provider needs to serve one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
  pub model_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub system_prompt: Option<String>,
  pub prompt: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_format: Option<String>,
  /// Model parameters from the adaptor config.
  #[serde(default)]
  pub parameters: serde_json::Value,
  /// The node's resolved input.
  #[serde(default)]
  pub input: serde_json::Value,
}

/// Usage units as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
  pub input_units: u64,
  pub output_units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
  pub payload: serde_json::Value,
  #[serde(default)]
  pub usage: ProviderUsage,
}

/// A generation backend.
///
/// Providers implement the capabilities they support; the others report
/// [`ProviderError::Unsupported`].
#[async_trait]
pub trait Adaptor: Send + Sync {
  /// Registry id of this provider.
  fn provider_id(&self) -> &str;

  async fn generate_text(
    &self,
    request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError>;

  async fn generate_image(
    &self,
    _request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError> {
    Err(ProviderError::Unsupported {
      capability: "imageGeneration".to_string(),
    })
  }

  async fn generate_video(
    &self,
    _request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError> {
    Err(ProviderError::Unsupported {
      capability: "videoGeneration".to_string(),
    })
  }

  /// Cheap local check of model parameters and credentials.
  fn validate_config(&self, _parameters: &serde_json::Value) -> bool {
    true
  }

  /// Whether the provider is currently able to serve requests.
  async fn health_check(&self) -> bool {
    true
  }
}
