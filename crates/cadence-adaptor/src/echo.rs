use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::adaptor::{Adaptor, GenerationRequest, ProviderResponse, ProviderUsage};
use crate::error::ProviderError;

pub const ECHO_PROVIDER_ID: &str = "echo";

/// Reflects the prompt back. Used for dry runs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EchoAdaptor {
  /// Prepended to every generated text.
  prefix: String,
  /// Reported by `health_check`; lets a settings file simulate an outage.
  unhealthy: bool,
}

impl EchoAdaptor {
  pub fn from_settings(settings: &serde_json::Value) -> Result<Self, ProviderError> {
    if settings.is_null() {
      return Ok(Self::default());
    }
    serde_json::from_value(settings.clone()).map_err(|e| ProviderError::Permanent {
      message: format!("invalid echo settings: {}", e),
    })
  }

  fn usage(request: &GenerationRequest, output: &str) -> ProviderUsage {
    let system = request.system_prompt.as_deref().unwrap_or_default();
    ProviderUsage {
      input_units: word_count(system) + word_count(&request.prompt),
      output_units: word_count(output),
    }
  }

  fn media(&self, kind: &str, request: &GenerationRequest) -> ProviderResponse {
    ProviderResponse {
      payload: json!({
        "uri": format!("echo://{}/{}", kind, request.model_id),
        "prompt": request.prompt,
      }),
      usage: Self::usage(request, ""),
    }
  }
}

fn word_count(text: &str) -> u64 {
  text.split_whitespace().count() as u64
}

#[async_trait]
impl Adaptor for EchoAdaptor {
  fn provider_id(&self) -> &str {
    ECHO_PROVIDER_ID
  }

  async fn generate_text(
    &self,
    request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError> {
    let text = format!("{}{}", self.prefix, request.prompt);
    Ok(ProviderResponse {
      usage: Self::usage(request, &text),
      payload: json!({ "text": text, "model": request.model_id }),
    })
  }

  async fn generate_image(
    &self,
    request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError> {
    Ok(self.media("image", request))
  }

  async fn generate_video(
    &self,
    request: &GenerationRequest,
  ) -> Result<ProviderResponse, ProviderError> {
    Ok(self.media("video", request))
  }

  fn validate_config(&self, parameters: &serde_json::Value) -> bool {
    parameters.is_null() || parameters.is_object()
  }

  async fn health_check(&self) -> bool {
    !self.unhealthy
  }
}
