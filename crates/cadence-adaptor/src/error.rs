use thiserror::Error;

/// A failed provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
  #[error("provider call timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("rate limited by provider")]
  RateLimited { retry_after_ms: Option<u64> },

  #[error("transient provider failure: {message}")]
  Transient { message: String },

  #[error("provider failure: {message}")]
  Permanent { message: String },

  #[error("invalid or expired credentials: {message}")]
  InvalidCredentials { message: String },

  #[error("capability not supported by provider: {capability}")]
  Unsupported { capability: String },
}

impl ProviderError {
  /// Whether a retry may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      ProviderError::Timeout { .. } | ProviderError::RateLimited { .. } | ProviderError::Transient { .. }
    )
  }
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("no adaptor registered for provider '{0}'")]
  UnknownProvider(String),

  #[error("failed to construct adaptor '{provider_id}': {source}")]
  Construction {
    provider_id: String,
    #[source]
    source: ProviderError,
  },
}
