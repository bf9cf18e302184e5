//! Node action dispatch.
//!
//! [`ActionDispatcher`] is the one place node kinds map to provider calls.
//! Each attempt is bounded by the node's `timeoutMs`; with `onError = retry`,
//! transient failures are retried with the recipe's backoff. The whole call,
//! retries included, is bounded by the execution deadline when one is set.

use std::time::Duration;

use cadence_adaptor::{GenerationRequest, ProviderError, ProviderResponse};
use cadence_config::{ErrorPolicy, NodeKind, OnError, RetryPolicy};
use cadence_resolver::{ResolvedAdaptor, ResolvedPrompt};
use cadence_store::Usage;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::error::DispatchError;

/// A fully prepared node action.
#[derive(Debug, Clone)]
pub struct Invocation {
  pub node_id: String,
  pub kind: NodeKind,
  pub input: Map<String, Value>,
  /// Present for generation nodes.
  pub adaptor: Option<ResolvedAdaptor>,
  pub prompt: Option<ResolvedPrompt>,
  pub policy: ErrorPolicy,
}

impl Invocation {
  pub fn provider_id(&self) -> Option<&str> {
    self.adaptor.as_ref().map(|a| a.config.provider_id.as_str())
  }
}

/// Normalized result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
  pub payload: Value,
  pub usage: Usage,
  pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct DispatchFailure {
  pub error: DispatchError,
  pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ActionDispatcher {
  retry_policy: RetryPolicy,
}

impl ActionDispatcher {
  pub fn new(retry_policy: RetryPolicy) -> Self {
    Self { retry_policy }
  }

  #[instrument(
    name = "node_dispatch",
    skip(self, invocation, deadline),
    fields(node_id = %invocation.node_id, kind = ?invocation.kind)
  )]
  pub async fn dispatch(
    &self,
    invocation: &Invocation,
    deadline: Option<Instant>,
  ) -> Result<DispatchOutcome, DispatchFailure> {
    let mut attempts = 0;
    let result = match deadline {
      Some(deadline) => {
        match tokio::time::timeout_at(deadline, self.run_attempts(invocation, &mut attempts)).await {
          Ok(result) => result,
          Err(_) => Err(DispatchError::DeadlineExceeded),
        }
      }
      None => self.run_attempts(invocation, &mut attempts).await,
    };

    result
      .map(|(payload, usage)| DispatchOutcome {
        payload,
        usage,
        attempts,
      })
      .map_err(|error| DispatchFailure { error, attempts })
  }

  async fn run_attempts(
    &self,
    invocation: &Invocation,
    attempts: &mut u32,
  ) -> Result<(Value, Usage), DispatchError> {
    let max_attempts = match invocation.policy.on_error {
      OnError::Retry => invocation.policy.retry_count.saturating_add(1),
      OnError::Fail | OnError::Skip => 1,
    };

    loop {
      *attempts += 1;
      match self.attempt(invocation).await {
        Ok(done) => return Ok(done),
        Err(error) if error.is_transient() && *attempts < max_attempts => {
          let delay = match &error {
            DispatchError::Provider(ProviderError::RateLimited {
              retry_after_ms: Some(ms),
            }) => Duration::from_millis(*ms).min(Duration::from_millis(self.retry_policy.max_delay_ms)),
            _ => self.retry_policy.delay_for(*attempts),
          };
          warn!(
            node_id = %invocation.node_id,
            attempt = *attempts,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "node_retrying"
          );
          tokio::time::sleep(delay).await;
        }
        Err(error) => return Err(error),
      }
    }
  }

  async fn attempt(&self, invocation: &Invocation) -> Result<(Value, Usage), DispatchError> {
    match invocation.policy.timeout_ms {
      Some(timeout_ms) => {
        tokio::time::timeout(Duration::from_millis(timeout_ms), perform(invocation))
          .await
          .map_err(|_| DispatchError::Timeout { timeout_ms })?
      }
      None => perform(invocation).await,
    }
  }
}

async fn perform(invocation: &Invocation) -> Result<(Value, Usage), DispatchError> {
  match invocation.kind {
    NodeKind::TextGeneration => {
      let (adaptor, request) = build_request(invocation)?;
      let response = adaptor.adaptor.generate_text(&request).await?;
      Ok(normalize(adaptor, response))
    }
    NodeKind::ImageGeneration => {
      let (adaptor, request) = build_request(invocation)?;
      let response = adaptor.adaptor.generate_image(&request).await?;
      Ok(normalize(adaptor, response))
    }
    NodeKind::VideoGeneration => {
      let (adaptor, request) = build_request(invocation)?;
      let response = adaptor.adaptor.generate_video(&request).await?;
      Ok(normalize(adaptor, response))
    }
    NodeKind::DataTransform => {
      let mut output = invocation.input.clone();
      if let Some(prompt) = &invocation.prompt {
        output.insert("text".to_string(), Value::String(prompt.text.clone()));
      }
      Ok((Value::Object(output), Usage::default()))
    }
  }
}

fn build_request(
  invocation: &Invocation,
) -> Result<(&ResolvedAdaptor, GenerationRequest), DispatchError> {
  let incomplete = |missing| DispatchError::Incomplete {
    node_id: invocation.node_id.clone(),
    missing,
  };
  let adaptor = invocation
    .adaptor
    .as_ref()
    .ok_or_else(|| incomplete("provider"))?;
  let prompt = invocation
    .prompt
    .as_ref()
    .ok_or_else(|| incomplete("prompt"))?;

  let request = GenerationRequest {
    model_id: adaptor.config.model_id.clone(),
    system_prompt: prompt.system_prompt.clone(),
    prompt: prompt.text.clone(),
    output_format: prompt.output_format.clone(),
    parameters: adaptor.config.parameters.clone(),
    input: Value::Object(invocation.input.clone()),
  };
  Ok((adaptor, request))
}

fn normalize(adaptor: &ResolvedAdaptor, response: ProviderResponse) -> (Value, Usage) {
  let usage = Usage {
    input_units: response.usage.input_units,
    output_units: response.usage.output_units,
    estimated_cost: adaptor
      .pricing
      .cost(response.usage.input_units, response.usage.output_units),
  };
  (response.payload, usage)
}
