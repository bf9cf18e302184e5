use std::collections::HashMap;
use std::sync::Arc;

use crate::adaptor::Adaptor;
use crate::echo::{ECHO_PROVIDER_ID, EchoAdaptor};
use crate::error::{ProviderError, RegistryError};

/// Builds an adaptor from the provider's settings (credentials, endpoint, ...).
pub type AdaptorFactory =
  Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Adaptor>, ProviderError> + Send + Sync>;

/// Explicitly constructed map of provider id to adaptor factory.
#[derive(Clone, Default)]
pub struct AdaptorRegistry {
  factories: HashMap<String, AdaptorFactory>,
}

impl AdaptorRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the built-in providers.
  pub fn with_builtin() -> Self {
    let mut registry = Self::new();
    registry.register(ECHO_PROVIDER_ID, |settings| {
      Ok(Arc::new(EchoAdaptor::from_settings(settings)?) as Arc<dyn Adaptor>)
    });
    registry
  }

  /// Register a factory, replacing any previous one with the same id.
  pub fn register<F>(&mut self, provider_id: impl Into<String>, factory: F)
  where
    F: Fn(&serde_json::Value) -> Result<Arc<dyn Adaptor>, ProviderError> + Send + Sync + 'static,
  {
    self.factories.insert(provider_id.into(), Arc::new(factory));
  }

  /// Register an already constructed adaptor instance.
  pub fn register_instance(&mut self, adaptor: Arc<dyn Adaptor>) {
    let provider_id = adaptor.provider_id().to_string();
    self.register(provider_id, move |_| Ok(adaptor.clone()));
  }

  pub fn contains(&self, provider_id: &str) -> bool {
    self.factories.contains_key(provider_id)
  }

  /// Registered provider ids, sorted.
  pub fn provider_ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
    ids.sort_unstable();
    ids
  }

  /// Construct the adaptor for a provider.
  pub fn resolve(
    &self,
    provider_id: &str,
    settings: &serde_json::Value,
  ) -> Result<Arc<dyn Adaptor>, RegistryError> {
    let factory = self
      .factories
      .get(provider_id)
      .ok_or_else(|| RegistryError::UnknownProvider(provider_id.to_string()))?;
    factory(settings).map_err(|source| RegistryError::Construction {
      provider_id: provider_id.to_string(),
      source,
    })
  }
}

impl std::fmt::Debug for AdaptorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AdaptorRegistry")
      .field("providers", &self.provider_ids())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_builtin_registry() {
    let registry = AdaptorRegistry::with_builtin();
    assert_eq!(registry.provider_ids(), vec![ECHO_PROVIDER_ID]);
    let adaptor = registry.resolve(ECHO_PROVIDER_ID, &json!(null)).unwrap();
    assert_eq!(adaptor.provider_id(), ECHO_PROVIDER_ID);
  }

  #[test]
  fn test_unknown_provider() {
    let registry = AdaptorRegistry::new();
    assert!(matches!(
      registry.resolve("openai", &json!({})),
      Err(RegistryError::UnknownProvider(id)) if id == "openai"
    ));
  }

  #[test]
  fn test_registries_are_independent() {
    let mut a = AdaptorRegistry::new();
    let b = AdaptorRegistry::new();
    a.register_instance(Arc::new(EchoAdaptor::default()));
    assert!(a.contains(ECHO_PROVIDER_ID));
    assert!(!b.contains(ECHO_PROVIDER_ID));
  }

  #[test]
  fn test_construction_failure() {
    let registry = AdaptorRegistry::with_builtin();
    let result = registry.resolve(ECHO_PROVIDER_ID, &json!({ "prefix": 42 }));
    assert!(matches!(result, Err(RegistryError::Construction { .. })));
  }
}
