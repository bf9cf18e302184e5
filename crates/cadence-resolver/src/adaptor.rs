use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cadence_adaptor::{Adaptor, AdaptorRegistry, RegistryError};
use cadence_config::{AdaptorConfig, Capability, EngineSettings, UnitPricing};
use cadence_store::{Store, StoreError};
use tracing::debug;

/// Errors that can occur while choosing and instantiating a provider.
#[derive(Debug, thiserror::Error)]
pub enum AdaptorError {
  #[error("no adaptor configured for {capability} (project {project_id}, stage {stage_type})")]
  NoConfiguration {
    project_id: String,
    stage_type: String,
    capability: Capability,
  },

  #[error("unknown provider: {provider_id}")]
  UnknownProvider { provider_id: String },

  #[error("invalid configuration for provider {provider_id}: {message}")]
  InvalidConfiguration {
    provider_id: String,
    message: String,
  },

  #[error("provider {provider_id} failed its health check")]
  Unhealthy { provider_id: String },

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// The resolution tier a config was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
  ProjectStage,
  ProjectDefault,
  GlobalStage,
  GlobalDefault,
  Settings,
}

/// A provider instance ready for dispatch, with the config that selected it.
#[derive(Clone)]
pub struct ResolvedAdaptor {
  pub adaptor: Arc<dyn Adaptor>,
  pub config: AdaptorConfig,
  pub source: ConfigSource,
  pub pricing: UnitPricing,
}

impl fmt::Debug for ResolvedAdaptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResolvedAdaptor")
      .field("provider_id", &self.config.provider_id)
      .field("model_id", &self.config.model_id)
      .field("source", &self.source)
      .field("pricing", &self.pricing)
      .finish()
  }
}

/// Chooses the provider + model for a (project, stage, capability) triple.
///
/// Lookup order, first match wins:
/// 1. stored config for this project and stage
/// 2. stored config for this project with no stage
/// 3. stored global config (stage-specific, then stage-less)
/// 4. `EngineSettings::default_adaptors`
#[derive(Clone)]
pub struct AdaptorResolver {
  store: Arc<dyn Store>,
  registry: Arc<AdaptorRegistry>,
  settings: Arc<EngineSettings>,
}

impl AdaptorResolver {
  pub fn new(
    store: Arc<dyn Store>,
    registry: Arc<AdaptorRegistry>,
    settings: Arc<EngineSettings>,
  ) -> Self {
    Self {
      store,
      registry,
      settings,
    }
  }

  /// Start a per-execution resolver whose cache lives as long as it does.
  pub fn scoped(&self, project_id: impl Into<String>) -> ScopedAdaptorResolver {
    ScopedAdaptorResolver {
      resolver: self.clone(),
      project_id: project_id.into(),
      cache: HashMap::new(),
    }
  }

  pub async fn resolve(
    &self,
    project_id: &str,
    stage_type: &str,
    capability: Capability,
  ) -> Result<ResolvedAdaptor, AdaptorError> {
    let stored = self.store.list_adaptor_configs(capability).await?;
    let (config, source) = select_config(
      &stored,
      &self.settings.default_adaptors,
      project_id,
      stage_type,
      capability,
    )
    .ok_or_else(|| AdaptorError::NoConfiguration {
      project_id: project_id.to_string(),
      stage_type: stage_type.to_string(),
      capability,
    })?;

    debug!(
      project_id = %project_id,
      stage_type = %stage_type,
      capability = %capability,
      provider_id = %config.provider_id,
      model_id = %config.model_id,
      source = ?source,
      "adaptor_selected"
    );

    let provider_settings = self.settings.provider_settings(&config.provider_id);
    let adaptor = self
      .registry
      .resolve(&config.provider_id, &provider_settings)
      .map_err(|e| match e {
        RegistryError::UnknownProvider(provider_id) => AdaptorError::UnknownProvider { provider_id },
        RegistryError::Construction {
          provider_id,
          source,
        } => AdaptorError::InvalidConfiguration {
          provider_id,
          message: source.to_string(),
        },
      })?;

    if !adaptor.validate_config(&config.parameters) {
      return Err(AdaptorError::InvalidConfiguration {
        provider_id: config.provider_id,
        message: format!("parameters rejected for model {}", config.model_id),
      });
    }

    if !adaptor.health_check().await {
      return Err(AdaptorError::Unhealthy {
        provider_id: config.provider_id,
      });
    }

    let pricing = config
      .pricing
      .or_else(|| self.settings.pricing.get(&config.model_id).copied())
      .unwrap_or_default();

    Ok(ResolvedAdaptor {
      adaptor,
      config,
      source,
      pricing,
    })
  }
}

/// An [`AdaptorResolver`] bound to one execution's project.
///
/// Successful resolutions are memoized by (stage, capability). Failures are
/// not cached.
pub struct ScopedAdaptorResolver {
  resolver: AdaptorResolver,
  project_id: String,
  cache: HashMap<(String, Capability), ResolvedAdaptor>,
}

impl ScopedAdaptorResolver {
  pub fn project_id(&self) -> &str {
    &self.project_id
  }

  pub async fn resolve(
    &mut self,
    stage_type: &str,
    capability: Capability,
  ) -> Result<ResolvedAdaptor, AdaptorError> {
    let key = (stage_type.to_string(), capability);
    if let Some(hit) = self.cache.get(&key) {
      return Ok(hit.clone());
    }

    let resolved = self
      .resolver
      .resolve(&self.project_id, stage_type, capability)
      .await?;
    self.cache.insert(key, resolved.clone());
    Ok(resolved)
  }
}

fn select_config(
  stored: &[AdaptorConfig],
  defaults: &[AdaptorConfig],
  project_id: &str,
  stage_type: &str,
  capability: Capability,
) -> Option<(AdaptorConfig, ConfigSource)> {
  let tiers = [
    (ConfigSource::ProjectStage, Some(project_id), Some(stage_type)),
    (ConfigSource::ProjectDefault, Some(project_id), None),
    (ConfigSource::GlobalStage, None, Some(stage_type)),
    (ConfigSource::GlobalDefault, None, None),
  ];

  for (source, project, stage) in tiers {
    let found = stored.iter().find(|c| {
      c.capability == capability
        && c.project_id.as_deref() == project
        && c.stage_type.as_deref() == stage
    });
    if let Some(config) = found {
      return Some((config.clone(), source));
    }
  }

  [Some(stage_type), None].into_iter().find_map(|stage| {
    defaults
      .iter()
      .find(|c| {
        c.capability == capability && c.project_id.is_none() && c.stage_type.as_deref() == stage
      })
      .map(|c| (c.clone(), ConfigSource::Settings))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use cadence_adaptor::ECHO_PROVIDER_ID;
  use cadence_store::MemoryStore;
  use serde_json::json;

  fn config(
    id: &str,
    project_id: Option<&str>,
    stage_type: Option<&str>,
    model_id: &str,
  ) -> AdaptorConfig {
    AdaptorConfig {
      id: id.to_string(),
      project_id: project_id.map(str::to_string),
      stage_type: stage_type.map(str::to_string),
      capability: Capability::TextGeneration,
      provider_id: ECHO_PROVIDER_ID.to_string(),
      model_id: model_id.to_string(),
      parameters: json!({}),
      pricing: None,
    }
  }

  fn resolver(store: Arc<MemoryStore>, settings: EngineSettings) -> AdaptorResolver {
    AdaptorResolver::new(
      store,
      Arc::new(AdaptorRegistry::with_builtin()),
      Arc::new(settings),
    )
  }

  #[tokio::test]
  async fn test_tier_precedence() {
    let store = Arc::new(MemoryStore::new());
    let resolver = resolver(store.clone(), EngineSettings::default());

    store
      .put_adaptor_config(&config("global", None, None, "global-model"))
      .await
      .unwrap();
    let resolved = resolver
      .resolve("p1", "stage_2", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.config.model_id, "global-model");
    assert_eq!(resolved.source, ConfigSource::GlobalDefault);

    store
      .put_adaptor_config(&config("global-stage", None, Some("stage_2"), "global-stage-model"))
      .await
      .unwrap();
    let resolved = resolver
      .resolve("p1", "stage_2", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.source, ConfigSource::GlobalStage);

    store
      .put_adaptor_config(&config("project", Some("p1"), None, "project-model"))
      .await
      .unwrap();
    let resolved = resolver
      .resolve("p1", "stage_2", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.config.model_id, "project-model");
    assert_eq!(resolved.source, ConfigSource::ProjectDefault);

    store
      .put_adaptor_config(&config("override", Some("p1"), Some("stage_2"), "override-model"))
      .await
      .unwrap();
    let resolved = resolver
      .resolve("p1", "stage_2", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.config.model_id, "override-model");
    assert_eq!(resolved.source, ConfigSource::ProjectStage);

    // Another project still sees the global entry for this stage
    let resolved = resolver
      .resolve("p2", "stage_2", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.config.model_id, "global-stage-model");
  }

  #[tokio::test]
  async fn test_settings_fallback_and_pricing() {
    let store = Arc::new(MemoryStore::new());
    let settings = EngineSettings::from_json(
      r#"{
        "defaultAdaptors": [
          { "capability": "textGeneration", "providerId": "echo", "modelId": "echo-1" },
          { "stageType": "stage_3", "capability": "textGeneration", "providerId": "echo", "modelId": "echo-3" }
        ],
        "pricing": { "echo-1": { "inputUnitCost": 0.5, "outputUnitCost": 1.0 } }
      }"#,
    )
    .unwrap();
    let resolver = resolver(store, settings);

    let resolved = resolver
      .resolve("p1", "stage_1", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.config.model_id, "echo-1");
    assert_eq!(resolved.source, ConfigSource::Settings);
    assert_eq!(resolved.pricing.input_unit_cost, 0.5);

    let resolved = resolver
      .resolve("p1", "stage_3", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.config.model_id, "echo-3");
    assert_eq!(resolved.pricing, UnitPricing::default());
  }

  #[tokio::test]
  async fn test_config_pricing_wins() {
    let store = Arc::new(MemoryStore::new());
    let mut priced = config("global", None, None, "echo-1");
    priced.pricing = Some(UnitPricing {
      input_unit_cost: 2.0,
      output_unit_cost: 3.0,
    });
    store.put_adaptor_config(&priced).await.unwrap();

    let settings = EngineSettings::from_json(
      r#"{ "pricing": { "echo-1": { "inputUnitCost": 0.5, "outputUnitCost": 1.0 } } }"#,
    )
    .unwrap();
    let resolved = resolver(store, settings)
      .resolve("p1", "s", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(resolved.pricing.input_unit_cost, 2.0);
  }

  #[tokio::test]
  async fn test_no_configuration() {
    let store = Arc::new(MemoryStore::new());
    store
      .put_adaptor_config(&config("other-project", Some("p2"), None, "m"))
      .await
      .unwrap();

    let err = resolver(store, EngineSettings::default())
      .resolve("p1", "s", Capability::TextGeneration)
      .await
      .unwrap_err();
    assert!(matches!(err, AdaptorError::NoConfiguration { .. }));
  }

  #[tokio::test]
  async fn test_unknown_provider() {
    let store = Arc::new(MemoryStore::new());
    let mut missing = config("global", None, None, "m");
    missing.provider_id = "nonexistent".to_string();
    store.put_adaptor_config(&missing).await.unwrap();

    let err = resolver(store, EngineSettings::default())
      .resolve("p1", "s", Capability::TextGeneration)
      .await
      .unwrap_err();
    assert!(matches!(err, AdaptorError::UnknownProvider { provider_id } if provider_id == "nonexistent"));
  }

  #[tokio::test]
  async fn test_invalid_parameters() {
    let store = Arc::new(MemoryStore::new());
    let mut bad = config("global", None, None, "m");
    bad.parameters = json!(["not", "an", "object"]);
    store.put_adaptor_config(&bad).await.unwrap();

    let err = resolver(store, EngineSettings::default())
      .resolve("p1", "s", Capability::TextGeneration)
      .await
      .unwrap_err();
    assert!(matches!(err, AdaptorError::InvalidConfiguration { .. }));
  }

  #[tokio::test]
  async fn test_bad_provider_settings() {
    let store = Arc::new(MemoryStore::new());
    store
      .put_adaptor_config(&config("global", None, None, "m"))
      .await
      .unwrap();
    let settings = EngineSettings::from_json(r#"{ "providers": { "echo": { "prefix": 42 } } }"#).unwrap();

    let err = resolver(store, settings)
      .resolve("p1", "s", Capability::TextGeneration)
      .await
      .unwrap_err();
    assert!(matches!(err, AdaptorError::InvalidConfiguration { .. }));
  }

  #[tokio::test]
  async fn test_unhealthy_provider() {
    let store = Arc::new(MemoryStore::new());
    store
      .put_adaptor_config(&config("global", None, None, "m"))
      .await
      .unwrap();
    let settings =
      EngineSettings::from_json(r#"{ "providers": { "echo": { "unhealthy": true } } }"#).unwrap();

    let err = resolver(store, settings)
      .resolve("p1", "s", Capability::TextGeneration)
      .await
      .unwrap_err();
    assert!(matches!(err, AdaptorError::Unhealthy { .. }));
  }

  #[tokio::test]
  async fn test_scoped_cache() {
    let store = Arc::new(MemoryStore::new());
    store
      .put_adaptor_config(&config("global", None, None, "first"))
      .await
      .unwrap();
    let resolver = resolver(store.clone(), EngineSettings::default());

    let mut scoped = resolver.scoped("p1");
    assert_eq!(scoped.project_id(), "p1");
    let first = scoped
      .resolve("s", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(first.config.model_id, "first");

    store
      .put_adaptor_config(&config("project", Some("p1"), Some("s"), "second"))
      .await
      .unwrap();

    // Same execution keeps its choice
    let again = scoped
      .resolve("s", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(again.config.model_id, "first");

    // A new execution sees the new config
    let fresh = resolver
      .scoped("p1")
      .resolve("s", Capability::TextGeneration)
      .await
      .unwrap();
    assert_eq!(fresh.config.model_id, "second");
  }
}
