use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::descriptor::ProviderDescriptor;

/// Admin-configured alias entry: canonical alias → provider + upstream name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub provider_id: String,
    pub upstream_model: String,
}

/// Alias lookups are injected so the registry stays IO-free; the runtime
/// implementation caches the admin table in the KV.
#[async_trait]
pub trait AliasResolver: Send + Sync {
    async fn resolve(&self, alias: &str) -> Option<ModelMapping>;
}

pub struct NoAliases;

#[async_trait]
impl AliasResolver for NoAliases {
    async fn resolve(&self, _alias: &str) -> Option<ModelMapping> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub provider: Arc<ProviderDescriptor>,
    pub upstream_model: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("no provider serves model {0}")]
    NotFound(String),
    #[error("mapping references unknown provider {0}")]
    UnknownProvider(String),
}

#[derive(Default)]
struct Inner {
    providers: HashMap<String, Arc<ProviderDescriptor>>,
    /// Lower-cased model prefix → provider id, in match priority order.
    prefixes: Vec<(String, String)>,
}

/// Provider registry and model router. Reads are concurrent; mutation is
/// serialised behind the write half of the lock.
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
    aliases: Arc<dyn AliasResolver>,
}

impl ProviderRegistry {
    pub fn new(aliases: Arc<dyn AliasResolver>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            aliases,
        }
    }

    pub fn register(&self, provider: ProviderDescriptor) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner
            .providers
            .insert(provider.id.clone(), Arc::new(provider));
    }

    pub fn remove(&self, provider_id: &str) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.providers.remove(provider_id);
        inner.prefixes.retain(|(_, id)| id != provider_id);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<ProviderDescriptor>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.providers.get(provider_id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ProviderDescriptor>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut providers: Vec<_> = inner.providers.values().cloned().collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        providers
    }

    /// Append a prefix route. Earlier entries win; prefixes are matched
    /// against the lower-cased model name.
    pub fn add_prefix_route(&self, prefix: impl Into<String>, provider_id: impl Into<String>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner
            .prefixes
            .push((prefix.into().to_ascii_lowercase(), provider_id.into()));
    }

    /// Resolve a client model name to a provider and the model name the
    /// upstream expects. Explicit alias mappings win over prefix routing.
    pub async fn resolve(&self, model: &str) -> Result<Resolution, ResolveError> {
        if let Some(mapping) = self.aliases.resolve(model).await {
            let provider = self
                .get(&mapping.provider_id)
                .ok_or_else(|| ResolveError::UnknownProvider(mapping.provider_id.clone()))?;
            return Ok(Resolution {
                provider,
                upstream_model: mapping.upstream_model,
            });
        }

        let lowered = model.to_ascii_lowercase();
        let provider_id = {
            let inner = self.inner.read().expect("registry lock poisoned");
            inner
                .prefixes
                .iter()
                .find(|(prefix, _)| lowered.starts_with(prefix.as_str()))
                .map(|(_, id)| id.clone())
        };

        let Some(provider_id) = provider_id else {
            return Err(ResolveError::NotFound(model.to_string()));
        };
        let provider = self
            .get(&provider_id)
            .ok_or(ResolveError::UnknownProvider(provider_id))?;
        Ok(Resolution {
            provider,
            upstream_model: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AuthKind, WireFormat};

    fn provider(id: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            base_urls: vec![format!("https://{id}.example")],
            auth_kind: AuthKind::ApiKey,
            models: Vec::new(),
            wire: WireFormat::Openai,
        }
    }

    struct OneAlias;

    #[async_trait]
    impl AliasResolver for OneAlias {
        async fn resolve(&self, alias: &str) -> Option<ModelMapping> {
            (alias == "mycheapmodel").then(|| ModelMapping {
                provider_id: "openai".to_string(),
                upstream_model: "gpt-4o-mini".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn alias_mapping_wins_over_prefixes() {
        let registry = ProviderRegistry::new(Arc::new(OneAlias));
        registry.register(provider("openai"));
        registry.add_prefix_route("gpt-", "openai");

        let resolved = registry.resolve("mycheapmodel").await.unwrap();
        assert_eq!(resolved.provider.id, "openai");
        assert_eq!(resolved.upstream_model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn prefix_routing_is_case_insensitive() {
        let registry = ProviderRegistry::new(Arc::new(NoAliases));
        registry.register(provider("gemini"));
        registry.add_prefix_route("gemini-", "gemini");

        let resolved = registry.resolve("Gemini-2.5-Flash").await.unwrap();
        assert_eq!(resolved.provider.id, "gemini");
        assert_eq!(resolved.upstream_model, "Gemini-2.5-Flash");
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let registry = ProviderRegistry::new(Arc::new(NoAliases));
        registry.register(provider("openai"));
        registry.add_prefix_route("gpt-", "openai");

        assert!(matches!(
            registry.resolve("llama-3").await,
            Err(ResolveError::NotFound(_))
        ));
    }
}
