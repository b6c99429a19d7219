use std::collections::HashMap;
use std::sync::Arc;

use aigw_provider_core::{
    AuthKind, ProviderAdapter, ProviderDescriptor, TokenRefresher, UpstreamClient, WireFormat,
};

use crate::gemini::GeminiAdapter;
use crate::glm::glm_adapter;
use crate::openai::OpenAiAdapter;
use crate::refresh::{BearerRefresher, OAuthRefresher};

/// Built-in providers inserted on first boot. Admins can edit or disable the
/// rows afterwards; the seed never overwrites existing rows.
pub fn builtin_provider_seeds() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor {
            id: "gemini".to_string(),
            name: "Google Gemini".to_string(),
            base_urls: vec![
                "https://cloudcode-pa.googleapis.com/v1internal".to_string(),
                "https://generativelanguage.googleapis.com/v1internal".to_string(),
            ],
            auth_kind: AuthKind::Oauth,
            models: vec![
                "gemini-2.5-pro".to_string(),
                "gemini-2.5-flash".to_string(),
                "gemini-2.0-flash".to_string(),
            ],
            wire: WireFormat::Gemini,
        },
        ProviderDescriptor {
            id: "openai".to_string(),
            name: "OpenAI".to_string(),
            base_urls: vec!["https://api.openai.com/v1".to_string()],
            auth_kind: AuthKind::ApiKey,
            models: vec![
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
                "gpt-4.1".to_string(),
            ],
            wire: WireFormat::Openai,
        },
        ProviderDescriptor {
            id: "glm".to_string(),
            name: "Zhipu GLM".to_string(),
            base_urls: vec!["https://open.bigmodel.cn/api/paas/v4".to_string()],
            auth_kind: AuthKind::Bearer,
            models: vec!["glm-4".to_string(), "glm-4-flash".to_string()],
            wire: WireFormat::Openai,
        },
    ]
}

/// Default prefix routes matching the built-in providers.
pub fn builtin_prefix_routes() -> Vec<(&'static str, &'static str)> {
    vec![
        ("gemini-", "gemini"),
        ("claude-", "gemini"),
        ("gpt-", "openai"),
        ("o1-", "openai"),
        ("o3-", "openai"),
        ("glm-", "glm"),
    ]
}

/// Build an adapter per provider row, keyed by provider id. The GLM family
/// gets its own error taxonomy on top of the OpenAI wire.
pub fn build_adapters(
    providers: &[ProviderDescriptor],
    client: Arc<dyn UpstreamClient>,
) -> HashMap<String, Arc<dyn ProviderAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    for descriptor in providers {
        let adapter: Arc<dyn ProviderAdapter> = match descriptor.wire {
            WireFormat::Gemini => {
                Arc::new(GeminiAdapter::new(descriptor.clone(), client.clone()))
            }
            WireFormat::Openai if descriptor.id == "glm" => {
                Arc::new(glm_adapter(descriptor.clone(), client.clone()))
            }
            WireFormat::Openai => {
                Arc::new(OpenAiAdapter::new(descriptor.clone(), client.clone()))
            }
        };
        adapters.insert(descriptor.id.clone(), adapter);
    }
    adapters
}

/// Refreshers by auth kind. API keys have no refresher: the token manager
/// serves them straight from the blob.
pub fn build_refreshers(
    client: Arc<dyn UpstreamClient>,
) -> HashMap<AuthKind, Arc<dyn TokenRefresher>> {
    let mut refreshers: HashMap<AuthKind, Arc<dyn TokenRefresher>> = HashMap::new();
    refreshers.insert(AuthKind::Oauth, Arc::new(OAuthRefresher::new(client.clone())));
    refreshers.insert(AuthKind::Bearer, Arc::new(BearerRefresher::new(client)));
    refreshers
}
