use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    ApiKey,
    Bearer,
    Oauth,
}

/// Which translator family the provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Gemini,
    Openai,
}

/// Static description of an upstream provider. Rows in the providers table
/// deserialize into this; the registry serves it to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    /// Base URLs in fallback priority order.
    pub base_urls: Vec<String>,
    pub auth_kind: AuthKind,
    /// Canonical model names this provider serves natively.
    #[serde(default)]
    pub models: Vec<String>,
    pub wire: WireFormat,
}

impl ProviderDescriptor {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|known| known == model)
    }
}
