//! Concrete provider adapters, token refreshers and the outbound HTTP
//! client. Wire building and payload translation happen here; state
//! decisions stay in the core.

pub(crate) mod fallback;
pub mod gemini;
pub mod glm;
pub mod http;
pub mod openai;
pub mod refresh;
pub mod seeds;

pub use gemini::GeminiAdapter;
pub use glm::glm_adapter;
pub use http::{HttpClientConfig, WreqUpstreamClient};
pub use openai::OpenAiAdapter;
pub use refresh::{BearerRefresher, OAuthRefresher, parse_id_token_email};
pub use seeds::{
    build_adapters, build_refreshers, builtin_prefix_routes, builtin_provider_seeds,
};
