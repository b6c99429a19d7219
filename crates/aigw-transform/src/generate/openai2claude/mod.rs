//! Ingress-side mapping for the OpenAI-compatible endpoint: requests are
//! normalised into the canonical format before the pipeline runs, and
//! canonical results are rendered back as chat completions.

pub mod request;
pub mod response;
pub mod stream;

pub use request::translate_request;
pub use response::translate_response;
pub use stream::ChunkRenderer;
