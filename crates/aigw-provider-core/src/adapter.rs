use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use aigw_protocol::claude::request::MessagesRequest;
use aigw_protocol::claude::response::Message;

use crate::account::Account;
use crate::error::ErrorParser;
use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// Coarse failure classes, driven by the HTTP client's own error
/// introspection. Anything finer would be guesswork; the state machine only
/// needs "transient with short backoff" either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level failure: no HTTP response was obtained.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream transport failure ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub stream: bool,
    /// Per-request deadline; `None` on streaming bodies (idle timeout still
    /// applies).
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

/// IO seam between adapters and the HTTP client. `proxy` selects the cached
/// client for that outbound hop (`None` = direct).
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        proxy: Option<&'a str>,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub trace_id: String,
}

/// One upstream attempt, fully resolved: which account, which proxy, which
/// already-acquired token.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Upstream model name (post-resolution).
    pub model: String,
    pub request: MessagesRequest,
    pub stream: bool,
    pub account: Account,
    pub proxy_url: Option<String>,
    pub token: String,
}

/// Non-stream result. On 2xx `body` holds canonical response bytes (already
/// translated); on failure it holds the raw upstream error body for the
/// error parser.
#[derive(Debug)]
pub struct ExecuteOutcome {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    pub latency: Duration,
}

impl ExecuteOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Live upstream stream. `data` yields canonical SSE frames; `err` fires at
/// most once on a terminal mid-stream error; `done` resolves on normal
/// completion. The producer closes all three on exit; the single consumer
/// either drains to closure or drops the struct to cancel.
#[derive(Debug)]
pub struct StreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub data: mpsc::Receiver<Bytes>,
    pub err: mpsc::Receiver<String>,
    pub done: oneshot::Receiver<()>,
}

/// Outcome of a stream attempt: either an open 2xx stream, or a non-2xx
/// response collected for classification.
#[derive(Debug)]
pub enum StreamStart {
    Stream(StreamResponse),
    Http(ExecuteOutcome),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTokens {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTokens {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    fn error_parser(&self) -> &dyn ErrorParser;

    async fn execute(
        &self,
        ctx: &RequestCtx,
        req: &ExecuteRequest,
    ) -> Result<ExecuteOutcome, TransportError>;

    async fn execute_stream(
        &self,
        ctx: &RequestCtx,
        req: &ExecuteRequest,
    ) -> Result<StreamStart, TransportError>;

    /// Token usage for quota accounting. The default reads the canonical
    /// response body every adapter produces; providers with richer usage
    /// surfaces can override.
    fn extract_usage(&self, canonical_body: &[u8]) -> Option<UsageTokens> {
        let message: Message = serde_json::from_slice(canonical_body).ok()?;
        Some(UsageTokens {
            input_tokens: message.usage.input_tokens as u64,
            output_tokens: message.usage.output_tokens as u64,
        })
    }
}
