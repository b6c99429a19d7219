pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use aigw_protocol::gemini::response::decode_response;
use aigw_protocol::sse::SseParser;
use aigw_provider_core::{
    ErrorParser, ExecuteOutcome, ExecuteRequest, Headers, ProviderAdapter, ProviderDescriptor,
    RequestCtx, StreamResponse, StreamStart, TransportError, UpstreamBody, UpstreamClient,
};
use aigw_transform::generate::claude2gemini;

use crate::fallback::{collect_bytes, send_with_fallback};
use self::error::GeminiErrorParser;

pub const GEMINI_USER_AGENT: &str = "aigw-gemini/0.4";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Adapter for Gemini-wire providers. Speaks the internal generate endpoint
/// (`:generateContent` / `:streamGenerateContent`) with the model name inside
/// the envelope and responses wrapped in `{"response": ...}`.
pub struct GeminiAdapter {
    descriptor: ProviderDescriptor,
    client: Arc<dyn UpstreamClient>,
    parser: GeminiErrorParser,
}

impl GeminiAdapter {
    pub fn new(descriptor: ProviderDescriptor, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            descriptor,
            client,
            parser: GeminiErrorParser,
        }
    }

    fn endpoint_urls(&self, stream: bool) -> Vec<String> {
        let method = if stream {
            ":streamGenerateContent?alt=sse"
        } else {
            ":generateContent"
        };
        self.descriptor
            .base_urls
            .iter()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), method))
            .collect()
    }

    fn headers(&self, token: &str, stream: bool) -> Headers {
        let mut headers = vec![
            ("authorization".to_string(), format!("Bearer {token}")),
            ("content-type".to_string(), "application/json".to_string()),
            ("user-agent".to_string(), GEMINI_USER_AGENT.to_string()),
        ];
        if stream {
            headers.push(("accept".to_string(), "text/event-stream".to_string()));
        }
        headers
    }

    fn encode_payload(&self, req: &ExecuteRequest) -> Result<Bytes, TransportError> {
        let envelope = claude2gemini::translate_request(&req.model, &req.request);
        serde_json::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(|err| TransportError::other(format!("encode request: {err}")))
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_id(&self) -> &str {
        &self.descriptor.id
    }

    fn error_parser(&self) -> &dyn ErrorParser {
        &self.parser
    }

    async fn execute(
        &self,
        _ctx: &RequestCtx,
        req: &ExecuteRequest,
    ) -> Result<ExecuteOutcome, TransportError> {
        let payload = self.encode_payload(req)?;
        let headers = self.headers(&req.token, false);
        let started = Instant::now();

        let response = send_with_fallback(
            self.client.as_ref(),
            req.proxy_url.as_deref(),
            &self.endpoint_urls(false),
            &headers,
            payload,
            false,
            Some(REQUEST_TIMEOUT),
        )
        .await?;

        let status = response.status;
        let response_headers = response.headers;
        let body = collect_bytes(response.body).await;
        let latency = started.elapsed();

        if !(200..300).contains(&status) {
            return Ok(ExecuteOutcome {
                status,
                headers: response_headers,
                body,
                latency,
            });
        }

        let decoded = decode_response(&body)
            .map_err(|err| TransportError::other(format!("decode upstream response: {err}")))?;
        let message = claude2gemini::translate_response(&req.request.model, decoded);
        let canonical = serde_json::to_vec(&message)
            .map(Bytes::from)
            .map_err(|err| TransportError::other(format!("encode response: {err}")))?;

        Ok(ExecuteOutcome {
            status,
            headers: response_headers,
            body: canonical,
            latency,
        })
    }

    async fn execute_stream(
        &self,
        _ctx: &RequestCtx,
        req: &ExecuteRequest,
    ) -> Result<StreamStart, TransportError> {
        let payload = self.encode_payload(req)?;
        let headers = self.headers(&req.token, true);
        let started = Instant::now();

        let response = send_with_fallback(
            self.client.as_ref(),
            req.proxy_url.as_deref(),
            &self.endpoint_urls(true),
            &headers,
            payload,
            true,
            None,
        )
        .await?;

        let status = response.status;
        let response_headers = response.headers;
        if !(200..300).contains(&status) {
            let body = collect_bytes(response.body).await;
            return Ok(StreamStart::Http(ExecuteOutcome {
                status,
                headers: response_headers,
                body,
                latency: started.elapsed(),
            }));
        }

        let mut upstream = match response.body {
            UpstreamBody::Stream(rx) => rx,
            UpstreamBody::Bytes(_) => {
                return Err(TransportError::other("expected a streaming body"));
            }
        };

        let (data_tx, data_rx) = tokio::sync::mpsc::channel::<Bytes>(64);
        let (err_tx, err_rx) = tokio::sync::mpsc::channel::<String>(4);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let model = req.request.model.clone();

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut translator = claude2gemini::GeminiStreamTranslator::new(model);
            let mut failed = false;

            'pump: while let Some(chunk) = upstream.recv().await {
                for message in parser.feed(&chunk) {
                    if message.data.is_empty() {
                        continue;
                    }
                    match decode_chunk(&message.data) {
                        Ok(chunk) => {
                            for event in translator.push_chunk(chunk) {
                                if data_tx.send(event.to_frame()).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(error) => {
                            let _ = err_tx.send(error).await;
                            failed = true;
                            break 'pump;
                        }
                    }
                }
            }

            // A failed stream ends on the err channel; only clean streams
            // get the closing frames and the done signal.
            if failed {
                return;
            }
            for message in parser.finish() {
                if message.data.is_empty() {
                    continue;
                }
                if let Ok(chunk) = decode_chunk(&message.data) {
                    for event in translator.push_chunk(chunk) {
                        if data_tx.send(event.to_frame()).await.is_err() {
                            return;
                        }
                    }
                }
            }
            for event in translator.finish() {
                if data_tx.send(event.to_frame()).await.is_err() {
                    return;
                }
            }
            let _ = done_tx.send(());
        });

        Ok(StreamStart::Stream(StreamResponse {
            status,
            headers: response_headers,
            data: data_rx,
            err: err_rx,
            done: done_rx,
        }))
    }
}

fn decode_chunk(
    data: &str,
) -> Result<aigw_protocol::gemini::response::GenerateContentResponse, String> {
    match decode_response(data.as_bytes()) {
        Ok(chunk) => Ok(chunk),
        Err(err) => {
            // Mid-stream error payloads arrive as `{"error": {...}}`.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(data)
                && let Some(error) = value.get("error")
            {
                let message = error
                    .get("message")
                    .and_then(|message| message.as_str())
                    .unwrap_or("upstream stream error");
                return Err(message.to_string());
            }
            Err(format!("malformed stream chunk: {err}"))
        }
    }
}
