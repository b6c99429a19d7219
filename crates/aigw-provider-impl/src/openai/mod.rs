pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use aigw_protocol::openai::response::ChatCompletion;
use aigw_protocol::openai::stream::ChatCompletionChunk;
use aigw_protocol::sse::SseParser;
use aigw_provider_core::{
    ErrorParser, ExecuteOutcome, ExecuteRequest, Headers, ProviderAdapter, ProviderDescriptor,
    RequestCtx, StreamResponse, StreamStart, TransportError, UpstreamBody, UpstreamClient,
};
use aigw_transform::generate::claude2openai;

use crate::fallback::{collect_bytes, send_with_fallback};
use self::error::OpenAiErrorParser;

pub const OPENAI_USER_AGENT: &str = "aigw-openai/0.4";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DONE_SENTINEL: &str = "[DONE]";

/// Adapter for providers speaking the OpenAI chat-completions wire. GLM runs
/// through the same adapter with its own descriptor and error parser.
pub struct OpenAiAdapter {
    descriptor: ProviderDescriptor,
    client: Arc<dyn UpstreamClient>,
    parser: Box<dyn ErrorParser>,
    user_agent: &'static str,
}

impl OpenAiAdapter {
    pub fn new(descriptor: ProviderDescriptor, client: Arc<dyn UpstreamClient>) -> Self {
        Self::with_parser(descriptor, client, Box::new(OpenAiErrorParser), OPENAI_USER_AGENT)
    }

    pub fn with_parser(
        descriptor: ProviderDescriptor,
        client: Arc<dyn UpstreamClient>,
        parser: Box<dyn ErrorParser>,
        user_agent: &'static str,
    ) -> Self {
        Self {
            descriptor,
            client,
            parser,
            user_agent,
        }
    }

    fn endpoint_urls(&self) -> Vec<String> {
        self.descriptor
            .base_urls
            .iter()
            .map(|base| format!("{}/chat/completions", base.trim_end_matches('/')))
            .collect()
    }

    fn headers(&self, token: &str, stream: bool) -> Headers {
        let mut headers = vec![
            ("authorization".to_string(), format!("Bearer {token}")),
            ("content-type".to_string(), "application/json".to_string()),
            ("user-agent".to_string(), self.user_agent.to_string()),
        ];
        if stream {
            headers.push(("accept".to_string(), "text/event-stream".to_string()));
        }
        headers
    }

    fn encode_payload(&self, req: &ExecuteRequest, stream: bool) -> Result<Bytes, TransportError> {
        let wire = claude2openai::translate_request(&req.model, &req.request, stream);
        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|err| TransportError::other(format!("encode request: {err}")))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        &self.descriptor.id
    }

    fn error_parser(&self) -> &dyn ErrorParser {
        self.parser.as_ref()
    }

    async fn execute(
        &self,
        _ctx: &RequestCtx,
        req: &ExecuteRequest,
    ) -> Result<ExecuteOutcome, TransportError> {
        let payload = self.encode_payload(req, false)?;
        let headers = self.headers(&req.token, false);
        let started = Instant::now();

        let response = send_with_fallback(
            self.client.as_ref(),
            req.proxy_url.as_deref(),
            &self.endpoint_urls(),
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

        let completion: ChatCompletion = serde_json::from_slice(&body)
            .map_err(|err| TransportError::other(format!("decode upstream response: {err}")))?;
        let message = claude2openai::translate_response(&req.request.model, completion);
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
        let payload = self.encode_payload(req, true)?;
        let headers = self.headers(&req.token, true);
        let started = Instant::now();

        let response = send_with_fallback(
            self.client.as_ref(),
            req.proxy_url.as_deref(),
            &self.endpoint_urls(),
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
            let mut translator = claude2openai::OpenAiStreamTranslator::new(model);

            let mut failed = false;
            'pump: while let Some(chunk) = upstream.recv().await {
                for message in parser.feed(&chunk) {
                    let data = message.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == DONE_SENTINEL {
                        break 'pump;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => {
                            for event in translator.push_chunk(chunk) {
                                if data_tx.send(event.to_frame()).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(_) => {
                            if let Some(error) = stream_error_message(data) {
                                let _ = err_tx.send(error).await;
                                failed = true;
                                break 'pump;
                            }
                            // Unknown frame shapes are skipped, not fatal.
                            tracing::debug!(frame = data, "skipping unrecognised stream frame");
                        }
                    }
                }
            }

            // A failed stream ends on the err channel; only clean streams
            // get the closing frames and the done signal.
            if failed {
                return;
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

fn stream_error_message(data: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(data).ok()?;
    let error = value.get("error")?;
    Some(
        error
            .get("message")
            .and_then(|message| message.as_str())
            .unwrap_or("upstream stream error")
            .to_string(),
    )
}
