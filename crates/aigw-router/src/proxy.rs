use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio_stream::wrappers::ReceiverStream;

use aigw_core::{Executor, GatewayError, hash_admin_key};
use aigw_protocol::claude::error::{ErrorDetail, ErrorEnvelope};
use aigw_protocol::claude::request::MessagesRequest;
use aigw_protocol::claude::response::Message;
use aigw_protocol::claude::stream::StreamEvent;
use aigw_protocol::openai::request::ChatCompletionRequest;
use aigw_protocol::sse::{SseParser, data_frame};
use aigw_provider_core::{ProviderRegistry, StreamResponse};
use aigw_storage::Repository;
use aigw_transform::generate::openai2claude;

#[derive(Clone)]
pub struct ProxyState {
    pub executor: Arc<Executor>,
    pub registry: Arc<ProviderRegistry>,
    pub repo: Repository,
    pub admin_key_hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    stream: Option<bool>,
    #[allow(dead_code)]
    key: Option<String>,
}

pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/messages", post(claude_messages))
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/models", get(list_models))
        .layer(middleware::from_fn_with_state(state.clone(), client_auth))
        .with_state(state)
}

/// Gateway API-key check. Accepts `x-api-key`, a bearer token or `?key=`;
/// the admin key always passes.
async fn client_auth(
    State(state): State<ProxyState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let Some(key) = extract_client_key(req.headers(), req.uri().query()) else {
        return Err(unauthorized("missing api key"));
    };

    let authorized = hash_admin_key(&key) == state.admin_key_hash
        || matches!(state.repo.find_enabled_client_key(&key).await, Ok(Some(_)));
    if !authorized {
        return Err(unauthorized("invalid api key"));
    }

    Ok(next.run(req).await)
}

fn extract_client_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("x-api-key")
        && let Ok(value) = value.to_str()
    {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
    {
        let value = value.trim();
        let prefix = "Bearer ";
        if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = value[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = query?;
    let parsed: std::collections::HashMap<String, String> =
        serde_urlencoded::from_str(query).ok()?;
    let key = parsed.get("key")?.trim();
    (!key.is_empty()).then(|| key.to_string())
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorEnvelope::new("authentication_error", message)),
    )
        .into_response()
}

fn gateway_error_response(err: &GatewayError) -> Response {
    (
        StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorEnvelope::new(err.kind, err.message.clone())),
    )
        .into_response()
}

// ---- Anthropic-compatible endpoint ----

async fn claude_messages(
    State(state): State<ProxyState>,
    Query(query): Query<StreamQuery>,
    Json(request): Json<MessagesRequest>,
) -> Response {
    let stream = query.stream.unwrap_or(false) || request.wants_stream();

    if !stream {
        return match state.executor.execute(request).await {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(err) => gateway_error_response(&err),
        };
    }

    match state.executor.execute_stream(request).await {
        Ok(upstream) => sse_response(forward_canonical_frames(upstream)),
        Err(err) => gateway_error_response(&err),
    }
}

/// Pipe translated frames to the client, flushing frame by frame. The
/// forwarder ends when data closes, err fires or the client goes away
/// (send failure drops the upstream receiver, cancelling the producer).
fn forward_canonical_frames(mut upstream: StreamResponse) -> ReceiverStream<Bytes> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = upstream.data.recv() => match frame {
                    Some(frame) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                error = upstream.err.recv() => {
                    if let Some(message) = error {
                        let event = StreamEvent::Error {
                            error: ErrorDetail {
                                r#type: "api_error".to_string(),
                                message,
                            },
                        };
                        let _ = tx.send(event.to_frame()).await;
                    }
                    break;
                }
            }
        }
        // Completion is signalled by channel closure; the done receiver is
        // dropped with the response.
    });
    ReceiverStream::new(rx)
}

fn sse_response(stream: ReceiverStream<Bytes>) -> Response {
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ---- OpenAI-compatible endpoint ----

async fn openai_chat_completions(
    State(state): State<ProxyState>,
    Query(query): Query<StreamQuery>,
    Json(wire): Json<ChatCompletionRequest>,
) -> Response {
    let stream = query.stream.unwrap_or(false) || wire.wants_stream();
    let canonical = openai2claude::translate_request(&wire);
    let created = OffsetDateTime::now_utc().unix_timestamp();

    if !stream {
        return match state.executor.execute(canonical).await {
            Ok(body) => match serde_json::from_slice::<Message>(&body) {
                Ok(message) => {
                    Json(openai2claude::translate_response(message, created)).into_response()
                }
                Err(err) => openai_error_response(&GatewayError::internal(format!(
                    "canonical response decode failed: {err}"
                ))),
            },
            Err(err) => openai_error_response(&err),
        };
    }

    match state.executor.execute_stream(canonical).await {
        Ok(upstream) => sse_response(forward_openai_chunks(upstream, created)),
        Err(err) => openai_error_response(&err),
    }
}

fn openai_error_response(err: &GatewayError) -> Response {
    (
        StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(serde_json::json!({
            "error": { "message": err.message, "type": err.kind }
        })),
    )
        .into_response()
}

/// Re-render canonical SSE frames as chat-completion chunks, closing with
/// the `[DONE]` sentinel.
fn forward_openai_chunks(mut upstream: StreamResponse, created: i64) -> ReceiverStream<Bytes> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut renderer = openai2claude::ChunkRenderer::new(created);

        'pump: loop {
            tokio::select! {
                biased;
                frame = upstream.data.recv() => match frame {
                    Some(frame) => {
                        for message in parser.feed(&frame) {
                            if message.data.is_empty() {
                                continue;
                            }
                            let Ok(event) = serde_json::from_str::<StreamEvent>(&message.data)
                            else {
                                continue;
                            };
                            for chunk in renderer.render(&event) {
                                let Ok(encoded) = serde_json::to_string(&chunk) else {
                                    continue;
                                };
                                if tx.send(data_frame(&encoded)).await.is_err() {
                                    break 'pump;
                                }
                            }
                        }
                    }
                    None => break,
                },
                error = upstream.err.recv() => {
                    if let Some(message) = error {
                        let payload = serde_json::json!({
                            "error": { "message": message, "type": "api_error" }
                        });
                        let _ = tx.send(data_frame(&payload.to_string())).await;
                    }
                    break;
                }
            }
        }

        let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await;
    });
    ReceiverStream::new(rx)
}

// ---- model listing ----

async fn list_models(State(state): State<ProxyState>) -> Response {
    let mut models: Vec<serde_json::Value> = Vec::new();
    for provider in state.registry.list() {
        for model in &provider.models {
            models.push(serde_json::json!({
                "id": model,
                "object": "model",
                "owned_by": provider.id,
            }));
        }
    }
    if let Ok(mappings) = state.repo.list_model_mappings().await {
        for mapping in mappings {
            models.push(serde_json::json!({
                "id": mapping.alias,
                "object": "model",
                "owned_by": mapping.provider_id,
            }));
        }
    }
    Json(serde_json::json!({ "object": "list", "data": models })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_key_extraction_prefers_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-x".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer sk-b".parse().unwrap());
        assert_eq!(
            extract_client_key(&headers, None).as_deref(),
            Some("sk-x")
        );
    }

    #[test]
    fn bearer_and_query_fallbacks_work() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "bearer sk-b".parse().unwrap());
        assert_eq!(
            extract_client_key(&headers, None).as_deref(),
            Some("sk-b")
        );

        let headers = HeaderMap::new();
        assert_eq!(
            extract_client_key(&headers, Some("stream=true&key=sk-q")).as_deref(),
            Some("sk-q")
        );
        assert_eq!(extract_client_key(&headers, Some("stream=true")), None);
    }
}
