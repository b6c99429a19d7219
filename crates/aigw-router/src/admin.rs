use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::Deserialize;
use time::OffsetDateTime;
use time::macros::format_description;

use aigw_core::{KvAliasResolver, ProxyPool, TokenManager, hash_admin_key};
use aigw_provider_core::{
    Account, AccountStateManager, ProviderDescriptor, ProviderRegistry,
};
use aigw_storage::{KvStore, ProxyStatsQuery, QuotaPattern, Repository};

#[derive(Clone)]
pub struct AdminState {
    pub repo: Repository,
    pub kv: Arc<dyn KvStore>,
    pub registry: Arc<ProviderRegistry>,
    pub manager: Arc<AccountStateManager>,
    pub proxies: Arc<ProxyPool>,
    pub aliases: Arc<KvAliasResolver>,
    pub tokens: Arc<TokenManager>,
    pub admin_key_hash: String,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route(
            "/providers/{id}",
            put(upsert_provider).delete(delete_provider),
        )
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/{id}",
            put(update_account).delete(delete_account),
        )
        .route("/accounts/{id}/active", put(set_account_active))
        .route("/accounts/{id}/state", get(account_state))
        .route("/proxies", get(list_proxies).post(create_proxy))
        .route("/proxies/{id}", axum::routing::delete(delete_proxy))
        .route("/proxies/{id}/active", put(set_proxy_active))
        .route("/proxies/recalculate", post(recalculate_proxies))
        .route("/mappings", get(list_mappings))
        .route(
            "/mappings/{alias}",
            put(upsert_mapping).delete(delete_mapping),
        )
        .route(
            "/quota-patterns",
            get(list_quota_patterns).put(upsert_quota_pattern),
        )
        .route(
            "/quota-patterns/{account_id}/{model}",
            axum::routing::delete(delete_quota_pattern),
        )
        .route("/client-keys", get(list_client_keys).post(create_client_key))
        .route(
            "/client-keys/{id}",
            axum::routing::delete(delete_client_key),
        )
        .route("/client-keys/{id}/enabled", put(set_client_key_enabled))
        .route("/logs", get(recent_logs))
        .route("/stats/proxies", get(proxy_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = extract_admin_key(req.headers(), req.uri().query())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if hash_admin_key(&key) != state.admin_key_hash {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
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
    let key = parsed.get("admin_key")?.trim();
    (!key.is_empty()).then(|| key.to_string())
}

fn db_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn ok_json(value: serde_json::Value) -> Response {
    Json(value).into_response()
}

async fn health(State(state): State<AdminState>) -> Response {
    let db_ok = state.repo.health().await.is_ok();
    let kv_ok = state.kv.get("health:ping").await.is_ok();
    let status = if db_ok && kv_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "db": db_ok, "kv": kv_ok }))).into_response()
}

// ---- providers ----

async fn list_providers(State(state): State<AdminState>) -> Response {
    match state.repo.list_providers().await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "id": row.id,
                        "name": row.name,
                        "base_urls": row.base_urls,
                        "auth_kind": row.auth_kind,
                        "models": row.models,
                        "wire": row.wire,
                        "enabled": row.enabled,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct ProviderBody {
    name: String,
    base_urls: Vec<String>,
    auth_kind: aigw_provider_core::AuthKind,
    #[serde(default)]
    models: Vec<String>,
    wire: aigw_provider_core::WireFormat,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn upsert_provider(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(body): Json<ProviderBody>,
) -> Response {
    let descriptor = ProviderDescriptor {
        id: id.clone(),
        name: body.name,
        base_urls: body.base_urls,
        auth_kind: body.auth_kind,
        models: body.models,
        wire: body.wire,
    };
    if let Err(err) = state.repo.upsert_provider(&descriptor, body.enabled).await {
        return db_error(err);
    }
    if body.enabled {
        state.registry.register(descriptor);
    } else {
        state.registry.remove(&id);
    }
    ok_json(serde_json::json!({ "ok": true }))
}

async fn delete_provider(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    if let Err(err) = state.repo.delete_provider(&id).await {
        return db_error(err);
    }
    state.registry.remove(&id);
    ok_json(serde_json::json!({ "ok": true }))
}

// ---- accounts ----

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

fn default_limit() -> u64 {
    100
}

async fn list_accounts(
    State(state): State<AdminState>,
    Query(page): Query<PageQuery>,
) -> Response {
    match state.repo.list_accounts(page.limit, page.offset).await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "id": row.id,
                        "provider_id": row.provider_id,
                        "name": row.name,
                        "proxy_id": row.proxy_id,
                        "proxy_url": row.proxy_url,
                        "is_active": row.is_active,
                        "created_by": row.created_by,
                        "success_count": row.success_count,
                        "failure_count": row.failure_count,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    id: String,
    provider_id: String,
    #[serde(default)]
    name: Option<String>,
    auth_data: serde_json::Value,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default = "default_true")]
    is_active: bool,
}

async fn create_account(
    State(state): State<AdminState>,
    Json(body): Json<AccountBody>,
) -> Response {
    if state.registry.get(&body.provider_id).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "unknown provider" })),
        )
            .into_response();
    }

    let mut account = Account {
        id: body.id,
        provider_id: body.provider_id,
        name: body.name,
        auth_data: body.auth_data,
        proxy_id: None,
        proxy_url: None,
        is_active: body.is_active,
        created_by: body.created_by,
    };

    // New accounts get a permanent proxy up front when one has capacity.
    if let Ok(Some(proxy)) = state.proxies.select_for_new_account().await {
        account.proxy_id = Some(proxy.id);
        account.proxy_url = Some(proxy.url);
    }

    if let Err(err) = state.repo.upsert_account(&account).await {
        return db_error(err);
    }
    if account.is_active {
        state.manager.insert_account(account).await;
    }
    ok_json(serde_json::json!({ "ok": true }))
}

async fn update_account(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(mut body): Json<AccountBody>,
) -> Response {
    body.id = id.clone();
    let existing = match state.repo.get_account(&id).await {
        Ok(Some(existing)) => existing,
        Ok(None) => return (StatusCode::NOT_FOUND, "no such account").into_response(),
        Err(err) => return db_error(err),
    };
    let account = Account {
        id: body.id,
        provider_id: body.provider_id,
        name: body.name,
        auth_data: body.auth_data,
        proxy_id: existing.proxy_id,
        proxy_url: existing.proxy_url,
        is_active: body.is_active,
        created_by: body.created_by.or(existing.created_by),
    };
    if let Err(err) = state.repo.upsert_account(&account).await {
        return db_error(err);
    }
    state.tokens.invalidate(&account.provider_id, &id).await;
    ok_json(serde_json::json!({ "ok": true }))
}

async fn delete_account(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    if let Err(err) = state.repo.delete_account(&id).await {
        return db_error(err);
    }
    state.manager.remove_account(&id).await;
    ok_json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct ActiveBody {
    active: bool,
}

async fn set_account_active(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> Response {
    if let Err(err) = state.repo.set_account_active(&id, body.active).await {
        return db_error(err);
    }
    if !body.active {
        state.manager.remove_account(&id).await;
    } else if let Ok(Some(account)) = state.repo.get_account(&id).await {
        state.manager.insert_account(account).await;
    }
    ok_json(serde_json::json!({ "ok": true }))
}

async fn account_state(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let Some(entry) = state.manager.get(&id).await else {
        return (StatusCode::NOT_FOUND, "not managed").into_response();
    };
    let entry = entry.read().await;
    let now = OffsetDateTime::now_utc();
    let models: serde_json::Map<String, serde_json::Value> = entry
        .models
        .iter()
        .map(|(model, model_state)| {
            (
                model.clone(),
                serde_json::json!({
                    "disabled": model_state.disabled,
                    "block_reason": model_state.block_reason,
                    "blocked": model_state.is_blocked(now),
                    "success_count": model_state.success_count,
                    "failure_count": model_state.failure_count,
                    "last_error": model_state.last_error,
                }),
            )
        })
        .collect();
    ok_json(serde_json::json!({
        "id": entry.account.id,
        "provider_id": entry.account.provider_id,
        "disabled": entry.disabled,
        "quota_backoff_multiplier": entry.quota_backoff.multiplier(),
        "models": models,
    }))
}

// ---- proxies ----

async fn list_proxies(State(state): State<AdminState>) -> Response {
    match state.repo.list_proxies().await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "id": row.id,
                        "url": row.url,
                        "protocol": row.protocol,
                        "is_active": row.is_active,
                        "health_status": row.health_status,
                        "max_accounts": row.max_accounts,
                        "current_accounts": row.current_accounts,
                        "priority": row.priority,
                        "latency_ms": row.latency_ms,
                        "failure_count": row.failure_count,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct ProxyBody {
    url: String,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default)]
    max_accounts: i32,
    #[serde(default)]
    priority: i32,
}

fn default_protocol() -> String {
    "http".to_string()
}

async fn create_proxy(State(state): State<AdminState>, Json(body): Json<ProxyBody>) -> Response {
    match state
        .repo
        .create_proxy(&body.url, &body.protocol, body.max_accounts, body.priority)
        .await
    {
        Ok(id) => ok_json(serde_json::json!({ "id": id })),
        Err(err) => db_error(err),
    }
}

async fn delete_proxy(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    match state.repo.delete_proxy(id).await {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

async fn set_proxy_active(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<ActiveBody>,
) -> Response {
    match state.repo.set_proxy_active(id, body.active).await {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

async fn recalculate_proxies(State(state): State<AdminState>) -> Response {
    match state.repo.recalculate_account_counts().await {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

// ---- model mappings ----

async fn list_mappings(State(state): State<AdminState>) -> Response {
    match state.repo.list_model_mappings().await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "alias": row.alias,
                        "provider_id": row.provider_id,
                        "upstream_model": row.upstream_model,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct MappingBody {
    provider_id: String,
    upstream_model: String,
}

async fn upsert_mapping(
    State(state): State<AdminState>,
    Path(alias): Path<String>,
    Json(body): Json<MappingBody>,
) -> Response {
    if let Err(err) = state
        .repo
        .upsert_model_mapping(&alias, &body.provider_id, &body.upstream_model)
        .await
    {
        return db_error(err);
    }
    state.aliases.invalidate(&alias).await;
    ok_json(serde_json::json!({ "ok": true }))
}

async fn delete_mapping(State(state): State<AdminState>, Path(alias): Path<String>) -> Response {
    if let Err(err) = state.repo.delete_model_mapping(&alias).await {
        return db_error(err);
    }
    state.aliases.invalidate(&alias).await;
    ok_json(serde_json::json!({ "ok": true }))
}

// ---- quota patterns ----

async fn list_quota_patterns(State(state): State<AdminState>) -> Response {
    match state.repo.list_quota_patterns().await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "account_id": row.account_id,
                        "model": row.model,
                        "request_limit": row.request_limit,
                        "token_limit": row.token_limit,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct QuotaPatternBody {
    account_id: String,
    model: String,
    #[serde(default)]
    request_limit: Option<i64>,
    #[serde(default)]
    token_limit: Option<i64>,
}

async fn upsert_quota_pattern(
    State(state): State<AdminState>,
    Json(body): Json<QuotaPatternBody>,
) -> Response {
    let pattern = QuotaPattern {
        request_limit: body.request_limit,
        token_limit: body.token_limit,
    };
    match state
        .repo
        .upsert_quota_pattern(&body.account_id, &body.model, pattern)
        .await
    {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

async fn delete_quota_pattern(
    State(state): State<AdminState>,
    Path((account_id, model)): Path<(String, String)>,
) -> Response {
    match state.repo.delete_quota_pattern(&account_id, &model).await {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

// ---- client keys ----

async fn list_client_keys(State(state): State<AdminState>) -> Response {
    match state.repo.list_client_keys().await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "id": row.id,
                        "label": row.label,
                        "enabled": row.enabled,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct ClientKeyBody {
    key: String,
    #[serde(default)]
    label: Option<String>,
}

async fn create_client_key(
    State(state): State<AdminState>,
    Json(body): Json<ClientKeyBody>,
) -> Response {
    match state
        .repo
        .insert_client_key(&body.key, body.label.as_deref())
        .await
    {
        Ok(id) => ok_json(serde_json::json!({ "id": id })),
        Err(err) => db_error(err),
    }
}

async fn delete_client_key(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    match state.repo.delete_client_key(id).await {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
    enabled: bool,
}

async fn set_client_key_enabled(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<EnabledBody>,
) -> Response {
    match state.repo.set_client_key_enabled(id, body.enabled).await {
        Ok(()) => ok_json(serde_json::json!({ "ok": true })),
        Err(err) => db_error(err),
    }
}

// ---- logs & stats ----

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: u64,
}

fn default_log_limit() -> u64 {
    100
}

async fn recent_logs(State(state): State<AdminState>, Query(query): Query<LogsQuery>) -> Response {
    match state.repo.get_recent_request_logs(query.limit).await {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "provider_id": row.provider_id,
                        "account_id": row.account_id,
                        "proxy_id": row.proxy_id,
                        "model": row.model,
                        "status_code": row.status_code,
                        "latency_ms": row.latency_ms,
                        "retry_count": row.retry_count,
                        "switched_from_account_id": row.switched_from_account_id,
                        "error": row.error,
                        "trace_id": row.trace_id,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    from: String,
    to: String,
    #[serde(default)]
    proxy_id: Option<i64>,
}

async fn proxy_stats(State(state): State<AdminState>, Query(query): Query<StatsQuery>) -> Response {
    let format = format_description!("[year]-[month]-[day]");
    let (Ok(from), Ok(to)) = (
        time::Date::parse(&query.from, &format),
        time::Date::parse(&query.to, &format),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "dates must be YYYY-MM-DD" })),
        )
            .into_response();
    };

    match state
        .repo
        .get_proxy_stats_range(ProxyStatsQuery {
            proxy_id: query.proxy_id,
            from,
            to,
        })
        .await
    {
        Ok(rows) => ok_json(serde_json::json!(
            rows.iter()
                .map(|row| {
                    serde_json::json!({
                        "proxy_id": row.proxy_id,
                        "provider_id": row.provider_id,
                        "day": row.day.to_string(),
                        "request_count": row.request_count,
                        "success_count": row.success_count,
                        "error_count": row.error_count,
                        "total_latency_ms": row.total_latency_ms,
                    })
                })
                .collect::<Vec<_>>()
        )),
        Err(err) => db_error(err),
    }
}
