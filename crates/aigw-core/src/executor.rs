use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;

use aigw_protocol::claude::request::MessagesRequest;
use aigw_provider_core::{
    Account, AccountStateManager, ErrorKind, ExecuteRequest, ParsedError, ProviderAdapter,
    ProviderRegistry, RequestCtx, Resolution, ResolveError, SelectError, StreamResponse,
    StreamStart,
};

use crate::error::GatewayError;
use crate::proxy_pool::ProxyPool;
use crate::quota::QuotaTracker;
use crate::stats::{RequestRecord, StatsTracker};
use crate::tokens::TokenManager;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-account attempt cap; total attempts across accounts cap at twice
    /// this.
    pub max_retries: u32,
    /// Longest the executor will sleep waiting for blocked accounts.
    pub max_retry_wait: Duration,
    /// Unit of the linear same-account retry sleep.
    pub retry_delay_unit: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_wait: Duration::from_secs(30),
            retry_delay_unit: Duration::from_millis(100),
        }
    }
}

/// End-to-end pipeline: resolve → select → token → upstream → classify →
/// mark → retry/switch → stats.
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    manager: Arc<AccountStateManager>,
    tokens: Arc<TokenManager>,
    quota: Arc<QuotaTracker>,
    proxies: Arc<ProxyPool>,
    stats: StatsTracker,
    config: ExecutorConfig,
}

struct Attempt {
    account: Account,
    proxy_url: Option<String>,
    started: tokio::time::Instant,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        manager: Arc<AccountStateManager>,
        tokens: Arc<TokenManager>,
        quota: Arc<QuotaTracker>,
        proxies: Arc<ProxyPool>,
        stats: StatsTracker,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            adapters,
            manager,
            tokens,
            quota,
            proxies,
            stats,
            config,
        }
    }

    pub async fn execute(&self, request: MessagesRequest) -> Result<Bytes, GatewayError> {
        let (resolution, adapter) = self.resolve(&request.model).await?;
        let ctx = RequestCtx {
            trace_id: uuid::Uuid::now_v7().to_string(),
        };

        let budget = self.config.max_retries * 2;
        let mut total_attempts = 0u32;
        let mut retry_count = 0u32;
        let mut switched_from: Option<String> = None;
        let mut proxy_marked_down = false;
        let mut last_error = GatewayError::internal("request pipeline exhausted");

        let mut account = self
            .pick_account(&resolution.provider.id, &request.model)
            .await?;

        loop {
            if total_attempts >= budget {
                return Err(last_error);
            }
            total_attempts += 1;

            let attempt = self.prepare_attempt(account).await;
            let token = match self.tokens.token_for(&attempt.account).await {
                Ok(token) => token,
                Err(err) => {
                    tracing::warn!(account = attempt.account.id, error = %err, "token acquisition failed");
                    last_error =
                        GatewayError::unavailable(format!("credential unavailable: {err}"));
                    match self
                        .switch_account(&resolution, &request.model, &attempt.account.id)
                        .await
                    {
                        Some(next) => {
                            switched_from = Some(attempt.account.id.clone());
                            retry_count = 0;
                            account = next;
                            continue;
                        }
                        None => return Err(last_error),
                    }
                }
            };

            let exec_req = ExecuteRequest {
                model: resolution.upstream_model.clone(),
                request: request.clone(),
                stream: false,
                account: attempt.account.clone(),
                proxy_url: attempt.proxy_url.clone(),
                token,
            };

            match adapter.execute(&ctx, &exec_req).await {
                Ok(outcome) if outcome.is_success() => {
                    self.settle_success(
                        &ctx,
                        &attempt,
                        &request.model,
                        adapter.as_ref(),
                        Some(&outcome.body),
                        outcome.status,
                        outcome.latency,
                        retry_count,
                        &switched_from,
                    )
                    .await;
                    return Ok(outcome.body);
                }
                Ok(outcome) => {
                    let parsed = adapter.error_parser().parse(
                        outcome.status,
                        &outcome.headers,
                        &outcome.body,
                    );
                    last_error = GatewayError::from_parsed(&parsed);
                    self.settle_failure(
                        &ctx,
                        &attempt,
                        &request.model,
                        &parsed,
                        outcome.latency,
                        retry_count,
                        &switched_from,
                    )
                    .await;

                    match self
                        .next_step(&resolution, &request, &attempt, &parsed, &mut retry_count,
                            &mut proxy_marked_down)
                        .await
                    {
                        Step::Retry => account = attempt.account,
                        Step::Switch(next) => {
                            switched_from = Some(attempt.account.id.clone());
                            retry_count = 0;
                            account = next;
                        }
                        Step::GiveUp => return Err(last_error),
                    }
                }
                Err(transport) => {
                    let parsed = ParsedError::new(ErrorKind::Transient, 0, transport.to_string());
                    last_error = GatewayError::unavailable(transport.to_string());
                    self.settle_failure(
                        &ctx,
                        &attempt,
                        &request.model,
                        &parsed,
                        attempt.started.elapsed(),
                        retry_count,
                        &switched_from,
                    )
                    .await;

                    match self
                        .next_step(&resolution, &request, &attempt, &parsed, &mut retry_count,
                            &mut proxy_marked_down)
                        .await
                    {
                        Step::Retry => account = attempt.account,
                        Step::Switch(next) => {
                            switched_from = Some(attempt.account.id.clone());
                            retry_count = 0;
                            account = next;
                        }
                        Step::GiveUp => return Err(last_error),
                    }
                }
            }
        }
    }

    pub async fn execute_stream(
        &self,
        request: MessagesRequest,
    ) -> Result<StreamResponse, GatewayError> {
        let (resolution, adapter) = self.resolve(&request.model).await?;
        let ctx = RequestCtx {
            trace_id: uuid::Uuid::now_v7().to_string(),
        };

        let budget = self.config.max_retries * 2;
        let mut total_attempts = 0u32;
        let mut retry_count = 0u32;
        let mut switched_from: Option<String> = None;
        let mut proxy_marked_down = false;
        let mut last_error = GatewayError::internal("request pipeline exhausted");

        let mut account = self
            .pick_account(&resolution.provider.id, &request.model)
            .await?;

        loop {
            if total_attempts >= budget {
                return Err(last_error);
            }
            total_attempts += 1;

            let attempt = self.prepare_attempt(account).await;
            let token = match self.tokens.token_for(&attempt.account).await {
                Ok(token) => token,
                Err(err) => {
                    tracing::warn!(account = attempt.account.id, error = %err, "token acquisition failed");
                    last_error =
                        GatewayError::unavailable(format!("credential unavailable: {err}"));
                    match self
                        .switch_account(&resolution, &request.model, &attempt.account.id)
                        .await
                    {
                        Some(next) => {
                            switched_from = Some(attempt.account.id.clone());
                            retry_count = 0;
                            account = next;
                            continue;
                        }
                        None => return Err(last_error),
                    }
                }
            };

            let exec_req = ExecuteRequest {
                model: resolution.upstream_model.clone(),
                request: request.clone(),
                stream: true,
                account: attempt.account.clone(),
                proxy_url: attempt.proxy_url.clone(),
                token,
            };

            match adapter.execute_stream(&ctx, &exec_req).await {
                Ok(StreamStart::Stream(stream)) => {
                    self.settle_success(
                        &ctx,
                        &attempt,
                        &request.model,
                        adapter.as_ref(),
                        None,
                        stream.status,
                        attempt.started.elapsed(),
                        retry_count,
                        &switched_from,
                    )
                    .await;
                    return Ok(stream);
                }
                Ok(StreamStart::Http(outcome)) => {
                    let parsed = adapter.error_parser().parse(
                        outcome.status,
                        &outcome.headers,
                        &outcome.body,
                    );
                    last_error = GatewayError::from_parsed(&parsed);
                    self.settle_failure(
                        &ctx,
                        &attempt,
                        &request.model,
                        &parsed,
                        outcome.latency,
                        retry_count,
                        &switched_from,
                    )
                    .await;

                    match self
                        .next_step(&resolution, &request, &attempt, &parsed, &mut retry_count,
                            &mut proxy_marked_down)
                        .await
                    {
                        Step::Retry => account = attempt.account,
                        Step::Switch(next) => {
                            switched_from = Some(attempt.account.id.clone());
                            retry_count = 0;
                            account = next;
                        }
                        Step::GiveUp => return Err(last_error),
                    }
                }
                Err(transport) => {
                    let parsed = ParsedError::new(ErrorKind::Transient, 0, transport.to_string());
                    last_error = GatewayError::unavailable(transport.to_string());
                    self.settle_failure(
                        &ctx,
                        &attempt,
                        &request.model,
                        &parsed,
                        attempt.started.elapsed(),
                        retry_count,
                        &switched_from,
                    )
                    .await;

                    match self
                        .next_step(&resolution, &request, &attempt, &parsed, &mut retry_count,
                            &mut proxy_marked_down)
                        .await
                    {
                        Step::Retry => account = attempt.account,
                        Step::Switch(next) => {
                            switched_from = Some(attempt.account.id.clone());
                            retry_count = 0;
                            account = next;
                        }
                        Step::GiveUp => return Err(last_error),
                    }
                }
            }
        }
    }

    async fn resolve(
        &self,
        model: &str,
    ) -> Result<(Resolution, Arc<dyn ProviderAdapter>), GatewayError> {
        let resolution = self.registry.resolve(model).await.map_err(|err| match err {
            ResolveError::NotFound(model) => GatewayError::model_not_found(&model),
            ResolveError::UnknownProvider(provider) => {
                GatewayError::internal(format!("mapping references unknown provider {provider}"))
            }
        })?;
        let adapter = self
            .adapters
            .get(&resolution.provider.id)
            .cloned()
            .ok_or_else(|| {
                GatewayError::internal(format!(
                    "no adapter registered for provider {}",
                    resolution.provider.id
                ))
            })?;
        Ok((resolution, adapter))
    }

    /// Select an account, sleeping through short all-blocked windows as long
    /// as the accumulated wait stays under `max_retry_wait`.
    async fn pick_account(
        &self,
        provider_id: &str,
        model: &str,
    ) -> Result<Account, GatewayError> {
        let mut slept = Duration::ZERO;
        loop {
            match self.manager.select(provider_id, model).await {
                Ok(account) => return Ok(account),
                Err(SelectError::AllBlocked {
                    wait_until: Some(until),
                }) => {
                    let now = OffsetDateTime::now_utc();
                    let wait = until - now;
                    let wait = Duration::try_from(wait).unwrap_or(Duration::ZERO);
                    if wait.is_zero() {
                        continue;
                    }
                    if slept + wait > self.config.max_retry_wait {
                        return Err(GatewayError::from_select(&SelectError::AllBlocked {
                            wait_until: Some(until),
                        }));
                    }
                    // A small cushion so the block has actually expired when
                    // we re-check.
                    let wait = wait + Duration::from_millis(25);
                    slept += wait;
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(GatewayError::from_select(&err)),
            }
        }
    }

    async fn switch_account(
        &self,
        resolution: &Resolution,
        model: &str,
        current: &str,
    ) -> Option<Account> {
        self.manager
            .select_excluding(&resolution.provider.id, model, Some(current))
            .await
            .ok()
    }

    async fn prepare_attempt(&self, mut account: Account) -> Attempt {
        let proxy_url = self.proxies.assign_on_use(&mut account).await;
        Attempt {
            account,
            proxy_url,
            started: tokio::time::Instant::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_success(
        &self,
        ctx: &RequestCtx,
        attempt: &Attempt,
        model: &str,
        adapter: &dyn ProviderAdapter,
        canonical_body: Option<&Bytes>,
        status: u16,
        latency: Duration,
        retry_count: u32,
        switched_from: &Option<String>,
    ) {
        self.manager.mark_success(&attempt.account.id, model).await;
        let usage = canonical_body.and_then(|body| adapter.extract_usage(body));
        self.quota
            .record_success(&attempt.account.id, model, usage)
            .await;
        self.stats.record(RequestRecord {
            provider_id: attempt.account.provider_id.clone(),
            account_id: attempt.account.id.clone(),
            proxy_id: attempt.account.proxy_id,
            model: model.to_string(),
            status,
            latency,
            retry_count,
            switched_from: switched_from.clone(),
            error: None,
            trace_id: Some(ctx.trace_id.clone()),
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_failure(
        &self,
        ctx: &RequestCtx,
        attempt: &Attempt,
        model: &str,
        parsed: &ParsedError,
        latency: Duration,
        retry_count: u32,
        switched_from: &Option<String>,
    ) {
        self.manager
            .mark_failure(&attempt.account.id, model, parsed)
            .await;
        if parsed.kind == ErrorKind::QuotaExceeded {
            self.quota
                .mark_exhausted(&attempt.account.id, model, None)
                .await;
        }
        self.stats.record(RequestRecord {
            provider_id: attempt.account.provider_id.clone(),
            account_id: attempt.account.id.clone(),
            proxy_id: attempt.account.proxy_id,
            model: model.to_string(),
            status: parsed.status,
            latency,
            retry_count,
            switched_from: switched_from.clone(),
            error: Some(parsed.message.clone()),
            trace_id: Some(ctx.trace_id.clone()),
        });
    }

    /// Retry on the same account only for rate/overload/transient kinds that
    /// have budget left; everything else switches to an alternate account.
    async fn next_step(
        &self,
        resolution: &Resolution,
        request: &MessagesRequest,
        attempt: &Attempt,
        parsed: &ParsedError,
        retry_count: &mut u32,
        proxy_marked_down: &mut bool,
    ) -> Step {
        let same_account_kind = matches!(
            parsed.kind,
            ErrorKind::RateLimit | ErrorKind::Overloaded | ErrorKind::Transient | ErrorKind::Unknown
        );

        if same_account_kind {
            *retry_count += 1;
            if *retry_count < self.config.max_retries {
                tokio::time::sleep(self.config.retry_delay_unit * self.config.max_retries).await;
                return Step::Retry;
            }
            // Retries exhausted on this account: suspect its proxy once.
            if !*proxy_marked_down
                && let Some(proxy_id) = attempt.account.proxy_id
            {
                self.proxies.mark_down(proxy_id).await;
                *proxy_marked_down = true;
            }
        }

        match self
            .switch_account(resolution, &request.model, &attempt.account.id)
            .await
        {
            Some(next) => Step::Switch(next),
            None => Step::GiveUp,
        }
    }
}

enum Step {
    Retry,
    Switch(Account),
    GiveUp,
}
