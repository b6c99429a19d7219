use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use aigw_provider_core::{
    Account, AccountStateManager, AuthData, AuthKind, CachedToken, ProviderRegistry,
    REFRESH_SKEW, TokenError, TokenRefresher,
};
use aigw_storage::{KvStore, Repository};

const REFRESH_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

fn cache_key(provider_id: &str, account_id: &str) -> String {
    format!("auth:{provider_id}:{account_id}")
}

/// Credential caching, refreshing and invalidation per account.
///
/// API keys come straight from the auth blob. Refreshable kinds read the KV
/// cache first and refresh under the account-state lock, so concurrent
/// requests for the same account produce one refresh while different
/// accounts refresh in parallel.
pub struct TokenManager {
    kv: Arc<dyn KvStore>,
    repo: Repository,
    manager: Arc<AccountStateManager>,
    registry: Arc<ProviderRegistry>,
    refreshers: HashMap<AuthKind, Arc<dyn TokenRefresher>>,
}

impl TokenManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        repo: Repository,
        manager: Arc<AccountStateManager>,
        registry: Arc<ProviderRegistry>,
        refreshers: HashMap<AuthKind, Arc<dyn TokenRefresher>>,
    ) -> Self {
        Self {
            kv,
            repo,
            manager,
            registry,
            refreshers,
        }
    }

    pub async fn token_for(&self, account: &Account) -> Result<String, TokenError> {
        let auth_kind = self
            .registry
            .get(&account.provider_id)
            .map(|provider| provider.auth_kind)
            .ok_or(TokenError::Unsupported)?;
        let auth = AuthData::decode(auth_kind, &account.auth_data)?;

        if let AuthData::ApiKey(auth) = &auth {
            return Ok(auth.api_key.clone());
        }

        let key = cache_key(&account.provider_id, &account.id);
        let now = OffsetDateTime::now_utc();
        if let Some(token) = self.cached(&key, now).await {
            return Ok(token);
        }

        // Serialise the refresh through the account's state lock; peers keep
        // refreshing in parallel.
        let state = self.manager.get(&account.id).await;
        let mut guard = match &state {
            Some(state) => Some(state.write().await),
            None => None,
        };

        // A concurrent caller may have refreshed while this one waited.
        if let Some(token) = self.cached(&key, OffsetDateTime::now_utc()).await {
            return Ok(token);
        }

        if let Some(guard) = &guard
            && let Some(after) = guard.next_refresh_after
            && OffsetDateTime::now_utc() < after
        {
            // Inside the failure backoff window: serve the stored token if it
            // is still plausibly valid, else report the backoff.
            if let Some(token) = stored_token(&auth, OffsetDateTime::now_utc()) {
                return Ok(token);
            }
            return Err(TokenError::Backoff(after));
        }

        let refresher = self.refreshers.get(&auth_kind).ok_or(TokenError::Unsupported)?;
        let current_auth = match guard.as_ref() {
            // The lock holder may carry newer auth_data than our snapshot.
            Some(guard) => AuthData::decode(auth_kind, &guard.account.auth_data)?,
            None => auth.clone(),
        };

        match refresher
            .refresh(account, &current_auth, account.proxy_url.as_deref())
            .await
        {
            Ok(refreshed) => {
                let now = OffsetDateTime::now_utc();
                let cached = CachedToken {
                    access_token: refreshed.access_token.clone(),
                    expires_at: refreshed.expires_at,
                };
                // KV first; a repository failure leaves the cached value
                // valid until its TTL.
                if let Ok(raw) = serde_json::to_string(&cached)
                    && let Err(err) = self.kv.set(&key, &raw, cached.ttl(now)).await
                {
                    tracing::warn!(account = account.id, error = %err, "token cache write failed");
                }
                if let Err(err) = self
                    .repo
                    .update_auth_data(&account.id, &refreshed.auth_data)
                    .await
                {
                    tracing::warn!(account = account.id, error = %err, "auth_data persist failed");
                }
                if let Some(guard) = guard.as_mut() {
                    guard.account.auth_data = refreshed.auth_data.clone();
                    guard.last_refresh_at = Some(now);
                    guard.next_refresh_after = None;
                }
                Ok(refreshed.access_token)
            }
            Err(err) => {
                // Refresh failures do not disable the account; they schedule
                // a short backoff and will be retried.
                if let Some(guard) = guard.as_mut() {
                    guard.next_refresh_after =
                        Some(OffsetDateTime::now_utc() + REFRESH_FAILURE_BACKOFF);
                }
                Err(err)
            }
        }
    }

    /// Drop the cached credential; the next request refreshes.
    pub async fn invalidate(&self, provider_id: &str, account_id: &str) {
        let key = cache_key(provider_id, account_id);
        if let Err(err) = self.kv.del(&key).await {
            tracing::warn!(account = account_id, error = %err, "token cache invalidation failed");
        }
    }

    async fn cached(&self, key: &str, now: OffsetDateTime) -> Option<String> {
        let raw = self.kv.get(key).await.ok()??;
        let token: CachedToken = serde_json::from_str(&raw).ok()?;
        token.is_fresh(now, REFRESH_SKEW).then_some(token.access_token)
    }

    /// One pass of the background loop: proactively refresh accounts whose
    /// credential expiry is inside the refresher lead time.
    pub async fn refresh_due_accounts(&self) {
        let now = OffsetDateTime::now_utc();
        for account_id in self.manager.account_ids().await {
            let Some(state) = self.manager.get(&account_id).await else {
                continue;
            };
            let (account, next_refresh_after) = {
                let state = state.read().await;
                (state.account.clone(), state.next_refresh_after)
            };
            if let Some(after) = next_refresh_after
                && now < after
            {
                continue;
            }

            let Some(provider) = self.registry.get(&account.provider_id) else {
                continue;
            };
            let Some(refresher) = self.refreshers.get(&provider.auth_kind) else {
                continue;
            };
            let Ok(auth) = AuthData::decode(provider.auth_kind, &account.auth_data) else {
                continue;
            };
            let due = match auth.expires_at() {
                Some(expires_at) => {
                    expires_at - now.unix_timestamp() <= refresher.lead_time().as_secs() as i64
                }
                None => false,
            };
            if !due {
                continue;
            }

            if let Err(err) = self.token_for(&account).await {
                tracing::warn!(account = account.id, error = %err, "background refresh failed");
            }
        }
    }
}

fn stored_token(auth: &AuthData, now: OffsetDateTime) -> Option<String> {
    let (token, expires_at) = match auth {
        AuthData::ApiKey(auth) => (auth.api_key.clone(), None),
        AuthData::Bearer(auth) => (auth.token.clone(), auth.expires_at),
        AuthData::OAuth(auth) => (auth.access_token.clone(), auth.expires_at),
    };
    if token.is_empty() {
        return None;
    }
    match expires_at {
        Some(expires_at) if expires_at <= now.unix_timestamp() => None,
        _ => Some(token),
    }
}

/// Background refresh loop; one tick immediately after start, then on the
/// interval.
pub fn spawn_token_refresh_loop(
    manager: Arc<TokenManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => manager.refresh_due_accounts().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}
