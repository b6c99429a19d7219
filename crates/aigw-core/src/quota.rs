use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;
use tokio::time::Instant;

use aigw_provider_core::{QuotaView, UsageTokens};
use aigw_storage::{KvStore, QuotaPattern, Repository};

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Rolling usage window.
    pub window: Duration,
    /// How long learned limits are cached before re-reading the repository.
    pub pattern_cache_ttl: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60 * 60),
            pattern_cache_ttl: Duration::from_secs(60),
        }
    }
}

fn requests_key(account: &str, model: &str) -> String {
    format!("quota:{account}:{model}:requests")
}

fn tokens_key(account: &str, model: &str) -> String {
    format!("quota:{account}:{model}:tokens")
}

fn exhausted_key(account: &str, model: &str) -> String {
    format!("quota:{account}:{model}:exhausted")
}

fn window_start_key(account: &str, model: &str) -> String {
    format!("quota:{account}:{model}:window_start")
}

type PatternCache = HashMap<(String, String), (Option<QuotaPattern>, Instant)>;

/// Rolling-window usage counters plus provider-signalled exhaustion state,
/// shared across processes through the KV.
pub struct QuotaTracker {
    kv: Arc<dyn KvStore>,
    repo: Repository,
    config: QuotaConfig,
    patterns: RwLock<PatternCache>,
}

impl QuotaTracker {
    pub fn new(kv: Arc<dyn KvStore>, repo: Repository, config: QuotaConfig) -> Self {
        Self {
            kv,
            repo,
            config,
            patterns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_success(&self, account: &str, model: &str, usage: Option<UsageTokens>) {
        let requests = requests_key(account, model);
        match self.kv.incr(&requests).await {
            Ok(1) => {
                // First hit of a fresh window: stamp its start and expiries.
                let now = OffsetDateTime::now_utc();
                let start = now
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| now.unix_timestamp().to_string());
                let _ = self.kv.expire(&requests, self.config.window).await;
                let _ = self
                    .kv
                    .set(
                        &window_start_key(account, model),
                        &start,
                        Some(self.config.window),
                    )
                    .await;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(account, model, error = %err, "quota request counter failed");
            }
        }

        if let Some(usage) = usage {
            let tokens = tokens_key(account, model);
            match self.kv.incr_by(&tokens, usage.total() as i64).await {
                Ok(value) if value == usage.total() as i64 => {
                    let _ = self.kv.expire(&tokens, self.config.window).await;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(account, model, error = %err, "quota token counter failed");
                }
            }
        }
    }

    /// Record a provider-signalled exhaustion. The key's TTL doubles as the
    /// reset estimate: the hint wins, else the remainder of the window.
    pub async fn mark_exhausted(&self, account: &str, model: &str, reset_hint: Option<Duration>) {
        let ttl = match reset_hint {
            Some(hint) => hint,
            None => self
                .window_remaining(account, model)
                .await
                .unwrap_or(self.config.window),
        };
        if let Err(err) = self
            .kv
            .set(&exhausted_key(account, model), "1", Some(ttl))
            .await
        {
            tracing::warn!(account, model, error = %err, "quota exhaustion mark failed");
        }
    }

    async fn window_remaining(&self, account: &str, model: &str) -> Option<Duration> {
        let raw = self
            .kv
            .get(&window_start_key(account, model))
            .await
            .ok()??;
        let start = OffsetDateTime::parse(&raw, &Rfc3339).ok()?;
        let elapsed = OffsetDateTime::now_utc() - start;
        let elapsed = Duration::try_from(elapsed).ok()?;
        self.config.window.checked_sub(elapsed)
    }

    async fn pattern_for(&self, account: &str, model: &str) -> Option<QuotaPattern> {
        let key = (account.to_string(), model.to_string());
        {
            let cache = self.patterns.read().await;
            if let Some((pattern, cached_at)) = cache.get(&key)
                && cached_at.elapsed() < self.config.pattern_cache_ttl
            {
                return pattern.clone();
            }
        }

        let pattern = match self.repo.get_quota_pattern(account, model).await {
            Ok(pattern) => pattern,
            Err(err) => {
                tracing::warn!(account, model, error = %err, "quota pattern lookup failed");
                None
            }
        };
        self.patterns
            .write()
            .await
            .insert(key, (pattern.clone(), Instant::now()));
        pattern
    }

    async fn counter(&self, key: &str) -> i64 {
        match self.kv.get(key).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            _ => 0,
        }
    }
}

#[async_trait]
impl QuotaView for QuotaTracker {
    async fn is_available(&self, account_id: &str, model: &str) -> bool {
        match self.kv.get(&exhausted_key(account_id, model)).await {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(err) => {
                // Fail open: a KV outage must not block all traffic.
                tracing::warn!(account = account_id, model, error = %err, "quota check failed");
                return true;
            }
        }

        let Some(pattern) = self.pattern_for(account_id, model).await else {
            return true;
        };
        if let Some(request_limit) = pattern.request_limit
            && self.counter(&requests_key(account_id, model)).await >= request_limit
        {
            return false;
        }
        if let Some(token_limit) = pattern.token_limit
            && self.counter(&tokens_key(account_id, model)).await >= token_limit
        {
            return false;
        }
        true
    }

    async fn earliest_reset(&self, pairs: &[(String, String)]) -> Option<OffsetDateTime> {
        let mut earliest: Option<OffsetDateTime> = None;
        for (account, model) in pairs {
            let reset = match self.window_remaining(account, model).await {
                Some(remaining) => OffsetDateTime::now_utc() + remaining,
                None => OffsetDateTime::now_utc() + self.config.window,
            };
            match earliest {
                Some(existing) if existing <= reset => {}
                _ => earliest = Some(reset),
            }
        }
        earliest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_storage::MemoryKv;

    async fn tracker(name: &str) -> QuotaTracker {
        let path = std::env::temp_dir().join(format!(
            "aigw-quota-{name}-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let repo = Repository::connect_isolated(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        repo.sync().await.unwrap();
        QuotaTracker::new(Arc::new(MemoryKv::new()), repo, QuotaConfig::default())
    }

    #[tokio::test]
    async fn exhaustion_blocks_until_ttl_passes() {
        let tracker = tracker("exhaust").await;
        assert!(tracker.is_available("acc_exhaust", "m").await);

        tracker
            .mark_exhausted("acc_exhaust", "m", Some(Duration::from_millis(30)))
            .await;
        assert!(!tracker.is_available("acc_exhaust", "m").await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(tracker.is_available("acc_exhaust", "m").await);
    }

    #[tokio::test]
    async fn learned_request_limit_applies() {
        let tracker = tracker("limit").await;
        tracker
            .repo
            .upsert_quota_pattern(
                "acc_limit",
                "m",
                QuotaPattern {
                    request_limit: Some(2),
                    token_limit: None,
                },
            )
            .await
            .unwrap();

        tracker.record_success("acc_limit", "m", None).await;
        assert!(tracker.is_available("acc_limit", "m").await);
        tracker.record_success("acc_limit", "m", None).await;
        assert!(!tracker.is_available("acc_limit", "m").await);
    }

    #[tokio::test]
    async fn earliest_reset_reflects_window_start() {
        let tracker = tracker("reset").await;
        tracker
            .record_success(
                "acc_reset",
                "m",
                Some(UsageTokens {
                    input_tokens: 3,
                    output_tokens: 4,
                }),
            )
            .await;

        let reset = tracker
            .earliest_reset(&[("acc_reset".to_string(), "m".to_string())])
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(reset > now);
        assert!(reset <= now + time::Duration::hours(5) + time::Duration::minutes(1));
    }
}
