use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use aigw_storage::{KvStore, Repository, RequestLogInsert};

use crate::proxy_pool::ProxyPool;

const QUEUE_CAPACITY: usize = 8192;
const TODAY_COUNTER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One finished upstream attempt, ready for async persistence.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub provider_id: String,
    pub account_id: String,
    pub proxy_id: Option<i64>,
    pub model: String,
    /// 0 = no HTTP response (connection-level failure).
    pub status: u16,
    pub latency: Duration,
    pub retry_count: u32,
    pub switched_from: Option<String>,
    pub error: Option<String>,
    pub trace_id: Option<String>,
}

impl RequestRecord {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn connect_failed(&self) -> bool {
        self.status == 0
    }
}

/// Fire-and-forget stats writer: request logs, daily aggregates, per-proxy
/// today counters and proxy health feedback. Records still queued at
/// shutdown are dropped.
#[derive(Clone)]
pub struct StatsTracker {
    tx: mpsc::Sender<RequestRecord>,
}

impl StatsTracker {
    pub fn spawn(
        repo: Repository,
        kv: Arc<dyn KvStore>,
        pool: Arc<ProxyPool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RequestRecord>(QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                persist(&repo, kv.as_ref(), &pool, record).await;
            }
        });
        (Self { tx }, handle)
    }

    pub fn record(&self, record: RequestRecord) {
        if let Err(err) = self.tx.try_send(record) {
            tracing::debug!(error = %err, "stats queue full; dropping record");
        }
    }
}

async fn persist(repo: &Repository, kv: &dyn KvStore, pool: &ProxyPool, record: RequestRecord) {
    let success = record.is_success();

    let log = RequestLogInsert {
        provider_id: record.provider_id.clone(),
        account_id: record.account_id.clone(),
        proxy_id: record.proxy_id,
        model: record.model.clone(),
        status_code: record.status as i32,
        latency_ms: record.latency.as_millis() as i64,
        retry_count: record.retry_count as i32,
        switched_from_account_id: record.switched_from.clone(),
        error: record.error.clone(),
        trace_id: record.trace_id.clone(),
    };
    if let Err(err) = repo.create_request_log(log).await {
        tracing::warn!(error = %err, "request log insert failed");
    }

    let account_update = if success {
        repo.update_health_success(&record.account_id).await
    } else {
        repo.update_health_failure(&record.account_id).await
    };
    if let Err(err) = account_update {
        tracing::warn!(account = record.account_id, error = %err, "account health update failed");
    }

    let Some(proxy_id) = record.proxy_id else {
        return;
    };

    let today = OffsetDateTime::now_utc().date();
    if let Err(err) = repo
        .increment_proxy_stats(
            proxy_id,
            &record.provider_id,
            today,
            success,
            record.latency.as_millis() as i64,
        )
        .await
    {
        tracing::warn!(proxy_id, error = %err, "daily aggregate update failed");
    }

    bump_today_counter(kv, proxy_id, "requests").await;
    if !success {
        bump_today_counter(kv, proxy_id, "errors").await;
    }

    // Health feedback from live traffic.
    if record.connect_failed() {
        pool.mark_down(proxy_id).await;
    } else if success {
        pool.mark_healthy(proxy_id, Some(record.latency)).await;
    } else {
        pool.mark_degraded(proxy_id).await;
    }
}

async fn bump_today_counter(kv: &dyn KvStore, proxy_id: i64, what: &str) {
    let key = format!("stats:proxy:{proxy_id}:{what}:today");
    match kv.incr(&key).await {
        Ok(1) => {
            let _ = kv.expire(&key, TODAY_COUNTER_TTL).await;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::debug!(key, error = %err, "today counter unavailable");
        }
    }
}
