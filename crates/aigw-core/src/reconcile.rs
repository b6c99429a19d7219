use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use aigw_provider_core::{AccountStateManager, ProviderRegistry};
use aigw_storage::Repository;

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Periodically diff the repository against the in-memory account map:
/// admin-created accounts appear, deleted ones disappear, survivors keep
/// their live health state.
pub fn spawn_reconcile_loop(
    manager: Arc<AccountStateManager>,
    registry: Arc<ProviderRegistry>,
    repo: Repository,
    config: ReconcileConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(config.initial_delay) => {}
            _ = shutdown.changed() => return,
        }

        loop {
            reconcile_once(&manager, &registry, &repo).await;
            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = shutdown.changed() => break,
            }
        }
    })
}

pub async fn reconcile_once(
    manager: &AccountStateManager,
    registry: &ProviderRegistry,
    repo: &Repository,
) {
    for provider in registry.list() {
        match repo.list_active_accounts_by_provider(&provider.id).await {
            Ok(rows) => {
                let (added, removed) = manager.reconcile(&provider.id, rows).await;
                if added > 0 || removed > 0 {
                    tracing::info!(
                        provider = provider.id,
                        added,
                        removed,
                        "account set reconciled"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(provider = provider.id, error = %err, "account reconciliation failed");
            }
        }
    }
}

/// Daily request-log retention sweep.
pub fn spawn_log_cleanup_loop(
    repo: Repository,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = time::OffsetDateTime::now_utc()
                        - time::Duration::try_from(retention).unwrap_or(time::Duration::days(30));
                    match repo.delete_old_logs(cutoff).await {
                        Ok(0) => {}
                        Ok(removed) => tracing::info!(removed, "old request logs purged"),
                        Err(err) => tracing::warn!(error = %err, "log cleanup failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
