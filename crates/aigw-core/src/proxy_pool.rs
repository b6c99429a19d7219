use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;

use aigw_provider_core::Account;
use aigw_storage::{ProxyHealth, Repository, StorageResult, entities};

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// A `down` proxy becomes eligible for a tentative retry after this long.
    pub recovery_delay: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            recovery_delay: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outbound proxy assignment under capacity and health constraints. Rows are
/// durable; the pool-wide mutex serialises capacity accounting so two
/// concurrent assignments cannot oversubscribe a proxy.
pub struct ProxyPool {
    repo: Repository,
    assign_lock: Mutex<()>,
    config: ProxyPoolConfig,
}

impl ProxyPool {
    pub fn new(repo: Repository, config: ProxyPoolConfig) -> Self {
        Self {
            repo,
            assign_lock: Mutex::new(()),
            config,
        }
    }

    /// First active, non-down proxy with spare capacity, in admin priority
    /// order. Increments its account count.
    pub async fn select_for_new_account(
        &self,
    ) -> StorageResult<Option<entities::proxies::Model>> {
        let _guard = self.assign_lock.lock().await;
        self.select_locked().await
    }

    async fn select_locked(&self) -> StorageResult<Option<entities::proxies::Model>> {
        let proxies = self.repo.list_active_proxies().await?;
        for proxy in proxies {
            if ProxyHealth::parse(&proxy.health_status) == ProxyHealth::Down {
                continue;
            }
            if proxy.max_accounts > 0 && proxy.current_accounts >= proxy.max_accounts {
                continue;
            }
            self.repo.adjust_proxy_accounts(proxy.id, 1).await?;
            return Ok(Some(proxy));
        }
        Ok(None)
    }

    /// Ensure the account goes out through a usable proxy for this request.
    /// Keeps the current assignment when it is still serviceable; otherwise
    /// re-assigns (or clears, letting the adapter connect directly). Returns
    /// the proxy URL to use now.
    pub async fn assign_on_use(&self, account: &mut Account) -> Option<String> {
        if let Some(proxy_id) = account.proxy_id {
            if self.is_available_for_request(proxy_id).await {
                return account.proxy_url.clone();
            }

            let _guard = self.assign_lock.lock().await;
            if let Err(err) = self.repo.adjust_proxy_accounts(proxy_id, -1).await {
                tracing::warn!(proxy_id, error = %err, "failed to release proxy slot");
            }
            match self.select_locked().await {
                Ok(Some(proxy)) => {
                    if let Err(err) = self
                        .repo
                        .update_account_proxy(&account.id, proxy.id, &proxy.url)
                        .await
                    {
                        tracing::warn!(account = account.id, error = %err, "proxy reassignment not persisted");
                    }
                    account.proxy_id = Some(proxy.id);
                    account.proxy_url = Some(proxy.url.clone());
                    return Some(proxy.url);
                }
                Ok(None) | Err(_) => {
                    if let Err(err) = self.repo.clear_account_proxy(&account.id).await {
                        tracing::warn!(account = account.id, error = %err, "proxy clear not persisted");
                    }
                    account.proxy_id = None;
                    account.proxy_url = None;
                    return None;
                }
            }
        }

        // No assignment yet: try to give the account a permanent proxy.
        let _guard = self.assign_lock.lock().await;
        match self.select_locked().await {
            Ok(Some(proxy)) => {
                if let Err(err) = self
                    .repo
                    .update_account_proxy(&account.id, proxy.id, &proxy.url)
                    .await
                {
                    tracing::warn!(account = account.id, error = %err, "proxy assignment not persisted");
                }
                account.proxy_id = Some(proxy.id);
                account.proxy_url = Some(proxy.url.clone());
                Some(proxy.url)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "proxy selection failed");
                None
            }
        }
    }

    /// Usable now: active and not down, or down long enough that a tentative
    /// retry is allowed.
    pub async fn is_available_for_request(&self, proxy_id: i64) -> bool {
        let Ok(Some(proxy)) = self.repo.get_proxy(proxy_id).await else {
            return false;
        };
        if !proxy.is_active {
            return false;
        }
        match ProxyHealth::parse(&proxy.health_status) {
            ProxyHealth::Healthy | ProxyHealth::Degraded => true,
            ProxyHealth::Down => proxy
                .marked_down_at
                .map(|down_at| {
                    OffsetDateTime::now_utc() - down_at
                        >= time::Duration::try_from(self.config.recovery_delay)
                            .unwrap_or(time::Duration::hours(24))
                })
                .unwrap_or(true),
        }
    }

    /// Idempotent: a proxy already down keeps its original `marked_down_at`.
    pub async fn mark_down(&self, proxy_id: i64) {
        let current = match self.repo.get_proxy(proxy_id).await {
            Ok(Some(proxy)) => proxy,
            _ => return,
        };
        if ProxyHealth::parse(&current.health_status) == ProxyHealth::Down {
            return;
        }
        if let Err(err) = self
            .repo
            .set_proxy_health(
                proxy_id,
                ProxyHealth::Down,
                Some(OffsetDateTime::now_utc()),
                None,
            )
            .await
        {
            tracing::warn!(proxy_id, error = %err, "failed to mark proxy down");
        }
    }

    pub async fn mark_healthy(&self, proxy_id: i64, latency: Option<Duration>) {
        if let Err(err) = self
            .repo
            .set_proxy_health(
                proxy_id,
                ProxyHealth::Healthy,
                None,
                latency.map(|latency| latency.as_millis() as i32),
            )
            .await
        {
            tracing::warn!(proxy_id, error = %err, "failed to mark proxy healthy");
        }
    }

    pub async fn mark_degraded(&self, proxy_id: i64) {
        let current = match self.repo.get_proxy(proxy_id).await {
            Ok(Some(proxy)) => proxy,
            _ => return,
        };
        // Degraded must not resurrect a down proxy or clear its timestamp.
        if ProxyHealth::parse(&current.health_status) == ProxyHealth::Down {
            return;
        }
        if let Err(err) = self
            .repo
            .set_proxy_health(proxy_id, ProxyHealth::Degraded, None, None)
            .await
        {
            tracing::warn!(proxy_id, error = %err, "failed to mark proxy degraded");
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_repo(name: &str) -> Repository {
        let path = std::env::temp_dir().join(format!(
            "aigw-proxy-{name}-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let repo = Repository::connect_isolated(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        repo.sync().await.unwrap();
        repo
    }

    async fn pool(name: &str) -> ProxyPool {
        ProxyPool::new(test_repo(name).await, ProxyPoolConfig::default())
    }

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            provider_id: "p".to_string(),
            name: None,
            auth_data: json!({"api_key": "sk"}),
            proxy_id: None,
            proxy_url: None,
            is_active: true,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn capacity_limits_are_respected() {
        let pool = pool("capacity").await;
        let proxy_id = pool
            .repo
            .create_proxy("http://cap-proxy.example:8080", "http", 1, 0)
            .await
            .unwrap();

        let first = pool.select_for_new_account().await.unwrap();
        assert_eq!(first.map(|proxy| proxy.id), Some(proxy_id));
        // Capacity 1 is now used up.
        let second = pool.select_for_new_account().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn mark_down_twice_keeps_the_first_timestamp() {
        let pool = pool("down").await;
        let proxy_id = pool
            .repo
            .create_proxy("http://down-proxy.example:8080", "http", 0, 5)
            .await
            .unwrap();

        pool.mark_down(proxy_id).await;
        let first = pool.repo.get_proxy(proxy_id).await.unwrap().unwrap();
        let down_at = first.marked_down_at.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.mark_down(proxy_id).await;
        let second = pool.repo.get_proxy(proxy_id).await.unwrap().unwrap();
        assert_eq!(second.marked_down_at, Some(down_at));
        assert_eq!(second.health_status, "down");
    }

    #[tokio::test]
    async fn recovery_delay_allows_tentative_retry() {
        let pool = ProxyPool::new(
            test_repo("recovery").await,
            ProxyPoolConfig {
                recovery_delay: Duration::from_millis(10),
            },
        );
        let proxy_id = pool
            .repo
            .create_proxy("http://retry-proxy.example:8080", "http", 0, 7)
            .await
            .unwrap();

        pool.mark_down(proxy_id).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.is_available_for_request(proxy_id).await);

        pool.mark_healthy(proxy_id, Some(Duration::from_millis(42)))
            .await;
        let row = pool.repo.get_proxy(proxy_id).await.unwrap().unwrap();
        assert_eq!(row.health_status, "healthy");
        assert_eq!(row.marked_down_at, None);
        assert_eq!(row.latency_ms, Some(42));
    }

    async fn seed_provider(repo: &Repository) {
        use aigw_provider_core::{AuthKind, ProviderDescriptor, WireFormat};
        repo.upsert_provider(
            &ProviderDescriptor {
                id: "p".to_string(),
                name: "p".to_string(),
                base_urls: vec!["https://p.example".to_string()],
                auth_kind: AuthKind::ApiKey,
                models: Vec::new(),
                wire: WireFormat::Openai,
            },
            true,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn assign_on_use_gives_unassigned_accounts_a_proxy() {
        let pool = pool("assign").await;
        seed_provider(pool.repo()).await;
        pool.repo
            .create_proxy("http://assign-proxy.example:8080", "http", 0, 1)
            .await
            .unwrap();
        let mut acc = account("acc_assign");
        pool.repo.upsert_account(&acc).await.unwrap();

        let url = pool.assign_on_use(&mut acc).await;
        assert!(url.is_some());
        assert_eq!(acc.proxy_url, url);
        assert!(acc.proxy_id.is_some());
    }

    #[tokio::test]
    async fn recalculation_repairs_manual_count_drift() {
        let pool = pool("recalc").await;
        seed_provider(pool.repo()).await;
        let proxy_id = pool
            .repo
            .create_proxy("http://recalc-proxy.example:8080", "http", 0, 2)
            .await
            .unwrap();

        // Two active accounts point at the proxy, but the counter was never
        // bumped (simulating a manual edit).
        for id in ["acc_r1", "acc_r2"] {
            let mut acc = account(id);
            acc.proxy_id = Some(proxy_id);
            acc.proxy_url = Some("http://recalc-proxy.example:8080".to_string());
            pool.repo.upsert_account(&acc).await.unwrap();
        }
        assert_eq!(
            pool.repo
                .get_proxy(proxy_id)
                .await
                .unwrap()
                .unwrap()
                .current_accounts,
            0
        );

        pool.repo.recalculate_account_counts().await.unwrap();
        assert_eq!(
            pool.repo
                .get_proxy(proxy_id)
                .await
                .unwrap()
                .unwrap()
                .current_accounts,
            2
        );
    }
}
