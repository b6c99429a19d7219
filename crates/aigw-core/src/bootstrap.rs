use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use aigw_common::{GatewayConfig, GatewayConfigPatch};
use aigw_provider_core::{
    AccountStateManager, AliasResolver, ProviderRegistry, QuotaView, UpstreamClient,
};
use aigw_provider_impl::http::HttpClientConfig;
use aigw_provider_impl::{
    WreqUpstreamClient, build_adapters, build_refreshers, builtin_prefix_routes,
    builtin_provider_seeds,
};
use aigw_storage::{KvStore, RedisKv, Repository, row_to_descriptor};

use crate::executor::{Executor, ExecutorConfig};
use crate::proxy_health::{HealthCheckConfig, spawn_proxy_health_loop};
use crate::proxy_pool::{ProxyPool, ProxyPoolConfig};
use crate::quota::{QuotaConfig, QuotaTracker};
use crate::reconcile::{ReconcileConfig, spawn_log_cleanup_loop, spawn_reconcile_loop};
use crate::resolve::{KvAliasResolver, KvRotation};
use crate::stats::StatsTracker;
use crate::tokens::{TokenManager, spawn_token_refresh_loop};

const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Parser)]
#[command(name = "aigw", version, about = "Multi-tenant AI model gateway")]
pub struct CliArgs {
    /// Database DSN (required to bootstrap the rest of config).
    #[arg(long, env = "AIGW_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "AIGW_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "AIGW_PORT")]
    pub port: Option<u16>,

    /// Admin key (plaintext). Stored as hash in DB and memory.
    #[arg(long, env = "AIGW_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Redis-style KV endpoint shared by gateway processes.
    #[arg(long, env = "AIGW_KV_URL")]
    pub kv_url: Option<String>,

    /// External URL for proxy health probes.
    #[arg(long, env = "AIGW_PROBE_URL")]
    pub probe_url: Option<String>,

    /// Request-log retention in days.
    #[arg(long, env = "AIGW_LOG_RETENTION_DAYS")]
    pub log_retention_days: Option<u32>,
}

/// Fully wired gateway: injected singletons plus the background loops.
/// Nothing here is initialised at first use; test doubles substitute by
/// constructing the pieces directly.
pub struct Gateway {
    pub config: GatewayConfig,
    pub repo: Repository,
    pub kv: Arc<dyn KvStore>,
    pub registry: Arc<ProviderRegistry>,
    pub manager: Arc<AccountStateManager>,
    pub proxies: Arc<ProxyPool>,
    pub quota: Arc<QuotaTracker>,
    pub tokens: Arc<TokenManager>,
    pub aliases: Arc<KvAliasResolver>,
    pub executor: Arc<Executor>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Cancel all background loops and wait for them to drain.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

pub async fn bootstrap_from_env() -> anyhow::Result<Gateway> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Gateway> {
    let dsn = sanitize(args.dsn).unwrap_or_else(default_dsn);
    ensure_sqlite_parent_dir(&dsn)?;

    // 1) Connect and sync the relational store; everything else hangs off it.
    let repo = Repository::connect(&dsn).await.context("connect database")?;
    repo.sync().await.context("schema sync")?;

    // 2) Merge config: CLI > ENV > DB, then persist the result back.
    let db_config = repo
        .get_gateway_config()
        .await
        .context("load stored gateway config")?;
    let mut merged = db_config
        .and_then(|json| serde_json::from_value::<GatewayConfig>(json).ok())
        .map(GatewayConfigPatch::from)
        .unwrap_or_default();

    let mut admin_key_hash = None;
    if let Some(plain) = sanitize(args.admin_key) {
        admin_key_hash = Some(hash_admin_key(&plain));
    } else if merged.admin_key_hash.is_none() {
        let plain = generate_admin_key();
        eprintln!("generated admin key: {plain}");
        admin_key_hash = Some(hash_admin_key(&plain));
    }

    merged.overlay(GatewayConfigPatch {
        host: sanitize(args.host),
        port: args.port,
        admin_key_hash,
        dsn: Some(dsn),
        kv_url: sanitize(args.kv_url),
        probe_url: sanitize(args.probe_url),
        log_retention_days: args.log_retention_days,
    });
    let config = merged.into_config().context("finalize gateway config")?;
    repo.upsert_gateway_config(serde_json::to_value(&config)?)
        .await
        .context("persist gateway config")?;

    // 3) The KV is load-bearing (rotation, token cache, quota windows); a
    // missing backend is a startup failure, not a degraded mode.
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKv::connect(&config.kv_url)
            .await
            .context("connect kv store")?,
    );

    // 4) Seed and load providers, build registry + adapters.
    repo.ensure_providers(&builtin_provider_seeds())
        .await
        .context("seed providers")?;

    let aliases = Arc::new(KvAliasResolver::new(kv.clone(), repo.clone()));
    let registry = Arc::new(ProviderRegistry::new(
        aliases.clone() as Arc<dyn AliasResolver>
    ));

    let mut descriptors = Vec::new();
    for row in repo.list_providers().await.context("list providers")? {
        if !row.enabled {
            continue;
        }
        match row_to_descriptor(&row) {
            Ok(descriptor) => {
                registry.register(descriptor.clone());
                descriptors.push(descriptor);
            }
            Err(err) => {
                tracing::warn!(provider = row.id, error = %err, "provider row not loadable");
            }
        }
    }
    for (prefix, provider_id) in builtin_prefix_routes() {
        if registry.get(provider_id).is_some() {
            registry.add_prefix_route(prefix, provider_id);
        }
    }

    let upstream: Arc<dyn UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(HttpClientConfig::default()));
    let adapters = build_adapters(&descriptors, upstream.clone());

    // 5) State machines.
    let quota = Arc::new(QuotaTracker::new(
        kv.clone(),
        repo.clone(),
        QuotaConfig::default(),
    ));
    let manager = Arc::new(AccountStateManager::new(
        Arc::new(KvRotation::new(kv.clone())),
        quota.clone() as Arc<dyn QuotaView>,
    ));
    for descriptor in &descriptors {
        let rows = repo
            .list_active_accounts_by_provider(&descriptor.id)
            .await
            .with_context(|| format!("load accounts for {}", descriptor.id))?;
        manager.load_accounts(rows).await;
    }

    let proxies = Arc::new(ProxyPool::new(repo.clone(), ProxyPoolConfig::default()));
    let tokens = Arc::new(TokenManager::new(
        kv.clone(),
        repo.clone(),
        manager.clone(),
        registry.clone(),
        build_refreshers(upstream.clone()),
    ));
    let (stats, stats_handle) = StatsTracker::spawn(repo.clone(), kv.clone(), proxies.clone());

    let executor = Arc::new(Executor::new(
        registry.clone(),
        adapters,
        manager.clone(),
        tokens.clone(),
        quota.clone(),
        proxies.clone(),
        stats,
        ExecutorConfig::default(),
    ));

    // 6) Background loops, all tied to one shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = vec![
        stats_handle,
        spawn_token_refresh_loop(tokens.clone(), TOKEN_REFRESH_INTERVAL, shutdown_rx.clone()),
        spawn_proxy_health_loop(
            proxies.clone(),
            repo.clone(),
            upstream,
            HealthCheckConfig {
                probe_url: config.probe_url.clone(),
                ..HealthCheckConfig::default()
            },
            shutdown_rx.clone(),
        ),
        spawn_reconcile_loop(
            manager.clone(),
            registry.clone(),
            repo.clone(),
            ReconcileConfig::default(),
            shutdown_rx.clone(),
        ),
        spawn_log_cleanup_loop(
            repo.clone(),
            Duration::from_secs(config.log_retention_days as u64 * 24 * 60 * 60),
            shutdown_rx,
        ),
    ];

    Ok(Gateway {
        config,
        repo,
        kv,
        registry,
        manager,
        proxies,
        quota,
        tokens,
        aliases,
        executor,
        shutdown_tx,
        handles,
    })
}

pub fn hash_admin_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

fn generate_admin_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn sanitize(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // PaaS systems sometimes inject unresolved `${VAR}` placeholders.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn default_dsn() -> String {
    match sanitize(std::env::var("AIGW_DATA_DIR").ok()) {
        Some(dir) => format!("sqlite://{}/aigw.db?mode=rwc", dir.trim_end_matches('/')),
        None => "sqlite://aigw.db?mode=rwc".to_string(),
    }
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_file_path(dsn) else {
        return Ok(());
    };
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path = rest.split(['?', '#']).next()?.trim();
    if path.is_empty() {
        return None;
    }
    let mut normalized = path;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }
    if normalized.eq_ignore_ascii_case(":memory:") {
        return None;
    }
    Some(PathBuf::from(normalized))
}

#[cfg(test)]
mod tests {
    use super::{hash_admin_key, sanitize, sqlite_file_path};

    #[test]
    fn sqlite_dsn_paths_resolve() {
        assert_eq!(
            sqlite_file_path("sqlite://aigw.db?mode=rwc")
                .unwrap()
                .to_string_lossy(),
            "aigw.db"
        );
        assert!(sqlite_file_path("sqlite::memory:").is_none());
        assert!(sqlite_file_path("postgres://db/aigw").is_none());
    }

    #[test]
    fn placeholder_env_values_are_ignored() {
        assert_eq!(sanitize(Some("${AIGW_HOST}".to_string())), None);
        assert_eq!(sanitize(Some("  ".to_string())), None);
        assert_eq!(
            sanitize(Some(" 10.0.0.1 ".to_string())),
            Some("10.0.0.1".to_string())
        );
    }

    #[test]
    fn admin_key_hash_is_stable() {
        assert_eq!(hash_admin_key("k"), hash_admin_key("k"));
        assert_ne!(hash_admin_key("k"), hash_admin_key("other"));
    }
}
