use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::Mutex;

use aigw_core::{
    Executor, ExecutorConfig, KvRotation, ProxyPool, QuotaTracker, StatsTracker, TokenManager,
};
use aigw_core::proxy_pool::ProxyPoolConfig;
use aigw_core::quota::QuotaConfig;
use aigw_protocol::claude::request::MessagesRequest;
use aigw_provider_core::registry::NoAliases;
use aigw_provider_core::{
    Account, AccountStateManager, AuthKind, ErrorParser, ExecuteOutcome, ExecuteRequest,
    ProviderAdapter, ProviderDescriptor, ProviderRegistry, QuotaView, RequestCtx, StreamStart,
    TransportError, WireFormat,
};
use aigw_provider_impl::openai::error::OpenAiErrorParser;
use aigw_storage::{MemoryKv, Repository};

const MODEL: &str = "test-model";

#[derive(Debug, Clone)]
enum Scripted {
    Ok,
    Status(u16, &'static str),
}

struct ScriptedAdapter {
    parser: OpenAiErrorParser,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
}

impl ScriptedAdapter {
    fn new(scripts: Vec<(&str, Vec<Scripted>)>) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|(account, steps)| (account.to_string(), steps.into_iter().collect()))
            .collect();
        Self {
            parser: OpenAiErrorParser,
            scripts: Mutex::new(scripts),
        }
    }

    fn canonical_ok() -> Bytes {
        Bytes::from(
            json!({
                "id": "msg_test",
                "type": "message",
                "role": "assistant",
                "model": MODEL,
                "content": [{"type": "text", "text": "ok"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 2, "output_tokens": 1}
            })
            .to_string(),
        )
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &str {
        "p"
    }

    fn error_parser(&self) -> &dyn ErrorParser {
        &self.parser
    }

    async fn execute(
        &self,
        _ctx: &RequestCtx,
        req: &ExecuteRequest,
    ) -> Result<ExecuteOutcome, TransportError> {
        let step = {
            let mut scripts = self.scripts.lock().await;
            scripts
                .get_mut(&req.account.id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Scripted::Ok)
        };
        let (status, body) = match step {
            Scripted::Ok => (200, Self::canonical_ok()),
            Scripted::Status(status, body) => (status, Bytes::from_static(body.as_bytes())),
        };
        Ok(ExecuteOutcome {
            status,
            headers: Vec::new(),
            body,
            latency: Duration::from_millis(5),
        })
    }

    async fn execute_stream(
        &self,
        _ctx: &RequestCtx,
        _req: &ExecuteRequest,
    ) -> Result<StreamStart, TransportError> {
        Err(TransportError::other("streaming not scripted"))
    }
}

fn account(id: &str) -> Account {
    Account {
        id: id.to_string(),
        provider_id: "p".to_string(),
        name: None,
        auth_data: json!({"api_key": format!("sk-{id}")}),
        proxy_id: None,
        proxy_url: None,
        is_active: true,
        created_by: None,
    }
}

fn request() -> MessagesRequest {
    serde_json::from_value(json!({
        "model": MODEL,
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 16
    }))
    .unwrap()
}

struct Fixture {
    executor: Executor,
    manager: Arc<AccountStateManager>,
    quota: Arc<QuotaTracker>,
    repo: Repository,
}

async fn fixture(name: &str, accounts: Vec<Account>, scripts: Vec<(&str, Vec<Scripted>)>) -> Fixture {
    let path = std::env::temp_dir().join(format!("aigw-exec-{name}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let repo = Repository::connect_isolated(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap();
    repo.sync().await.unwrap();

    let kv = Arc::new(MemoryKv::new());
    let registry = Arc::new(ProviderRegistry::new(Arc::new(NoAliases)));
    registry.register(ProviderDescriptor {
        id: "p".to_string(),
        name: "Test Provider".to_string(),
        base_urls: vec!["https://upstream.example".to_string()],
        auth_kind: AuthKind::ApiKey,
        models: vec![MODEL.to_string()],
        wire: WireFormat::Openai,
    });
    registry.add_prefix_route("test-", "p");

    let quota = Arc::new(QuotaTracker::new(
        kv.clone(),
        repo.clone(),
        QuotaConfig::default(),
    ));
    let manager = Arc::new(AccountStateManager::new(
        Arc::new(KvRotation::new(kv.clone())),
        quota.clone() as Arc<dyn QuotaView>,
    ));
    manager.load_accounts(accounts).await;

    let proxies = Arc::new(ProxyPool::new(repo.clone(), ProxyPoolConfig::default()));
    let tokens = Arc::new(TokenManager::new(
        kv.clone(),
        repo.clone(),
        manager.clone(),
        registry.clone(),
        HashMap::new(),
    ));
    let (stats, _stats_handle) = StatsTracker::spawn(repo.clone(), kv, proxies.clone());

    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert("p".to_string(), Arc::new(ScriptedAdapter::new(scripts)));

    let executor = Executor::new(
        registry,
        adapters,
        manager.clone(),
        tokens,
        quota.clone(),
        proxies,
        stats,
        ExecutorConfig {
            max_retries: 2,
            max_retry_wait: Duration::from_secs(5),
            retry_delay_unit: Duration::from_millis(5),
        },
    );

    Fixture {
        executor,
        manager,
        quota,
        repo,
    }
}

#[tokio::test]
async fn round_robin_spreads_successes_evenly() {
    let fx = fixture(
        "fair",
        vec![account("a1"), account("a2")],
        Vec::new(),
    )
    .await;

    for _ in 0..6 {
        fx.executor.execute(request()).await.unwrap();
    }

    // Logs land asynchronously.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let logs = fx.repo.get_recent_request_logs(10).await.unwrap();
    let a1_hits = logs.iter().filter(|log| log.account_id == "a1").count();
    let a2_hits = logs.iter().filter(|log| log.account_id == "a2").count();
    assert_eq!((a1_hits, a2_hits), (3, 3));
}

#[tokio::test]
async fn quota_exhaustion_switches_to_alternate_account() {
    let fx = fixture(
        "quota",
        vec![account("a1"), account("a2")],
        vec![(
            "a1",
            vec![Scripted::Status(
                429,
                r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#,
            )],
        )],
    )
    .await;

    let body = fx.executor.execute(request()).await.unwrap();
    let message: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(message["content"][0]["text"], "ok");

    // A1 is quota-marked and excluded from selection.
    assert!(!fx.quota.is_available("a1", MODEL).await);
    assert!(fx.manager.is_blocked_for("a1", MODEL).await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let logs = fx.repo.get_recent_request_logs(10).await.unwrap();
    let success = logs
        .iter()
        .find(|log| log.status_code == 200)
        .expect("success log");
    assert_eq!(success.account_id, "a2");
    assert_eq!(success.switched_from_account_id.as_deref(), Some("a1"));
}

#[tokio::test]
async fn auth_failure_disables_the_account_for_good() {
    let fx = fixture(
        "auth",
        vec![account("a1"), account("a2")],
        vec![(
            "a1",
            vec![Scripted::Status(
                401,
                r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#,
            )],
        )],
    )
    .await;

    let body = fx.executor.execute(request()).await.unwrap();
    assert!(!body.is_empty());

    let state = fx.manager.get("a1").await.unwrap();
    assert!(state.read().await.disabled);

    // Subsequent requests never touch a1 again.
    for _ in 0..5 {
        fx.executor.execute(request()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    let logs = fx.repo.get_recent_request_logs(20).await.unwrap();
    let a1_successes = logs
        .iter()
        .filter(|log| log.account_id == "a1" && log.status_code == 200)
        .count();
    assert_eq!(a1_successes, 0);
}

#[tokio::test]
async fn short_cooldowns_are_waited_out() {
    let fx = fixture("blocked", vec![account("a1")], Vec::new()).await;

    let limited = aigw_provider_core::ParsedError::new(
        aigw_provider_core::ErrorKind::RateLimit,
        429,
        "cooling",
    )
    .with_cooldown(Duration::from_millis(300));
    fx.manager.mark_failure("a1", MODEL, &limited).await;

    let started = tokio::time::Instant::now();
    let body = fx.executor.execute(request()).await.unwrap();
    assert!(!body.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn all_attempts_exhausted_surface_the_last_upstream_error() {
    let fx = fixture(
        "exhausted",
        vec![account("a1")],
        vec![(
            "a1",
            vec![
                Scripted::Status(500, r#"{"error":{"message":"boom"}}"#),
                Scripted::Status(500, r#"{"error":{"message":"boom"}}"#),
                Scripted::Status(500, r#"{"error":{"message":"boom"}}"#),
                Scripted::Status(500, r#"{"error":{"message":"boom"}}"#),
            ],
        )],
    )
    .await;

    let err = fx.executor.execute(request()).await.unwrap_err();
    assert_eq!(err.status, 500);
    assert_eq!(err.message, "boom");
}
