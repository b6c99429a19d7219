use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;
use time::OffsetDateTime;

use aigw_provider_core::{
    Account, AccountStateManager, DefaultErrorParser, ErrorParser, QuotaView, RotationCounter,
    SelectError, UnlimitedQuota,
};

struct LocalCounter(AtomicU64);

#[async_trait]
impl RotationCounter for LocalCounter {
    async fn next(&self, _key: &str) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

struct ExhaustedFor(HashSet<String>);

#[async_trait]
impl QuotaView for ExhaustedFor {
    async fn is_available(&self, account_id: &str, _model: &str) -> bool {
        !self.0.contains(account_id)
    }

    async fn earliest_reset(&self, _pairs: &[(String, String)]) -> Option<OffsetDateTime> {
        Some(OffsetDateTime::now_utc() + time::Duration::hours(1))
    }
}

fn account(id: &str, provider: &str) -> Account {
    Account {
        id: id.to_string(),
        provider_id: provider.to_string(),
        name: None,
        auth_data: json!({"api_key": "sk"}),
        proxy_id: None,
        proxy_url: None,
        is_active: true,
        created_by: None,
    }
}

fn manager() -> AccountStateManager {
    AccountStateManager::new(
        Arc::new(LocalCounter(AtomicU64::new(0))),
        Arc::new(UnlimitedQuota),
    )
}

#[tokio::test]
async fn select_with_no_candidates_errors() {
    let manager = manager();
    match manager.select("openai", "gpt-4o").await {
        Err(SelectError::NoAccounts(provider)) => assert_eq!(provider, "openai"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn round_robin_is_fair_over_equal_candidates() {
    let manager = manager();
    manager.load_accounts(vec![account("a1", "p"), account("a2", "p")]).await;

    let mut order = Vec::new();
    for _ in 0..6 {
        order.push(manager.select("p", "m").await.unwrap().id);
    }
    assert_eq!(order, vec!["a1", "a2", "a1", "a2", "a1", "a2"]);
}

#[tokio::test]
async fn auth_failure_excludes_the_account_from_selection() {
    let manager = manager();
    manager.load_accounts(vec![account("a1", "p"), account("a2", "p")]).await;

    let denied = DefaultErrorParser.parse(401, &Vec::new(), b"revoked");
    manager.mark_failure("a1", "m", &denied).await;

    assert!(manager.is_blocked_for("a1", "m").await);
    for _ in 0..5 {
        assert_eq!(manager.select("p", "m").await.unwrap().id, "a2");
    }
}

#[tokio::test]
async fn blocked_accounts_surface_a_wait_hint() {
    let manager = manager();
    manager.load_accounts(vec![account("a1", "p")]).await;

    let limited = DefaultErrorParser.parse(429, &Vec::new(), b"slow down");
    manager.mark_failure("a1", "m", &limited).await;

    match manager.select("p", "m").await {
        Err(SelectError::AllBlocked { wait_until }) => {
            let wait = wait_until.expect("wait hint");
            assert!(wait > OffsetDateTime::now_utc());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_accounts_report_reset_estimate() {
    let manager = AccountStateManager::new(
        Arc::new(LocalCounter(AtomicU64::new(0))),
        Arc::new(ExhaustedFor(HashSet::from(["a1".to_string()]))),
    );
    manager.load_accounts(vec![account("a1", "p")]).await;

    match manager.select("p", "m").await {
        Err(SelectError::AllExhausted { reset_at, count }) => {
            assert_eq!(count, 1);
            assert!(reset_at.is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn model_block_leaves_other_models_usable() {
    let manager = manager();
    manager.load_accounts(vec![account("a1", "p")]).await;

    let missing = DefaultErrorParser.parse(404, &Vec::new(), b"no model");
    manager.mark_failure("a1", "gone", &missing).await;

    assert!(manager.is_blocked_for("a1", "gone").await);
    assert_eq!(manager.select("p", "other").await.unwrap().id, "a1");
}

#[tokio::test]
async fn reconcile_adds_and_removes_without_touching_health() {
    let manager = manager();
    manager.load_accounts(vec![account("a1", "p"), account("a2", "p")]).await;

    let limited = DefaultErrorParser.parse(429, &Vec::new(), b"");
    manager.mark_failure("a1", "m", &limited).await;

    // a2 deleted, a3 added, a1 survives with its cooldown intact.
    let (added, removed) = manager
        .reconcile("p", vec![account("a1", "p"), account("a3", "p")])
        .await;
    assert_eq!((added, removed), (1, 1));
    assert_eq!(manager.len().await, 2);
    assert!(manager.is_blocked_for("a1", "m").await);
    assert!(manager.get("a2").await.is_none());

    // Identical rows again: a no-op.
    let (added, removed) = manager
        .reconcile("p", vec![account("a1", "p"), account("a3", "p")])
        .await;
    assert_eq!((added, removed), (0, 0));
    assert!(manager.is_blocked_for("a1", "m").await);
}

#[tokio::test]
async fn switch_excludes_the_current_account() {
    let manager = manager();
    manager.load_accounts(vec![account("a1", "p"), account("a2", "p")]).await;

    let picked = manager
        .select_excluding("p", "m", Some("a1"))
        .await
        .unwrap();
    assert_eq!(picked.id, "a2");

    match manager.select_excluding("p", "m", Some("a2")).await {
        Ok(other) => assert_eq!(other.id, "a1"),
        other => panic!("unexpected: {other:?}"),
    }
}
