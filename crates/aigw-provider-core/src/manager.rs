use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::account::{Account, AccountId, AccountState};
use crate::error::ParsedError;

/// Atomic counter used for cross-process round-robin fairness. The runtime
/// implementation INCRs a KV key; tests substitute a local counter.
#[async_trait]
pub trait RotationCounter: Send + Sync {
    async fn next(&self, key: &str) -> u64;
}

/// Quota availability as seen by selection. The runtime implementation
/// consults the KV exhaustion keys and learned per-account limits.
#[async_trait]
pub trait QuotaView: Send + Sync {
    async fn is_available(&self, account_id: &str, model: &str) -> bool;

    /// Earliest estimated reset over a set of exhausted (account, model)
    /// pairs.
    async fn earliest_reset(&self, pairs: &[(String, String)]) -> Option<OffsetDateTime>;
}

/// Quota view that never blocks anything; used when no tracker is wired.
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaView for UnlimitedQuota {
    async fn is_available(&self, _account_id: &str, _model: &str) -> bool {
        true
    }

    async fn earliest_reset(&self, _pairs: &[(String, String)]) -> Option<OffsetDateTime> {
        None
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectError {
    #[error("no accounts for provider {0}")]
    NoAccounts(String),
    #[error("all accounts blocked")]
    AllBlocked { wait_until: Option<OffsetDateTime> },
    #[error("all accounts quota-exhausted ({count})")]
    AllExhausted {
        reset_at: Option<OffsetDateTime>,
        count: usize,
    },
}

/// Per-account health registry and selection engine.
///
/// Lock discipline: the outer map lock is taken in read mode for selection
/// and write mode for reconciliation; per-account locks are held briefly and
/// never across upstream IO.
pub struct AccountStateManager {
    accounts: RwLock<HashMap<AccountId, Arc<RwLock<AccountState>>>>,
    rotation: Arc<dyn RotationCounter>,
    quota: Arc<dyn QuotaView>,
}

impl AccountStateManager {
    pub fn new(rotation: Arc<dyn RotationCounter>, quota: Arc<dyn QuotaView>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            rotation,
            quota,
        }
    }

    pub async fn insert_account(&self, account: Account) {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(account.id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(AccountState::new(account))));
    }

    pub async fn remove_account(&self, account_id: &str) {
        self.accounts.write().await.remove(account_id);
    }

    pub async fn get(&self, account_id: &str) -> Option<Arc<RwLock<AccountState>>> {
        self.accounts.read().await.get(account_id).cloned()
    }

    pub async fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Load DB rows at startup. Idempotent: existing in-memory entries keep
    /// their health state.
    pub async fn load_accounts(&self, rows: Vec<Account>) {
        for row in rows {
            self.insert_account(row).await;
        }
    }

    /// Bring the in-memory set in line with the repository for one provider.
    /// Adds missing accounts, drops deleted ones and refreshes the row data
    /// of survivors without touching their health state. Returns
    /// (added, removed).
    pub async fn reconcile(&self, provider_id: &str, rows: Vec<Account>) -> (usize, usize) {
        let mut accounts = self.accounts.write().await;

        let seen: std::collections::HashSet<&str> =
            rows.iter().map(|row| row.id.as_str()).collect();

        let stale: Vec<AccountId> = {
            let mut stale = Vec::new();
            for (id, state) in accounts.iter() {
                let state = state.try_read();
                let belongs = match &state {
                    Ok(state) => state.account.provider_id == provider_id,
                    // Contended entries are revisited on the next tick.
                    Err(_) => false,
                };
                if belongs && !seen.contains(id.as_str()) {
                    stale.push(id.clone());
                }
            }
            stale
        };
        let removed = stale.len();
        for id in stale {
            accounts.remove(&id);
        }

        let mut added = 0;
        for row in rows {
            match accounts.get(&row.id) {
                Some(existing) => {
                    let mut state = existing.write().await;
                    state.account = row;
                }
                None => {
                    added += 1;
                    accounts.insert(
                        row.id.clone(),
                        Arc::new(RwLock::new(AccountState::new(row))),
                    );
                }
            }
        }

        (added, removed)
    }

    /// Pick the best available account for (provider, model), round-robin
    /// across equally-available candidates.
    pub async fn select(&self, provider_id: &str, model: &str) -> Result<Account, SelectError> {
        self.select_excluding(provider_id, model, None).await
    }

    /// Same as `select`, skipping one account id. Used when the executor
    /// switches away from a failing account.
    pub async fn select_excluding(
        &self,
        provider_id: &str,
        model: &str,
        exclude: Option<&str>,
    ) -> Result<Account, SelectError> {
        let now = OffsetDateTime::now_utc();
        let accounts = self.accounts.read().await;

        let mut candidates = 0usize;
        let mut available: Vec<Account> = Vec::new();
        let mut exhausted: Vec<(String, String)> = Vec::new();
        let mut earliest_wait: Option<OffsetDateTime> = None;

        for state in accounts.values() {
            let state = state.read().await;
            if state.account.provider_id != provider_id || !state.account.is_active {
                continue;
            }
            if exclude.is_some_and(|skip| skip == state.account.id) {
                continue;
            }
            candidates += 1;

            if state.is_disabled(now) {
                track_earliest(&mut earliest_wait, state.disabled_until);
                continue;
            }
            if let Some(model_state) = state.models.get(model)
                && model_state.is_blocked(now)
            {
                if !model_state.disabled {
                    track_earliest(&mut earliest_wait, model_state.next_retry_after);
                }
                continue;
            }
            if !self.quota.is_available(&state.account.id, model).await {
                exhausted.push((state.account.id.clone(), model.to_string()));
                continue;
            }
            available.push(state.account.clone());
        }
        drop(accounts);

        if candidates == 0 {
            return Err(SelectError::NoAccounts(provider_id.to_string()));
        }

        if available.is_empty() {
            if !exhausted.is_empty() {
                let reset_at = self.quota.earliest_reset(&exhausted).await;
                return Err(SelectError::AllExhausted {
                    reset_at,
                    count: exhausted.len(),
                });
            }
            return Err(SelectError::AllBlocked {
                wait_until: earliest_wait,
            });
        }

        if available.len() == 1 {
            return Ok(available.into_iter().next().expect("one candidate"));
        }

        // Stable order so the shared counter lands fairly across processes.
        available.sort_by(|a, b| a.id.cmp(&b.id));
        let counter = self.rotation.next(&format!("auth:rr:{model}")).await;
        let index = (counter as usize) % available.len();
        Ok(available.swap_remove(index))
    }

    pub async fn mark_success(&self, account_id: &str, model: &str) {
        let Some(state) = self.get(account_id).await else {
            return;
        };
        let mut state = state.write().await;
        state.record_success(model, OffsetDateTime::now_utc());
    }

    pub async fn mark_failure(&self, account_id: &str, model: &str, error: &ParsedError) {
        let Some(state) = self.get(account_id).await else {
            return;
        };
        let mut state = state.write().await;
        let applied = state.record_error(model, error, OffsetDateTime::now_utc());
        tracing::debug!(
            account = account_id,
            model,
            kind = ?error.kind,
            cooldown = ?applied,
            "account marked after upstream failure"
        );
    }

    /// True when selection at `now` would skip this (account, model) pair.
    pub async fn is_blocked_for(&self, account_id: &str, model: &str) -> bool {
        let Some(state) = self.get(account_id).await else {
            return true;
        };
        let state = state.read().await;
        let now = OffsetDateTime::now_utc();
        if state.is_disabled(now) {
            return true;
        }
        state
            .models
            .get(model)
            .map(|model_state| model_state.is_blocked(now))
            .unwrap_or(false)
    }
}

fn track_earliest(slot: &mut Option<OffsetDateTime>, candidate: Option<OffsetDateTime>) {
    if let Some(candidate) = candidate {
        match slot {
            Some(existing) if *existing <= candidate => {}
            _ => *slot = Some(candidate),
        }
    }
}
