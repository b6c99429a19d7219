use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::error::{ErrorKind, ParsedError};

pub type AccountId = String;

/// A credential-bearing identity at one upstream provider. Mirrors the
/// accounts row; `auth_data` stays opaque outside the token lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub provider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub auth_data: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    #[default]
    None,
    Disabled,
    Cooldown,
    Quota,
    Auth,
}

/// Exponential cooldown applied on repeated quota exhaustion. Reset on any
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaBackoff {
    multiplier: u32,
    base: Duration,
    cap: Duration,
}

impl Default for QuotaBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30 * 60))
    }
}

impl QuotaBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            multiplier: 0,
            base,
            cap,
        }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn increment(&mut self) {
        self.multiplier = self.multiplier.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.multiplier = 0;
    }

    /// `min(base * 2^(multiplier - 1), cap)`; the first hit waits `base`.
    pub fn next(&self) -> Duration {
        let shift = self.multiplier.saturating_sub(1).min(32);
        let factor = 1u64 << shift;
        let scaled = self
            .base
            .as_millis()
            .saturating_mul(factor as u128)
            .min(self.cap.as_millis());
        Duration::from_millis(scaled as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelState {
    /// Permanent for this (account, model) pair.
    pub disabled: bool,
    pub block_reason: BlockReason,
    pub next_retry_after: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: Option<OffsetDateTime>,
}

impl ModelState {
    pub fn is_blocked(&self, now: OffsetDateTime) -> bool {
        if self.disabled {
            return true;
        }
        match self.next_retry_after {
            Some(after) => now < after,
            None => false,
        }
    }
}

/// In-memory health state for one account. Lives for the process lifetime;
/// removed when the reconciler observes the row was deleted.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub account: Account,
    pub models: HashMap<String, ModelState>,
    pub quota_backoff: QuotaBackoff,
    /// Account-level disable (auth/permission failures).
    pub disabled: bool,
    pub disabled_until: Option<OffsetDateTime>,
    pub last_refresh_at: Option<OffsetDateTime>,
    pub next_refresh_after: Option<OffsetDateTime>,
}

impl AccountState {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            models: HashMap::new(),
            quota_backoff: QuotaBackoff::default(),
            disabled: false,
            disabled_until: None,
            last_refresh_at: None,
            next_refresh_after: None,
        }
    }

    pub fn is_disabled(&self, now: OffsetDateTime) -> bool {
        if !self.disabled {
            return false;
        }
        match self.disabled_until {
            Some(until) => now < until,
            None => true,
        }
    }

    pub fn model(&mut self, model: &str) -> &mut ModelState {
        self.models.entry(model.to_string()).or_default()
    }

    pub fn record_success(&mut self, model: &str, now: OffsetDateTime) {
        self.disabled = false;
        self.disabled_until = None;
        self.quota_backoff.reset();

        let state = self.model(model);
        state.success_count += 1;
        state.last_used_at = Some(now);
        state.block_reason = BlockReason::None;
        state.next_retry_after = None;
        state.last_error = None;
    }

    /// Apply a classified failure. Returns the cooldown that was applied to
    /// the (account, model) pair, if any.
    pub fn record_error(
        &mut self,
        model: &str,
        error: &ParsedError,
        now: OffsetDateTime,
    ) -> Option<Duration> {
        match error.kind {
            ErrorKind::Authentication | ErrorKind::Permission => {
                self.disabled = true;
                self.disabled_until = Some(now + error.cooldown);
                let state = self.model(model);
                state.failure_count += 1;
                state.block_reason = BlockReason::Auth;
                state.next_retry_after = Some(now + error.cooldown);
                state.last_error = Some(error.message.clone());
                Some(error.cooldown)
            }
            ErrorKind::QuotaExceeded => {
                self.quota_backoff.increment();
                let wait = self.quota_backoff.next();
                let state = self.model(model);
                state.failure_count += 1;
                state.block_reason = BlockReason::Quota;
                state.next_retry_after = Some(now + wait);
                state.last_error = Some(error.message.clone());
                Some(wait)
            }
            ErrorKind::NotFound => {
                let state = self.model(model);
                state.failure_count += 1;
                state.disabled = true;
                state.block_reason = BlockReason::Disabled;
                state.next_retry_after = Some(now + error.cooldown);
                state.last_error = Some(error.message.clone());
                None
            }
            ErrorKind::RateLimit
            | ErrorKind::Overloaded
            | ErrorKind::Transient
            | ErrorKind::Unknown => {
                let state = self.model(model);
                state.failure_count += 1;
                state.block_reason = BlockReason::Cooldown;
                state.next_retry_after = Some(now + error.cooldown);
                state.last_error = Some(error.message.clone());
                Some(error.cooldown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DefaultErrorParser, ErrorParser};

    fn account() -> Account {
        Account {
            id: "acc_1".to_string(),
            provider_id: "openai".to_string(),
            name: None,
            auth_data: serde_json::json!({"api_key": "sk"}),
            proxy_id: None,
            proxy_url: None,
            is_active: true,
            created_by: None,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = QuotaBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
        backoff.increment();
        assert_eq!(backoff.next(), Duration::from_secs(1));
        backoff.increment();
        assert_eq!(backoff.next(), Duration::from_secs(2));
        backoff.increment();
        assert_eq!(backoff.next(), Duration::from_secs(4));
        for _ in 0..40 {
            backoff.increment();
        }
        assert_eq!(backoff.next(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.multiplier(), 0);
    }

    #[test]
    fn auth_failure_disables_whole_account() {
        let mut state = AccountState::new(account());
        let now = OffsetDateTime::now_utc();
        let error = DefaultErrorParser.parse(401, &Vec::new(), b"bad key");

        state.record_error("gpt-4o", &error, now);
        assert!(state.is_disabled(now));
        assert!(state.models["gpt-4o"].is_blocked(now));
    }

    #[test]
    fn success_clears_blocks_and_backoff() {
        let mut state = AccountState::new(account());
        let now = OffsetDateTime::now_utc();
        let quota = DefaultErrorParser.parse(401, &Vec::new(), b"");
        state.record_error("m", &quota, now);
        state.quota_backoff.increment();

        state.record_success("m", now);
        assert!(!state.is_disabled(now));
        assert_eq!(state.quota_backoff.multiplier(), 0);
        assert!(!state.models["m"].is_blocked(now));
        assert_eq!(state.models["m"].success_count, 1);
    }

    #[test]
    fn not_found_disables_only_that_model() {
        let mut state = AccountState::new(account());
        let now = OffsetDateTime::now_utc();
        let error = DefaultErrorParser.parse(404, &Vec::new(), b"no such model");

        state.record_error("gone-model", &error, now);
        assert!(!state.is_disabled(now));
        assert!(state.models["gone-model"].disabled);
        assert!(
            state
                .models
                .get("other-model")
                .map(|m| !m.is_blocked(now))
                .unwrap_or(true)
        );
    }
}
