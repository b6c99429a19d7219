use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::account::Account;
use crate::adapter::TransportError;
use crate::auth_data::AuthData;

/// Lead time before expiry at which a token is refreshed proactively.
pub const REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

/// Cached credential as stored in the KV at `auth:<provider>:<account>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    /// Unix seconds; `None` for keys that never expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl CachedToken {
    /// A cached value is served only while it stays clear of the refresh
    /// skew window.
    pub fn is_fresh(&self, now: OffsetDateTime, skew: Duration) -> bool {
        match self.expires_at {
            None => !self.access_token.is_empty(),
            Some(expires_at) => {
                let deadline = expires_at - skew.as_secs() as i64;
                !self.access_token.is_empty() && now.unix_timestamp() < deadline
            }
        }
    }

    pub fn ttl(&self, now: OffsetDateTime) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let remaining = expires_at - now.unix_timestamp();
        (remaining > 0).then(|| Duration::from_secs(remaining as u64))
    }
}

/// Result of a provider refresh: the new token plus the updated opaque blob
/// to persist back to the repository.
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub access_token: String,
    pub expires_at: Option<i64>,
    pub auth_data: JsonValue,
    /// Some providers return an id_token whose payload carries the account
    /// email; surfaced for admin display only.
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("auth kind does not support refresh")]
    Unsupported,
    #[error("refresh backing off until {0}")]
    Backoff(OffsetDateTime),
    #[error("invalid auth_data: {0}")]
    AuthData(#[from] crate::auth_data::AuthDataError),
    #[error("token endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("token response could not be decoded: {0}")]
    Decode(String),
}

/// Produces fresh credentials from stored refresh material. One
/// implementation per auth kind; providers can ship their own.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        account: &Account,
        auth: &AuthData,
        proxy: Option<&str>,
    ) -> Result<RefreshedCredential, TokenError>;

    /// Lead time inside which the background loop refreshes proactively.
    fn lead_time(&self) -> Duration {
        REFRESH_SKEW
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_stale_inside_the_skew_window() {
        let now = OffsetDateTime::now_utc();
        let token = CachedToken {
            access_token: "at".to_string(),
            expires_at: Some(now.unix_timestamp() + 60),
        };
        assert!(!token.is_fresh(now, REFRESH_SKEW));
        assert!(token.is_fresh(now, Duration::from_secs(10)));
    }

    #[test]
    fn keys_without_expiry_stay_fresh() {
        let now = OffsetDateTime::now_utc();
        let token = CachedToken {
            access_token: "sk".to_string(),
            expires_at: None,
        };
        assert!(token.is_fresh(now, REFRESH_SKEW));
        assert_eq!(token.ttl(now), None);
    }
}
