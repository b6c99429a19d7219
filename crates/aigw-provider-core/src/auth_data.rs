use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::descriptor::AuthKind;

/// Typed view over an account's opaque `auth_data` blob. Decoded only at the
/// token-lifecycle boundary; everything else treats the blob as bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthData {
    ApiKey(ApiKeyAuth),
    Bearer(BearerAuth),
    OAuth(OAuthAuth),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyAuth {
    #[serde(alias = "apiKey", alias = "key", alias = "token", alias = "access_token")]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerAuth {
    pub token: String,
    pub refresh_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthAuth {
    pub access_token: String,
    pub refresh_token: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthDataError {
    #[error("auth_data does not match auth kind {kind:?}: {source}")]
    Shape {
        kind: AuthKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("auth_data has an empty credential")]
    Empty,
}

impl AuthData {
    pub fn decode(kind: AuthKind, raw: &JsonValue) -> Result<Self, AuthDataError> {
        let decoded = match kind {
            AuthKind::ApiKey => AuthData::ApiKey(
                serde_json::from_value(raw.clone())
                    .map_err(|source| AuthDataError::Shape { kind, source })?,
            ),
            AuthKind::Bearer => AuthData::Bearer(
                serde_json::from_value(raw.clone())
                    .map_err(|source| AuthDataError::Shape { kind, source })?,
            ),
            AuthKind::Oauth => AuthData::OAuth(
                serde_json::from_value(raw.clone())
                    .map_err(|source| AuthDataError::Shape { kind, source })?,
            ),
        };
        if decoded.primary_secret().is_empty() {
            return Err(AuthDataError::Empty);
        }
        Ok(decoded)
    }

    fn primary_secret(&self) -> &str {
        match self {
            AuthData::ApiKey(auth) => &auth.api_key,
            AuthData::Bearer(auth) => &auth.token,
            AuthData::OAuth(auth) => &auth.access_token,
        }
    }

    /// Unix-seconds expiry of the current credential, when one applies.
    pub fn expires_at(&self) -> Option<i64> {
        match self {
            AuthData::ApiKey(_) => None,
            AuthData::Bearer(auth) => auth.expires_at,
            AuthData::OAuth(auth) => auth.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_key_accepts_field_aliases() {
        for field in ["api_key", "apiKey", "key", "token", "access_token"] {
            let raw = json!({ field: "sk-1" });
            let decoded = AuthData::decode(AuthKind::ApiKey, &raw).unwrap();
            assert_eq!(decoded, AuthData::ApiKey(ApiKeyAuth { api_key: "sk-1".to_string() }));
        }
    }

    #[test]
    fn empty_key_is_rejected() {
        let raw = json!({ "api_key": "" });
        assert!(matches!(
            AuthData::decode(AuthKind::ApiKey, &raw),
            Err(AuthDataError::Empty)
        ));
    }

    #[test]
    fn oauth_blob_decodes() {
        let raw = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "token_url": "https://oauth.example/token",
            "client_id": "cid",
            "client_secret": "cs",
            "expires_at": 1_800_000_000i64
        });
        let decoded = AuthData::decode(AuthKind::Oauth, &raw).unwrap();
        assert_eq!(decoded.expires_at(), Some(1_800_000_000));
    }
}
