use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use aigw_provider_core::{
    Account, AuthData, BearerAuth, HttpMethod, OAuthAuth, RefreshedCredential, TokenError,
    TokenRefresher, UpstreamBody, UpstreamClient, UpstreamHttpRequest,
};

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Common token-endpoint response shape. Providers disagree on field names;
/// accept both spellings.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenEndpointResponse {
    fn token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .or(self.token.as_deref())
            .filter(|token| !token.is_empty())
    }

    fn expiry(&self, now: OffsetDateTime) -> Option<i64> {
        self.expires_at
            .or_else(|| self.expires_in.map(|secs| now.unix_timestamp() + secs))
    }
}

/// Decode the email claim from an id_token payload. The token just came from
/// the trusted token endpoint, so the signature is not verified here.
pub fn parse_id_token_email(id_token: &str) -> Option<String> {
    let mut parts = id_token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature))
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            payload
        }
        _ => return None,
    };
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims = serde_json::from_slice::<JsonValue>(&bytes).ok()?;
    claims
        .get("email")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

async fn post_token_endpoint(
    client: &dyn UpstreamClient,
    proxy: Option<&str>,
    url: &str,
    content_type: &'static str,
    extra_headers: Vec<(String, String)>,
    body: Vec<u8>,
) -> Result<TokenEndpointResponse, TokenError> {
    let mut headers = vec![
        ("content-type".to_string(), content_type.to_string()),
        ("accept".to_string(), "application/json".to_string()),
    ];
    headers.extend(extra_headers);

    let response = client
        .send(
            proxy,
            UpstreamHttpRequest {
                method: HttpMethod::Post,
                url: url.to_string(),
                headers,
                body: Some(body.into()),
                stream: false,
                timeout: Some(REFRESH_TIMEOUT),
            },
        )
        .await?;

    let body = match response.body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(_) => {
            return Err(TokenError::Decode(
                "token endpoint returned a stream".to_string(),
            ));
        }
    };

    if !(200..300).contains(&response.status) {
        return Err(TokenError::Endpoint {
            status: response.status,
            message: String::from_utf8_lossy(&body[..body.len().min(512)]).to_string(),
        });
    }

    serde_json::from_slice(&body).map_err(|err| TokenError::Decode(err.to_string()))
}

/// OAuth-style refresh: form-urlencoded grant against the stored token_url.
pub struct OAuthRefresher {
    client: Arc<dyn UpstreamClient>,
}

impl OAuthRefresher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(
        &self,
        account: &Account,
        auth: &AuthData,
        proxy: Option<&str>,
    ) -> Result<RefreshedCredential, TokenError> {
        let AuthData::OAuth(auth) = auth else {
            return Err(TokenError::Unsupported);
        };

        let form = serde_urlencoded::to_string([
            ("grant_type", "refresh_token"),
            ("refresh_token", auth.refresh_token.as_str()),
            ("client_id", auth.client_id.as_str()),
            ("client_secret", auth.client_secret.as_str()),
        ])
        .map_err(|err| TokenError::Decode(err.to_string()))?;

        let response = post_token_endpoint(
            self.client.as_ref(),
            proxy,
            &auth.token_url,
            "application/x-www-form-urlencoded",
            Vec::new(),
            form.into_bytes(),
        )
        .await?;

        let now = OffsetDateTime::now_utc();
        let access_token = response
            .token()
            .ok_or_else(|| TokenError::Decode("missing access_token".to_string()))?
            .to_string();
        let expires_at = response.expiry(now);
        let email = response
            .id_token
            .as_deref()
            .and_then(parse_id_token_email)
            .or_else(|| auth.user_email.clone());

        tracing::debug!(account = account.id, "oauth token refreshed");

        let updated = OAuthAuth {
            access_token: access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .unwrap_or_else(|| auth.refresh_token.clone()),
            token_url: auth.token_url.clone(),
            client_id: auth.client_id.clone(),
            client_secret: auth.client_secret.clone(),
            expires_at,
            expires_in: response.expires_in,
            token_type: response.token_type.clone().or_else(|| auth.token_type.clone()),
            user_email: email.clone(),
        };

        Ok(RefreshedCredential {
            access_token,
            expires_at,
            auth_data: serde_json::to_value(&updated)
                .map_err(|err| TokenError::Decode(err.to_string()))?,
            email,
        })
    }
}

/// Bearer refresh: JSON POST against the stored refresh_url, optionally
/// authenticated with a long-lived api_key.
pub struct BearerRefresher {
    client: Arc<dyn UpstreamClient>,
}

impl BearerRefresher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for BearerRefresher {
    async fn refresh(
        &self,
        account: &Account,
        auth: &AuthData,
        proxy: Option<&str>,
    ) -> Result<RefreshedCredential, TokenError> {
        let AuthData::Bearer(auth) = auth else {
            return Err(TokenError::Unsupported);
        };

        let mut extra_headers = Vec::new();
        if let Some(api_key) = &auth.api_key {
            let header = auth
                .auth_header
                .clone()
                .unwrap_or_else(|| "authorization".to_string());
            let value = if header.eq_ignore_ascii_case("authorization") {
                format!("Bearer {api_key}")
            } else {
                api_key.clone()
            };
            extra_headers.push((header, value));
        }

        let body = serde_json::to_vec(&serde_json::json!({ "token": auth.token }))
            .map_err(|err| TokenError::Decode(err.to_string()))?;

        let response = post_token_endpoint(
            self.client.as_ref(),
            proxy,
            &auth.refresh_url,
            "application/json",
            extra_headers,
            body,
        )
        .await?;

        let now = OffsetDateTime::now_utc();
        let access_token = response
            .token()
            .ok_or_else(|| TokenError::Decode("missing token".to_string()))?
            .to_string();
        let expires_at = response.expiry(now);

        tracing::debug!(account = account.id, "bearer token refreshed");

        let updated = BearerAuth {
            token: access_token.clone(),
            refresh_url: auth.refresh_url.clone(),
            expires_at,
            expires_in: response.expires_in,
            api_key: auth.api_key.clone(),
            auth_header: auth.auth_header.clone(),
        };

        Ok(RefreshedCredential {
            access_token,
            expires_at,
            auth_data: serde_json::to_value(&updated)
                .map_err(|err| TokenError::Decode(err.to_string()))?,
            email: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_token_email_is_decoded_without_verification() {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"email":"dev@example.com","sub":"1"}"#);
        let token = format!("eyJh.{payload}.sig");
        assert_eq!(
            parse_id_token_email(&token).as_deref(),
            Some("dev@example.com")
        );
    }

    #[test]
    fn malformed_id_token_yields_none() {
        assert_eq!(parse_id_token_email("not-a-jwt"), None);
        assert_eq!(parse_id_token_email("a.b"), None);
        assert_eq!(parse_id_token_email("..c"), None);
    }

    #[test]
    fn expiry_prefers_absolute_over_relative() {
        let now = OffsetDateTime::now_utc();
        let response = TokenEndpointResponse {
            access_token: Some("at".to_string()),
            token: None,
            refresh_token: None,
            expires_in: Some(3600),
            expires_at: Some(42),
            id_token: None,
            token_type: None,
        };
        assert_eq!(response.expiry(now), Some(42));
    }
}
