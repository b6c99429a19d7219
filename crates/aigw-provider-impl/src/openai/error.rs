use serde::Deserialize;

use aigw_provider_core::{
    DefaultErrorParser, ErrorKind, ErrorParser, Headers, ParsedError, retry_after,
};

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    error: WireErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct WireErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    r#type: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl WireErrorDetail {
    fn code_str(&self) -> String {
        match &self.code {
            Some(serde_json::Value::String(code)) => code.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// OpenAI-wire classifier. The load-bearing split: `429 insufficient_quota`
/// means the account's paid quota is gone for a long while, while a plain
/// 429 is a transient rate limit.
pub struct OpenAiErrorParser;

impl ErrorParser for OpenAiErrorParser {
    fn parse(&self, status: u16, headers: &Headers, body: &[u8]) -> ParsedError {
        let wire = serde_json::from_slice::<WireError>(body).unwrap_or_default();
        let detail = wire.error;
        let code = detail.code_str();
        let message = if detail.message.is_empty() {
            String::from_utf8_lossy(&body[..body.len().min(256)]).to_string()
        } else {
            detail.message.clone()
        };

        match status {
            429 => {
                if detail.r#type == "insufficient_quota" || code == "insufficient_quota" {
                    return ParsedError::new(ErrorKind::QuotaExceeded, status, message);
                }
                let parsed = ParsedError::new(ErrorKind::RateLimit, status, message);
                match retry_after(headers) {
                    Some(wait) => parsed.with_cooldown(wait),
                    None => parsed,
                }
            }
            401 => ParsedError::new(ErrorKind::Authentication, status, message),
            403 => ParsedError::new(ErrorKind::Permission, status, message),
            404 => {
                if code == "model_not_found" || message.contains("does not exist") {
                    ParsedError::new(ErrorKind::NotFound, status, message)
                } else {
                    DefaultErrorParser.parse(status, headers, body)
                }
            }
            _ => DefaultErrorParser.parse(status, headers, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_provider_core::error::QUOTA_COOLDOWN;

    #[test]
    fn insufficient_quota_is_not_a_rate_limit() {
        let body = br#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        let parsed = OpenAiErrorParser.parse(429, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::QuotaExceeded);
        assert_eq!(parsed.cooldown, QUOTA_COOLDOWN);
    }

    #[test]
    fn plain_429_honours_retry_after() {
        let body = br#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        let headers = vec![("retry-after".to_string(), "12".to_string())];
        let parsed = OpenAiErrorParser.parse(429, &headers, body);
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
        assert_eq!(parsed.cooldown, std::time::Duration::from_secs(12));
    }

    #[test]
    fn missing_model_is_not_found() {
        let body = br#"{"error":{"message":"The model `gpt-9` does not exist","type":"invalid_request_error","code":"model_not_found"}}"#;
        let parsed = OpenAiErrorParser.parse(404, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::NotFound);
        assert!(!parsed.retryable);
    }

    #[test]
    fn invalid_key_disables_the_account() {
        let body = br#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let parsed = OpenAiErrorParser.parse(401, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::Authentication);
    }
}
