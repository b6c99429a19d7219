//! GLM speaks the OpenAI chat wire; what differs is the auth model
//! (bearer-with-refresh), the endpoints and the numeric error codes.

use std::sync::Arc;

use aigw_provider_core::{
    DefaultErrorParser, ErrorKind, ErrorParser, Headers, ParsedError, ProviderDescriptor,
    UpstreamClient,
};

use crate::openai::OpenAiAdapter;

pub const GLM_USER_AGENT: &str = "aigw-glm/0.4";

pub fn glm_adapter(
    descriptor: ProviderDescriptor,
    client: Arc<dyn UpstreamClient>,
) -> OpenAiAdapter {
    OpenAiAdapter::with_parser(descriptor, client, Box::new(GlmErrorParser), GLM_USER_AGENT)
}

/// GLM error bodies carry numeric codes in `error.code`:
/// 1113 = account balance/package exhausted, 1302/1305 = concurrency or rate
/// limits, 1000/1001/1002 = key problems.
pub struct GlmErrorParser;

impl ErrorParser for GlmErrorParser {
    fn parse(&self, status: u16, headers: &Headers, body: &[u8]) -> ParsedError {
        let value = serde_json::from_slice::<serde_json::Value>(body).unwrap_or_default();
        let error = value.get("error");
        let code = error
            .and_then(|error| error.get("code"))
            .map(|code| match code {
                serde_json::Value::String(code) => code.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let message = error
            .and_then(|error| error.get("message"))
            .and_then(|message| message.as_str())
            .unwrap_or("")
            .to_string();

        match code.as_str() {
            "1113" | "1112" => ParsedError::new(ErrorKind::QuotaExceeded, status, message),
            "1302" | "1303" | "1305" => ParsedError::new(ErrorKind::RateLimit, status, message),
            "1000" | "1001" | "1002" | "1003" | "1004" => {
                ParsedError::new(ErrorKind::Authentication, status, message)
            }
            "1211" => ParsedError::new(ErrorKind::NotFound, status, message),
            _ => DefaultErrorParser.parse(status, headers, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_exhausted_maps_to_quota() {
        let body = br#"{"error":{"code":"1113","message":"insufficient balance"}}"#;
        let parsed = GlmErrorParser.parse(429, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn concurrency_limit_maps_to_rate_limit() {
        let body = br#"{"error":{"code":"1302","message":"too many concurrent requests"}}"#;
        let parsed = GlmErrorParser.parse(429, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn invalid_key_code_maps_to_authentication() {
        let body = br#"{"error":{"code":"1002","message":"invalid api key"}}"#;
        let parsed = GlmErrorParser.parse(401, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::Authentication);
    }

    #[test]
    fn unknown_codes_fall_through_to_defaults() {
        let body = br#"{"error":{"code":"9999","message":"???"}}"#;
        let parsed = GlmErrorParser.parse(500, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::Transient);
    }
}
