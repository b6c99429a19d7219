use aigw_provider_core::{
    DefaultErrorParser, ErrorKind, ErrorParser, Headers, ParsedError, retry_after,
};

/// Gemini-wire error bodies look like
/// `{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": ...}}`.
/// Daily-quota exhaustion and per-minute rate limits share the 429 code and
/// are told apart by status/message.
pub struct GeminiErrorParser;

impl ErrorParser for GeminiErrorParser {
    fn parse(&self, status: u16, headers: &Headers, body: &[u8]) -> ParsedError {
        let value = serde_json::from_slice::<serde_json::Value>(body).unwrap_or_default();
        let error = value.get("error");
        let rpc_status = error
            .and_then(|error| error.get("status"))
            .and_then(|status| status.as_str())
            .unwrap_or("");
        let message = error
            .and_then(|error| error.get("message"))
            .and_then(|message| message.as_str())
            .unwrap_or("")
            .to_string();

        match status {
            429 => {
                let lowered = message.to_ascii_lowercase();
                let daily_quota = rpc_status == "RESOURCE_EXHAUSTED"
                    && (lowered.contains("quota") || lowered.contains("limit: 0"));
                if daily_quota {
                    return ParsedError::new(ErrorKind::QuotaExceeded, status, message);
                }
                let parsed = ParsedError::new(ErrorKind::RateLimit, status, message);
                match retry_after(headers) {
                    Some(wait) => parsed.with_cooldown(wait),
                    None => parsed,
                }
            }
            401 => ParsedError::new(ErrorKind::Authentication, status, message),
            403 if rpc_status == "PERMISSION_DENIED" => {
                ParsedError::new(ErrorKind::Permission, status, message)
            }
            404 => ParsedError::new(ErrorKind::NotFound, status, message),
            503 => ParsedError::new(ErrorKind::Overloaded, status, message),
            _ => DefaultErrorParser.parse(status, headers, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_quota_is_quota_exceeded() {
        let body = br#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded for metric generate_requests_per_day"}}"#;
        let parsed = GeminiErrorParser.parse(429, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::QuotaExceeded);
        assert!(parsed.cooldown >= std::time::Duration::from_secs(60));
    }

    #[test]
    fn plain_429_is_a_rate_limit() {
        let body = br#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Resource has been exhausted (e.g. check rate)"}}"#;
        let parsed = GeminiErrorParser.parse(429, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn permission_denied_maps_to_permission() {
        let body = br#"{"error":{"code":403,"status":"PERMISSION_DENIED","message":"no access"}}"#;
        let parsed = GeminiErrorParser.parse(403, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::Permission);
        assert!(!parsed.retryable);
    }

    #[test]
    fn overloaded_backend_gets_short_cooldown() {
        let body = br#"{"error":{"code":503,"status":"UNAVAILABLE","message":"try later"}}"#;
        let parsed = GeminiErrorParser.parse(503, &Vec::new(), body);
        assert_eq!(parsed.kind, ErrorKind::Overloaded);
        assert!(parsed.retryable);
    }
}
