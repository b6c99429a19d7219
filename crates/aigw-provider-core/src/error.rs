use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::headers::{Headers, header_get};

/// Classified upstream failure. Kinds drive the account state machine; they
/// are never re-thrown as opaque strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    QuotaExceeded,
    Authentication,
    Permission,
    NotFound,
    Overloaded,
    Transient,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    pub retryable: bool,
    pub cooldown: Duration,
}

pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30);
pub const QUOTA_COOLDOWN: Duration = Duration::from_secs(30 * 60);
pub const AUTH_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);
pub const SHORT_COOLDOWN: Duration = Duration::from_secs(10);

impl ParsedError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        let (retryable, cooldown) = match kind {
            ErrorKind::RateLimit => (true, RATE_LIMIT_COOLDOWN),
            ErrorKind::QuotaExceeded => (true, QUOTA_COOLDOWN),
            ErrorKind::Authentication | ErrorKind::Permission => (false, AUTH_COOLDOWN),
            ErrorKind::NotFound => (false, AUTH_COOLDOWN),
            ErrorKind::Overloaded | ErrorKind::Transient | ErrorKind::Unknown => {
                (true, SHORT_COOLDOWN)
            }
        };
        Self {
            kind,
            status,
            message: message.into(),
            retryable,
            cooldown,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Per-provider interpretation of non-2xx responses.
pub trait ErrorParser: Send + Sync {
    fn parse(&self, status: u16, headers: &Headers, body: &[u8]) -> ParsedError;
}

/// Honour `Retry-After` as delta-seconds or an HTTP-date.
pub fn retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}

fn body_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for path in [&["error", "message"][..], &["message"][..]] {
            let mut cursor = &value;
            let mut found = true;
            for key in path {
                match cursor.get(key) {
                    Some(next) => cursor = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found && let Some(text) = cursor.as_str() {
                return text.to_string();
            }
        }
    }
    String::from_utf8_lossy(&body[..body.len().min(512)]).to_string()
}

/// Fallback classifier used when a provider registers no parser of its own.
/// Fails open: anything unrecognised is `Unknown` with a short retryable
/// cooldown.
pub struct DefaultErrorParser;

impl ErrorParser for DefaultErrorParser {
    fn parse(&self, status: u16, headers: &Headers, body: &[u8]) -> ParsedError {
        let message = body_message(body);
        match status {
            401 => ParsedError::new(ErrorKind::Authentication, status, message),
            403 => ParsedError::new(ErrorKind::Permission, status, message),
            404 => ParsedError::new(ErrorKind::NotFound, status, message),
            429 => {
                let parsed = ParsedError::new(ErrorKind::RateLimit, status, message);
                match retry_after(headers) {
                    Some(wait) => parsed.with_cooldown(wait),
                    None => parsed,
                }
            }
            529 => ParsedError::new(ErrorKind::Overloaded, status, message),
            500..=599 => ParsedError::new(ErrorKind::Transient, status, message),
            _ => ParsedError::new(ErrorKind::Unknown, status, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds_override_the_default() {
        let headers = vec![("Retry-After".to_string(), "7".to_string())];
        let parsed = DefaultErrorParser.parse(429, &headers, b"{}");
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
        assert_eq!(parsed.cooldown, Duration::from_secs(7));
        assert!(parsed.retryable);
    }

    #[test]
    fn auth_statuses_are_not_retryable() {
        let parsed = DefaultErrorParser.parse(401, &Vec::new(), b"denied");
        assert_eq!(parsed.kind, ErrorKind::Authentication);
        assert!(!parsed.retryable);

        let parsed = DefaultErrorParser.parse(403, &Vec::new(), b"");
        assert_eq!(parsed.kind, ErrorKind::Permission);
    }

    #[test]
    fn unknown_bodies_fail_open() {
        let parsed = DefaultErrorParser.parse(418, &Vec::new(), b"\x00\x01");
        assert_eq!(parsed.kind, ErrorKind::Unknown);
        assert!(parsed.retryable);
        assert_eq!(parsed.cooldown, SHORT_COOLDOWN);
    }

    #[test]
    fn error_message_is_extracted_from_json() {
        let parsed = DefaultErrorParser.parse(
            500,
            &Vec::new(),
            br#"{"error":{"message":"backend exploded"}}"#,
        );
        assert_eq!(parsed.message, "backend exploded");
        assert_eq!(parsed.kind, ErrorKind::Transient);
    }

    #[test]
    fn overloaded_status_is_distinguished() {
        let parsed = DefaultErrorParser.parse(529, &Vec::new(), b"overloaded");
        assert_eq!(parsed.kind, ErrorKind::Overloaded);
    }
}
