use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use aigw_provider_core::{ErrorKind, ParsedError, SelectError};

/// Error surfaced to the client channel: an HTTP status plus the canonical
/// `{"type": "error", "error": {...}}` payload fields.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status} {kind}: {message}")]
pub struct GatewayError {
    pub status: u16,
    pub kind: &'static str,
    pub message: String,
}

impl GatewayError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            kind: "api_error",
            message: message.into(),
        }
    }

    pub fn model_not_found(model: &str) -> Self {
        Self {
            status: 404,
            kind: "not_found_error",
            message: format!("no provider serves model {model}"),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: 503,
            kind: "overloaded_error",
            message: message.into(),
        }
    }

    /// Preserve the original upstream status where one exists.
    pub fn from_parsed(parsed: &ParsedError) -> Self {
        let kind = match parsed.kind {
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::QuotaExceeded => "rate_limit_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::Overloaded => "overloaded_error",
            ErrorKind::Transient | ErrorKind::Unknown => "api_error",
        };
        Self {
            status: if parsed.status == 0 { 500 } else { parsed.status },
            kind,
            message: parsed.message.clone(),
        }
    }

    pub fn from_select(error: &SelectError) -> Self {
        match error {
            SelectError::NoAccounts(provider) => Self {
                status: 503,
                kind: "overloaded_error",
                message: format!("no accounts for provider {provider}"),
            },
            SelectError::AllBlocked { wait_until } => Self {
                status: 429,
                kind: "rate_limit_error",
                message: match wait_until {
                    Some(until) => format!("all accounts cooling down until {}", fmt_time(*until)),
                    None => "all accounts cooling down".to_string(),
                },
            },
            SelectError::AllExhausted { reset_at, count } => Self {
                status: 429,
                kind: "rate_limit_error",
                message: match reset_at {
                    Some(reset) => format!(
                        "{count} accounts quota-exhausted, earliest reset {}",
                        fmt_time(*reset)
                    ),
                    None => format!("{count} accounts quota-exhausted"),
                },
            },
        }
    }
}

fn fmt_time(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
