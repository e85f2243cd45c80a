use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    AuthenticationFailed,
    SendFailed,
    InvalidMessage,
    RateLimited,
    ConversationNotFound,
    Unauthorized,
    ServerError,
    Unknown,
}

impl ErrorCode {
    /// Map a wire error code onto the taxonomy. Unrecognized codes collapse
    /// to `Unknown` rather than failing the event.
    pub fn from_wire(code: &str) -> Self {
        match code {
            "CONNECTION_FAILED" => ErrorCode::ConnectionFailed,
            "AUTHENTICATION_FAILED" => ErrorCode::AuthenticationFailed,
            "SEND_FAILED" => ErrorCode::SendFailed,
            "INVALID_MESSAGE" => ErrorCode::InvalidMessage,
            "RATE_LIMITED" => ErrorCode::RateLimited,
            "CONVERSATION_NOT_FOUND" => ErrorCode::ConversationNotFound,
            "UNAUTHORIZED" => ErrorCode::Unauthorized,
            "SERVER_ERROR" => ErrorCode::ServerError,
            _ => ErrorCode::Unknown,
        }
    }
}

/// The normalized error shape. Raw transport and protocol failures are
/// wrapped into this before they reach the store or a caller.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ChatError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ChatError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SendFailed, message)
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidMessage, message)
    }

    pub fn conversation_not_found() -> Self {
        Self::new(ErrorCode::ConversationNotFound, "No active conversation")
    }

    /// Normalize a protocol-level error event.
    pub fn from_wire(code: &str, message: &str) -> Self {
        Self::new(ErrorCode::from_wire(code), message)
    }

    /// Whether a retry can reasonably succeed without the caller changing
    /// anything (re-authenticating, editing the message, ...).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed | ErrorCode::SendFailed | ErrorCode::RateLimited
        )
    }

    /// Suggested delay before retry attempt `attempt` (0-based), or `None`
    /// when the error is not auto-retryable. Rate limiting gets a flat
    /// cooldown; the rest back off exponentially with a cap.
    pub fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.is_recoverable() {
            return None;
        }
        match self.code {
            ErrorCode::RateLimited => Some(Duration::from_secs(10)),
            _ => {
                let backoff = 500u64.saturating_mul(2u64.saturating_pow(attempt));
                Some(Duration::from_millis(backoff.min(30_000)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_codes_map_into_taxonomy() {
        assert_eq!(ErrorCode::from_wire("RATE_LIMITED"), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_wire("SERVER_ERROR"), ErrorCode::ServerError);
        assert_eq!(ErrorCode::from_wire("something-else"), ErrorCode::Unknown);
    }

    #[test]
    fn recoverability_classes() {
        assert!(ChatError::connection_failed("down").is_recoverable());
        assert!(ChatError::send_failed("nope").is_recoverable());
        assert!(ChatError::new(ErrorCode::RateLimited, "slow down").is_recoverable());
        assert!(!ChatError::new(ErrorCode::AuthenticationFailed, "expired").is_recoverable());
        assert!(!ChatError::new(ErrorCode::Unauthorized, "no").is_recoverable());
        assert!(!ChatError::new(ErrorCode::ServerError, "500").is_recoverable());
    }

    #[test]
    fn retry_delay_policy() {
        let rate = ChatError::new(ErrorCode::RateLimited, "slow down");
        assert_eq!(rate.retry_delay(0), Some(Duration::from_secs(10)));
        assert_eq!(rate.retry_delay(5), Some(Duration::from_secs(10)));

        let conn = ChatError::connection_failed("down");
        assert_eq!(conn.retry_delay(0), Some(Duration::from_millis(500)));
        assert_eq!(conn.retry_delay(1), Some(Duration::from_millis(1000)));
        // Bounded.
        assert_eq!(conn.retry_delay(20), Some(Duration::from_millis(30_000)));

        let auth = ChatError::new(ErrorCode::AuthenticationFailed, "expired");
        assert_eq!(auth.retry_delay(0), None);
    }
}
