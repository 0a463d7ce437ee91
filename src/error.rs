//! Error values surfaced by session operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categories of authentication errors for consistent handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// Caller-supplied input was empty or malformed; the provider was never
    /// contacted.
    InvalidInput,
    /// Failure reported by the identity provider (bad credentials, duplicate
    /// account, weak password, network failure, unauthorized).
    Provider,
    /// Requested capability is not wired to a real provider.
    NotImplemented,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorKind::InvalidInput => write!(f, "invalid_input"),
            AuthErrorKind::Provider => write!(f, "provider"),
            AuthErrorKind::NotImplemented => write!(f, "not_implemented"),
        }
    }
}

/// Structured error returned (never thrown) by every mutating operation.
///
/// Provider-originated messages pass through verbatim so UI layers can render
/// them inline; the session manager does not reword them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthError {
    /// Error category
    pub kind: AuthErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl AuthError {
    /// Creates a new auth error.
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a validation error for caller-supplied input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::InvalidInput, message)
    }

    /// Creates a provider error with the provider's own wording.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Provider, message)
    }

    /// Creates an error for a capability with no wired implementation.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::NotImplemented, message)
    }

    /// Creates a provider error from an HTTP status response, lifting the
    /// service's own message out of the body when it has one.
    ///
    /// Identity Toolkit-style bodies look like
    /// `{"error": {"code": 400, "message": "EMAIL_EXISTS"}}`.
    pub fn http_status(status: u16, body: &str) -> Self {
        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(error_obj) = json.get("error")
            && let Some(msg) = error_obj.get("message").and_then(|v| v.as_str())
        {
            return Self {
                kind: AuthErrorKind::Provider,
                message: msg.to_string(),
                details: Some(body.to_string()),
            };
        }
        Self {
            kind: AuthErrorKind::Provider,
            message: format!("HTTP {}", status),
            details: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: service error message is lifted out of the JSON body verbatim.
    #[test]
    fn test_http_status_extracts_service_message() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_EXISTS","errors":[]}}"#;
        let err = AuthError::http_status(400, body);
        assert_eq!(err.kind, AuthErrorKind::Provider);
        assert_eq!(err.message, "EMAIL_EXISTS");
        assert_eq!(err.details.as_deref(), Some(body));
    }

    /// Test: non-JSON bodies fall back to the status line.
    #[test]
    fn test_http_status_fallback() {
        let err = AuthError::http_status(502, "bad gateway");
        assert_eq!(err.message, "HTTP 502");
        assert_eq!(err.details.as_deref(), Some("bad gateway"));

        let empty = AuthError::http_status(500, "");
        assert_eq!(empty.message, "HTTP 500");
        assert!(empty.details.is_none());
    }

    /// Test: display shows the message only.
    #[test]
    fn test_display_is_message() {
        let err = AuthError::invalid_input("email must not be empty");
        assert_eq!(err.to_string(), "email must not be empty");
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);
    }
}
