use thiserror::Error;

/// Top-level client error. Variants are grouped by where the failure originates so callers can
/// decide between redirecting to login, showing a transient notice, or rejecting input.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Authentication errors ────────────────────────────────────────────────
    #[error("Not authorized; please log in again")]
    Unauthorized,

    #[error("No authentication token found")]
    NoToken,

    // ── Network / transport errors ───────────────────────────────────────────
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Event stream error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Timed out after {seconds}s while {action}")]
    Timeout { action: String, seconds: u64 },

    #[error("Real-time connection is not established")]
    NotConnected,

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Invalid conversation ID '{id}'")]
    InvalidConversationId { id: String },

    // ── Domain errors ────────────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },

    #[error("Server returned a conversation without an id")]
    MissingConversationId,

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Credential store error: {message}")]
    Credentials {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid configuration for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        AppError::Decode { what: what.into(), source }
    }

    pub fn credentials(message: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Credentials { message: message.into(), source: Some(source) }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        AppError::Rejected { status, message: message.into() }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Unauthorized | AppError::NoToken)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::ConversationNotFound { .. } => true,
            AppError::Rejected { status, .. } => *status == 404,
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::InvalidConversationId { .. })
    }

    /// Errors worth retrying by hand: dropped connections, timeouts and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AppError::Stream(_) | AppError::Timeout { .. } | AppError::NotConnected => true,
            AppError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_groups() {
        assert!(AppError::Unauthorized.is_auth());
        assert!(AppError::NoToken.is_auth());
        assert!(!AppError::NotConnected.is_auth());

        assert!(AppError::EmptyField { field_name: "title".into() }.is_validation());
        assert!(AppError::InvalidConversationId { id: "null".into() }.is_validation());

        assert!(AppError::ConversationNotFound { id: "abc".into() }.is_not_found());
        assert!(AppError::rejected(404, "gone").is_not_found());
        assert!(!AppError::rejected(400, "bad").is_not_found());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(AppError::rejected(503, "down").is_transient());
        assert!(!AppError::rejected(422, "bad input").is_transient());
        assert!(AppError::NotConnected.is_transient());
        assert!(!AppError::MissingConversationId.is_transient());
    }

    #[test]
    fn messages_carry_context() {
        let err = AppError::InvalidConversationId { id: "undefined".into() };
        assert_eq!(err.to_string(), "Invalid conversation ID 'undefined'");

        let err = AppError::rejected(500, "boom");
        assert_eq!(err.to_string(), "Request rejected (500): boom");
    }
}
