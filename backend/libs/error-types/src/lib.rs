use serde::{Deserialize, Serialize};

/// Unified API error response format (all services use this envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short error label (HTTP reason phrase or custom label)
    pub error: String,

    /// Human-readable message
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error family, used by clients for routing:
    /// "validation_error", "authentication_error", "authorization_error",
    /// "not_found_error", "conflict_error", "rate_limit_error",
    /// "server_error", "service_unavailable_error"
    pub error_type: String,

    /// Stable machine code, e.g. "MESSAGE_NOT_FOUND"
    pub code: String,

    /// Optional details (development environments only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request trace id for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Standard error codes, by concern.
pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";

    // Messaging
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const INVALID_PARTICIPANTS: &str = "INVALID_PARTICIPANTS";

    // Media
    pub const MEDIA_NOT_FOUND: &str = "MEDIA_NOT_FOUND";

    // System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const RATE_LIMIT_ERROR: &str = "RATE_LIMIT_EXCEEDED";
}

/// Standard error families.
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const RATE_LIMIT_ERROR: &str = "rate_limit_error";
    pub const SERVER_ERROR: &str = "server_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Not Found",
            "message not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::MESSAGE_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::MESSAGE_NOT_FOUND);
    }

    #[test]
    fn test_error_response_with_details() {
        let error = ErrorResponse::new(
            "Bad Request",
            "direct conversations need exactly one other member",
            400,
            error_types::VALIDATION_ERROR,
            error_codes::INVALID_PARTICIPANTS,
        )
        .with_details("got 3 member ids".to_string());

        assert!(error.details.is_some());
    }
}
