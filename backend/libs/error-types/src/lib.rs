//! Shared error response body for the marketplace backend.
//!
//! Every HTTP surface renders failures with [`ErrorResponse`] so clients can
//! route on `error_type` and localize on `code` without parsing messages.

use serde::{Deserialize, Serialize};

/// Unified API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Reason phrase of the HTTP status ("Not Found", "Conflict", ...)
    pub error: String,

    /// Human readable message
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse error class, one of [`error_types`]
    pub error_type: String,

    /// Stable machine code, one of [`error_codes`]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339 timestamp
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

/// Stable error codes shared by REST and realtime surfaces.
pub mod error_codes {
    // Authentication
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";

    // Chat
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const CHAT_NOT_FOUND: &str = "CHAT_NOT_FOUND";
    pub const CHAT_CLOSED: &str = "CHAT_CLOSED";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";

    // Moderation
    pub const VIOLATION_NOT_FOUND: &str = "VIOLATION_NOT_FOUND";
    pub const INVALID_STATE: &str = "INVALID_STATE";
    pub const RULES_INVALID: &str = "RULES_INVALID";

    // Generic
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    /// Realtime counterpart of `INTERNAL_SERVER_ERROR`
    pub const INTERNAL: &str = "INTERNAL";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Coarse error classes.
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

/// Reason phrase for the status codes the backend emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        503 => "Service Unavailable",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Conflict",
            "violation is not pending",
            409,
            error_types::CONFLICT_ERROR,
            error_codes::INVALID_STATE,
        );

        assert_eq!(error.status, 409);
        assert_eq!(error.error_type, error_types::CONFLICT_ERROR);
        assert_eq!(error.code, error_codes::INVALID_STATE);
        assert!(error.details.is_none());
    }

    #[test]
    fn test_optional_fields_skipped() {
        let error = ErrorResponse::new(
            "Not Found",
            "chat not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::CHAT_NOT_FOUND,
        );
        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("trace_id").is_none());

        let with_trace = error.with_trace_id("abc".to_string());
        assert_eq!(with_trace.trace_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(409), "Conflict");
        assert_eq!(reason_phrase(418), "Error");
    }
}
