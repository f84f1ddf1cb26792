use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not a participant of this chat")]
    Forbidden,

    #[error("chat is {status}")]
    ChatClosed { status: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row".into()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::StartServer(format!("migrations: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {e}"))
    }
}

impl AppError {
    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Auth(_) => true,
            AppError::Database(msg) => {
                msg.contains("PoolTimedOut") || msg.contains("PoolClosed") || msg.contains("Io")
            }
            AppError::Internal(_) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Auth(_) => 401,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::ChatClosed { .. } | AppError::InvalidState(_) => 409,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// Stable code shared by REST bodies and realtime `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => error_codes::BAD_REQUEST,
            AppError::Auth(_) => error_codes::UNAUTHENTICATED,
            AppError::Forbidden => error_codes::FORBIDDEN,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::ChatClosed { .. } => error_codes::CHAT_CLOSED,
            AppError::InvalidState(_) => error_codes::INVALID_STATE,
            AppError::Database(_) => error_codes::DATABASE_ERROR,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
                error_codes::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => kinds::VALIDATION_ERROR,
            AppError::Auth(_) => kinds::AUTHENTICATION_ERROR,
            AppError::Forbidden => kinds::AUTHORIZATION_ERROR,
            AppError::NotFound(_) => kinds::NOT_FOUND_ERROR,
            AppError::ChatClosed { .. } | AppError::InvalidState(_) => kinds::CONFLICT_ERROR,
            _ => kinds::SERVER_ERROR,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let status = self.status_code();
        // internals stay in the logs
        let message = match self {
            AppError::Database(_) | AppError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorResponse::new(
            error_types::reason_phrase(status),
            &message,
            status,
            self.error_type(),
            self.code(),
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if AppError::status_code(self) >= 500 {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(ResponseError::status_code(self)).json(self.to_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Auth("expired".into()).status_code(), 401);
        assert_eq!(AppError::Forbidden.status_code(), 403);
        assert_eq!(
            AppError::ChatClosed {
                status: "blocked".into()
            }
            .status_code(),
            409
        );
        assert_eq!(AppError::InvalidState("resolved".into()).status_code(), 409);
        assert_eq!(AppError::Database("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_codes_for_realtime_errors() {
        assert_eq!(AppError::Forbidden.code(), "FORBIDDEN");
        assert_eq!(
            AppError::ChatClosed {
                status: "closed".into()
            }
            .code(),
            "CHAT_CLOSED"
        );
        assert_eq!(AppError::Auth("bad".into()).code(), "UNAUTHENTICATED");
    }

    #[test]
    fn test_internal_details_hidden() {
        let body = AppError::Database("password=hunter2".into()).to_response();
        assert_eq!(body.message, "internal server error");
        assert_eq!(body.code, "DATABASE_ERROR");
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::Auth("expired".into()).is_retryable());
        assert!(AppError::Database("PoolTimedOut".into()).is_retryable());
        assert!(!AppError::Forbidden.is_retryable());
    }
}
