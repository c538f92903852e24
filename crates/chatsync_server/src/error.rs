//! Error types for the chat server.

use chatsync_core::CoreError;
use chatsync_protocol::CursorError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// One failed check of a request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Offending field, in wire naming.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur in the chat server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A cursor could not be decoded.
    #[error("malformed cursor: {0}")]
    MalformedCursor(String),

    /// The resource does not exist or the requester may not see it.
    ///
    /// Never carries detail, so a non-member cannot tell a hidden
    /// conversation from a missing one.
    #[error("resource not found")]
    NotFound,

    /// One or more request fields are invalid.
    #[error("request validation failed")]
    Validation(Vec<FieldError>),

    /// The write conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No valid identity was presented.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The requester is a member but lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No request slot became free in time.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A configuration value is invalid.
    #[error("invalid configuration {key}: {message}")]
    InvalidConfig {
        /// Environment key or setting name.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// The store rejected an operation.
    #[error("database error: {0}")]
    Database(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a validation error for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::MalformedCursor(_) | ServerError::Validation(_) => 400,
            ServerError::Unauthenticated(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound => 404,
            ServerError::Conflict(_) => 409,
            ServerError::Unavailable(_) => 503,
            ServerError::InvalidConfig { .. }
            | ServerError::Database(_)
            | ServerError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::MalformedCursor(_) => "MALFORMED_CURSOR",
            ServerError::NotFound => "NOT_FOUND",
            ServerError::Validation(_) => "VALIDATION_FAILED",
            ServerError::Conflict(_) => "CONFLICT",
            ServerError::Unauthenticated(_) => "UNAUTHENTICATED",
            ServerError::Forbidden(_) => "FORBIDDEN",
            ServerError::Unavailable(_) => "UNAVAILABLE",
            ServerError::InvalidConfig { .. } => "INVALID_CONFIG",
            ServerError::Database(_) => "DATABASE_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// JSON error body.
    ///
    /// Server errors are reported with a generic message; their detail
    /// only goes to the log.
    pub fn to_body(&self) -> Value {
        let status = self.status_code();
        let message = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let mut body = json!({
            "statusCode": status,
            "error": reason_phrase(status),
            "message": message,
            "errorCode": self.error_code(),
        });
        if let ServerError::Validation(errors) = self {
            body["errors"] = json!(errors);
        }
        body
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UniqueViolation { .. } => ServerError::Conflict(err.to_string()),
            CoreError::RowNotFound { .. } => ServerError::NotFound,
            other => ServerError::Database(other.to_string()),
        }
    }
}

impl From<CursorError> for ServerError {
    fn from(err: CursorError) -> Self {
        ServerError::MalformedCursor(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{EntityKind, RowId};

    #[test]
    fn error_classification() {
        assert!(ServerError::NotFound.is_client_error());
        assert!(ServerError::MalformedCursor("x".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::Conflict("dup".into()).is_server_error());
        assert_eq!(ServerError::Unavailable("busy".into()).status_code(), 503);
    }

    #[test]
    fn core_errors_map_by_kind() {
        let conflict: ServerError = CoreError::unique_violation(EntityKind::User, "username").into();
        assert_eq!(conflict.status_code(), 409);

        let missing: ServerError = CoreError::row_not_found(EntityKind::Message, RowId::new(1)).into();
        assert!(matches!(missing, ServerError::NotFound));

        let other: ServerError = CoreError::invalid_operation("nope").into();
        assert_eq!(other.error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn validation_body_lists_every_field() {
        let err = ServerError::Validation(vec![
            FieldError::new("title", "too short"),
            FieldError::new("limit", "must be a number"),
        ]);
        let body = err.to_body();
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["errorCode"], "VALIDATION_FAILED");
        assert_eq!(body["errors"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn server_error_body_hides_detail() {
        let body = ServerError::Database("table exploded".into()).to_body();
        assert_eq!(body["message"], "internal server error");
        assert!(body.get("errors").is_none());
    }
}
