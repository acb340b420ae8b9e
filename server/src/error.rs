//! Domain Error Types
//!
//! One taxonomy shared by every engine. `Conflict` and `Noop` are outcomes,
//! not errors, and live next to the operations that produce them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Field name to human readable reason, ordered by field.
pub type FieldErrors = BTreeMap<String, String>;

/// Errors surfaced by engines and persistence ports.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed validation.
    #[error("validation failed: {}", describe_fields(.0))]
    Validation(FieldErrors),

    /// Target does not exist (or is not visible to the actor).
    #[error("not found")]
    NotFound,

    /// Actor may not perform the operation.
    #[error("forbidden")]
    Forbidden,

    /// No authenticated actor.
    #[error("unauthorized")]
    Unauthorized,

    /// A pending or accepted friendship already links the pair.
    #[error("friendship already exists")]
    FriendshipExists,

    #[error("username already taken")]
    UsernameTaken,

    #[error("email already registered")]
    EmailTaken,

    /// The account already has a different identity linked for this provider.
    #[error("external account already linked")]
    ExternalAccountExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account disabled")]
    UserDisabled,

    #[error("reset token is invalid")]
    ResetTokenInvalid,

    #[error("reset token has expired")]
    ResetTokenExpired,

    /// `updated_at` was not RFC 3339 UTC with millisecond precision.
    #[error("updated_at must be RFC3339 UTC with milliseconds")]
    InvalidUpdatedAt,

    /// An optional collaborator (SMTP, push) is not configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Storage failure, wrapped with the operation that was running.
    #[error("storage error during {context}")]
    Storage {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Single-field validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), reason.into());
        Self::Validation(fields)
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::FriendshipExists => (StatusCode::CONFLICT, "FRIENDSHIP_EXISTS"),
            Self::UsernameTaken => (StatusCode::CONFLICT, "USERNAME_TAKEN"),
            Self::EmailTaken => (StatusCode::CONFLICT, "EMAIL_TAKEN"),
            Self::ExternalAccountExists => (StatusCode::CONFLICT, "EXTERNAL_ACCOUNT_EXISTS"),
            Self::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            Self::UserDisabled => (StatusCode::FORBIDDEN, "USER_DISABLED"),
            Self::ResetTokenInvalid => (StatusCode::BAD_REQUEST, "RESET_TOKEN_INVALID"),
            Self::ResetTokenExpired => (StatusCode::BAD_REQUEST, "RESET_TOKEN_EXPIRED"),
            Self::InvalidUpdatedAt => (StatusCode::BAD_REQUEST, "INVALID_UPDATED_AT"),
            Self::NotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED"),
            Self::Storage { .. } | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

fn describe_fields(fields: &FieldErrors) -> String {
    let mut out = String::new();
    for (i, (field, reason)) in fields.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{field}: {reason}");
    }
    out
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Per-field reasons for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Storage { context, source } => {
                tracing::error!(context = %context, error = %source, "Storage error");
                "Internal server error".to_string()
            }
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let fields = match self {
            Self::Validation(fields) => Some(fields),
            _ => None,
        };

        (
            status,
            Json(ErrorResponse {
                error: code,
                message,
                fields,
            }),
        )
            .into_response()
    }
}

impl From<validator::ValidationErrors> for DomainError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .filter_map(|(field, errs)| {
                errs.first().map(|e| {
                    let reason = e
                        .message
                        .as_ref()
                        .map_or_else(|| e.code.to_string(), ToString::to_string);
                    (field.to_string(), reason)
                })
            })
            .collect();
        Self::Validation(fields)
    }
}

/// Attaches an operation name to raw storage errors.
pub trait StorageContext<T> {
    fn storage(self, context: &'static str) -> DomainResult<T>;
}

impl<T> StorageContext<T> for Result<T, sqlx::Error> {
    fn storage(self, context: &'static str) -> DomainResult<T> {
        self.map_err(|source| DomainError::Storage { context, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_lists_fields_in_order() {
        let mut fields = FieldErrors::new();
        fields.insert("username".into(), "required".into());
        fields.insert("email".into(), "invalid".into());
        let err = DomainError::Validation(fields);
        assert_eq!(
            err.to_string(),
            "validation failed: email: invalid, username: required"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DomainError::validation("x", "y").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DomainError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DomainError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DomainError::FriendshipExists.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DomainError::Internal("boom".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_context_wraps_sqlx_error() {
        let raw: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = raw.storage("load user").unwrap_err();
        assert!(matches!(err, DomainError::Storage { context: "load user", .. }));
        assert_eq!(err.to_string(), "storage error during load user");
    }
}
