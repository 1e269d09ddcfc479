use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::token::ScopeType;

/// Issuance input problems. Always raised before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown scope type '{0}'")]
    UnknownScopeType(String),

    #[error("scope type '{0}' requires a scope entity id")]
    MissingScopeEntity(ScopeType),

    #[error("scope type '{0}' does not take a scope entity id")]
    UnexpectedScopeEntity(ScopeType),

    #[error("expires_at must be in the future")]
    ExpiryNotInFuture,

    #[error("expires_at exceeds the maximum token lifetime of {max_days} days")]
    LifetimeTooLong { max_days: i64 },

    #[error("max_uses must be at least 1")]
    InvalidMaxUses,

    #[error("max_uses must not exceed {max}")]
    MaxUsesTooLarge { max: u32 },

    #[error("{0} must not be blank")]
    BlankField(&'static str),

    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),

    #[error("allowed resource types must not be blank")]
    BlankResourceType,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("access token not found")]
    NotFound,

    #[error("access token already revoked")]
    AlreadyRevoked,

    /// Every reason a presented secret is refused collapses into this.
    #[error("invalid or expired token")]
    AuthenticationFailure,

    #[error("token scope does not cover the requested resource")]
    ScopeDenied,

    #[error("token store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AccessError {
    /// Only transient storage failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::StoreUnavailable(_))
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AccessError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                e.to_string(),
            ),
            AccessError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "token_not_found",
                "access token not found".to_string(),
            ),
            AccessError::AlreadyRevoked => (
                StatusCode::CONFLICT,
                "conflict_error",
                "token_already_revoked",
                "access token already revoked".to_string(),
            ),
            AccessError::AuthenticationFailure => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                "invalid or expired token".to_string(),
            ),
            AccessError::ScopeDenied => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "scope_denied",
                "token scope does not cover the requested resource".to_string(),
            ),
            AccessError::StoreUnavailable(e) => {
                tracing::error!("Token store error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable_error",
                    "store_unavailable",
                    "service temporarily unavailable".to_string(),
                )
            }
            AccessError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if self.is_retryable() {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("5"),
            );
        }

        response
    }
}
