use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    crypto::token::TokenError,
    repositories::{session::StoreError, user::DirectoryError},
    services::auth::AuthError,
};

/// Message returned for every rejected login.
pub const INVALID_CREDENTIALS: &str = "invalid username or password";
/// Message returned for every rejected refresh.
pub const INVALID_REFRESH_TOKEN: &str = "invalid or revoked refresh token, please log in again";

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing, malformed, expired or forged credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness or consistency conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials(reason) => {
                tracing::warn!("Login rejected: {:?}", reason);
                AppError::Unauthorized(INVALID_CREDENTIALS.to_string())
            }
            AuthError::PasswordMismatch => AppError::Conflict(error.to_string()),
            AuthError::Token(TokenError::Encoding(msg)) => {
                AppError::Internal(format!("token encoding: {}", msg))
            }
            AuthError::Token(_)
            | AuthError::SessionNotFound
            | AuthError::RefreshTokenMismatch
            | AuthError::UserNotFound => {
                tracing::warn!("Refresh rejected: {}", error);
                AppError::Unauthorized(INVALID_REFRESH_TOKEN.to_string())
            }
            AuthError::Store(StoreError::ConstraintViolation(msg)) => AppError::Conflict(msg),
            AuthError::Store(e) => AppError::Internal(format!("session store: {}", e)),
            AuthError::Directory(DirectoryError::Conflict(msg)) => AppError::Conflict(msg),
            AuthError::Directory(e) => AppError::Internal(format!("user directory: {}", e)),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized: {}", msg);
                msg
            }

            AppError::NotFound(msg) => {
                tracing::debug!("Resource not found: {}", msg);
                msg
            }

            AppError::Conflict(msg) => {
                tracing::debug!("Conflict: {}", msg);
                msg
            }

            AppError::Validation(msg) => {
                tracing::debug!("Validation error: {}", msg);
                msg
            }

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "status": status.as_u16(),
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"status":500,"error":"Internal server error"}"#.to_string());

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
