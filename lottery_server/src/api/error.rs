//! Mapping of session errors onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lottery::auth::{AuthError, AuthErrorKind};
use serde::Serialize;

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable code
    pub code: &'static str,
}

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    /// Authenticated but lacking the required role
    Forbidden,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Auth(err) => match err.kind() {
                AuthErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                AuthErrorKind::Capacity => StatusCode::CONFLICT,
                AuthErrorKind::NotFound => StatusCode::NOT_FOUND,
                AuthErrorKind::Conflict => StatusCode::CONFLICT,
                AuthErrorKind::Invalid => StatusCode::BAD_REQUEST,
                AuthErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Forbidden => "forbidden",
            ApiError::Auth(err) => match err {
                AuthError::TooManyDevices { .. } => "too_many_devices",
                AuthError::UsernameTaken => "username_taken",
                AuthError::InvalidUsername(_) | AuthError::WeakPassword(_) => "invalid_input",
                _ => match err.kind() {
                    AuthErrorKind::Unauthorized => "unauthorized",
                    AuthErrorKind::NotFound => "not_found",
                    AuthErrorKind::Capacity | AuthErrorKind::Conflict => "conflict",
                    AuthErrorKind::Invalid => "invalid_input",
                    AuthErrorKind::Internal => "internal",
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            ApiError::Forbidden => "Forbidden".to_string(),
            ApiError::Auth(err) => {
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "Request failed");
                }
                err.client_message()
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: self.code(),
            }),
        )
            .into_response()
    }
}
