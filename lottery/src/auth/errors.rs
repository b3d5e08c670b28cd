//! Authentication error types.

use crate::db::timeouts::TimeoutError;
use std::time::Duration;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database operation exceeded its deadline
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Unknown username, wrong password, or inactive account
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Refresh token unknown, revoked, or expired
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Access token failed signature, audience, issuer, or expiry checks
    #[error("Invalid access token")]
    InvalidAccessToken,

    /// Access token is missing a required claim
    #[error("Access token is missing claim: {0}")]
    MissingClaim(&'static str),

    /// Account reached its device cap
    #[error("Too many active devices (limit {limit})")]
    TooManyDevices { limit: usize },

    /// Account not found
    #[error("Account not found")]
    AccountNotFound,

    /// Device not found
    #[error("Device not found")]
    DeviceNotFound,

    /// Username already exists
    #[error("Username already exists")]
    UsernameTaken,

    /// Invalid username format
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// JWT encoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Misconfigured signing key, lifetimes, or claims
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification used to pick a transport status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Caller must (re-)authenticate
    Unauthorized,
    /// Device cap reached; the caller should remove a device
    Capacity,
    /// Targeted account or device does not exist
    NotFound,
    /// Conflicts with existing state (duplicate username)
    Conflict,
    /// Malformed or unacceptable input
    Invalid,
    /// Server-side failure
    Internal,
}

impl AuthError {
    /// Classify this error
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::InvalidAccessToken
            | AuthError::MissingClaim(_) => AuthErrorKind::Unauthorized,
            AuthError::TooManyDevices { .. } => AuthErrorKind::Capacity,
            AuthError::AccountNotFound | AuthError::DeviceNotFound => AuthErrorKind::NotFound,
            AuthError::UsernameTaken => AuthErrorKind::Conflict,
            AuthError::InvalidUsername(_) | AuthError::WeakPassword(_) => AuthErrorKind::Invalid,
            AuthError::Database(_)
            | AuthError::Timeout(_)
            | AuthError::HashingFailed
            | AuthError::Jwt(_)
            | AuthError::Configuration(_) => AuthErrorKind::Internal,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database, JWT and configuration errors are sanitized to prevent
    /// information disclosure about the internal system structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Database(_) | AuthError::Timeout(_) | AuthError::Configuration(_) => {
                "Internal server error".to_string()
            }
            AuthError::Jwt(_) | AuthError::MissingClaim(_) => "Authentication failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<TimeoutError> for AuthError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(after) => AuthError::Timeout(after),
            TimeoutError::Database(e) => AuthError::Database(e),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
