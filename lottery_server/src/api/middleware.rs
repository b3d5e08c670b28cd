//! Authentication middleware for protected endpoints.
//!
//! The middleware extracts and validates the access token from the
//! Authorization header, then injects its [`AccessClaims`] into request
//! extensions for downstream handlers.
//!
//! # Extracting Claims
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use lottery::auth::AccessClaims;
//!
//! async fn protected_handler(Extension(claims): Extension<AccessClaims>) -> String {
//!     format!("Authenticated as account {}", claims.sub)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use lottery::auth::{AccessClaims, AuthError, Role};

use super::{AppState, error::ApiError};

/// Bearer token from the `Authorization` header, if well formed
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware that validates access tokens and injects claims.
///
/// # Behavior
///
/// - **Success**: Token valid → Injects `AccessClaims` into request extensions → Calls next handler
/// - **Missing header or invalid format**: Returns `401 Unauthorized`
/// - **Invalid/expired token**: Returns `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(AuthError::InvalidAccessToken)?;
    let claims = state.sessions.verify_access_token(token)?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Rejects callers without the admin role; runs after [`auth_middleware`]
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<AccessClaims>()
        .is_some_and(|claims| claims.has_role(Role::Admin));

    if !is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(request).await)
}
