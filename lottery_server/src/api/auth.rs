//! Authentication API handlers.
//!
//! The access token travels in the JSON body and is sent back as a bearer
//! token. The refresh token never appears in a body; it lives in the
//! `refreshToken` cookie (HttpOnly, SameSite=None, Path=/), which is rotated
//! on every refresh and expired on logout.
//!
//! # Examples
//!
//! Login:
//! ```bash
//! curl -i -X POST http://localhost:8080/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "member1", "password": "Pass1234", "device_label": "laptop"}'
//! ```
//!
//! Refresh:
//! ```bash
//! curl -i -X POST http://localhost:8080/api/v1/auth/refresh \
//!   -H "Cookie: refreshToken=<value from Set-Cookie>"
//! ```

use axum::{
    Json,
    extract::{Extension, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::COOKIE, header::SET_COOKIE},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite, time::OffsetDateTime};
use lottery::auth::{
    AccessClaims, AccountId, AuthError, LoginRequest, RegisterRequest, Role, SessionTokens,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{AppState, client::ClientContext, error::ApiError};
use crate::{logging::log_security_event, metrics};

/// Name of the refresh token cookie
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
    pub device_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub account_id: AccountId,
    pub username: String,
    pub roles: BTreeSet<Role>,
}

/// Body of login and refresh responses
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    pub account_id: AccountId,
    pub roles: BTreeSet<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub account_id: AccountId,
    pub roles: BTreeSet<Role>,
    pub issuer: String,
    pub audience: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Refresh token value from the request's `Cookie` headers
pub fn refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|part| Cookie::parse(part.trim().to_string()).ok())
        .find(|cookie| cookie.name() == REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::from_unix_timestamp(at.timestamp()).map_err(|e| {
        ApiError::from(AuthError::Configuration(format!(
            "cookie expiry out of range: {e}"
        )))
    })
}

fn header_value(cookie: Cookie<'_>) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| ApiError::from(AuthError::Configuration(format!("bad cookie header: {e}"))))
}

fn set_refresh_cookie(
    value: &str,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Result<HeaderValue, ApiError> {
    let cookie = Cookie::build((REFRESH_COOKIE, value.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::None)
        .path("/")
        .expires(to_offset(expires_at)?)
        .build();
    header_value(cookie)
}

fn clear_refresh_cookie(secure: bool) -> Result<HeaderValue, ApiError> {
    let cookie = Cookie::build((REFRESH_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::None)
        .path("/")
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build();
    header_value(cookie)
}

type TokenReply = ([(HeaderName, HeaderValue); 1], Json<TokenResponse>);

fn token_response(state: &AppState, tokens: SessionTokens) -> Result<TokenReply, ApiError> {
    let cookie = set_refresh_cookie(
        &tokens.refresh.token,
        tokens.refresh.expires_at,
        state.cookie_secure,
    )?;
    let body = TokenResponse {
        access_token: tokens.access.token,
        token_type: "Bearer".to_string(),
        expires_in: state.sessions.config().access_token_lifetime.num_seconds(),
        account_id: tokens.account_id,
        roles: tokens.roles,
    };

    Ok(([(SET_COOKIE, cookie)], Json(body)))
}

/// Register a new member account.
///
/// # Response
///
/// `201 Created` with `{account_id, username, roles}`. No session is started;
/// the client logs in separately so that the login names its device.
///
/// # Errors
///
/// - `400 Bad Request`: Invalid username or weak password
/// - `409 Conflict`: Username already taken
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .sessions
        .register(RegisterRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            account_id: account.id,
            username: account.username,
            roles: account.roles,
        }),
    ))
}

/// Authenticate and start a session on the caller's device.
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid credentials or inactive account
/// - `409 Conflict` (`too_many_devices`): The account is at its device cap
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    Json(payload): Json<LoginPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let username = payload.username.clone();
    let result = state
        .sessions
        .login(
            LoginRequest {
                username: payload.username,
                password: payload.password,
                device_label: payload.device_label,
            },
            client.info(),
        )
        .await;

    metrics::login_attempts_total(result.is_ok());
    let (_, device, tokens) = match result {
        Ok(session) => session,
        Err(err) => {
            match &err {
                // Login failures do not reveal whether the account exists
                AuthError::InvalidCredentials => log_security_event(
                    "failed_login",
                    None,
                    client.ip(),
                    &format!("Invalid credentials for '{username}'"),
                ),
                AuthError::TooManyDevices { limit } => {
                    metrics::device_limit_rejections_total();
                    tracing::info!(username = %username, limit = *limit, "Login rejected by device cap");
                }
                _ => {}
            }
            return Err(err.into());
        }
    };

    tracing::info!(
        account_id = tokens.account_id,
        device_id = device.id,
        "Login succeeded"
    );
    token_response(&state, tokens)
}

/// Rotate the refresh cookie and mint a new access token.
///
/// # Errors
///
/// - `401 Unauthorized`: Missing, unknown, revoked or expired refresh token,
///   or a concurrent refresh already consumed it
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let Some(presented) = refresh_cookie(&headers) else {
        metrics::token_refresh_total(false);
        return Err(AuthError::InvalidRefreshToken.into());
    };

    match state.sessions.refresh(&presented, client.info()).await {
        Ok(tokens) => {
            metrics::token_refresh_total(true);
            token_response(&state, tokens)
        }
        Err(err) => {
            metrics::token_refresh_total(false);
            if matches!(err, AuthError::InvalidRefreshToken) {
                let account_id = state
                    .sessions
                    .credentials()
                    .owner_of(&presented)
                    .await
                    .unwrap_or_default();
                log_security_event(
                    "refresh_rejected",
                    account_id,
                    client.ip(),
                    "Refresh token rejected",
                );
            }
            Err(err.into())
        }
    }
}

/// End the session of the device holding the refresh cookie.
///
/// Always answers `204 No Content` with an expired cookie, including when no
/// cookie was sent or the session was already gone.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
    client: ClientContext,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = claims.account_id()?;
    let presented = refresh_cookie(&headers);

    state
        .sessions
        .logout(account_id, presented.as_deref(), client.info())
        .await?;

    let cookie = clear_refresh_cookie(state.cookie_secure)?;
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]))
}

/// Claims of the caller's access token.
pub async fn me(Extension(claims): Extension<AccessClaims>) -> Result<Json<MeResponse>, ApiError> {
    Ok(Json(MeResponse {
        account_id: claims.account_id()?,
        roles: claims.roles,
        issuer: claims.iss,
        audience: claims.aud,
        issued_at: claims.iat,
        expires_at: claims.exp,
    }))
}
