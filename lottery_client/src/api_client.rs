//! HTTP API client for the lottery session server.
//!
//! The client keeps the access token in memory and the refresh token as the
//! raw `refreshToken` cookie value. Protected calls that come back
//! `401 Unauthorized` trigger one shared refresh through the
//! [`RefreshCoordinator`] and are retried once with the new access token.

use chrono::{DateTime, Utc};
use cookie::Cookie;
use reqwest::{
    RequestBuilder, Response, StatusCode,
    header::{COOKIE, HeaderMap, SET_COOKIE},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::refresh::{RefreshCoordinator, RefreshError};

/// Name of the refresh token cookie set by the server
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Client error types
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not logged in")]
    NotLoggedIn,

    /// The refresh credential was rejected; stored credentials are cleared
    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Server rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The refresh did not complete
    ///
    /// Transport failures clear the stored credentials. An abandoned refresh
    /// leaves them in place so the next call can try again.
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Server response is missing the refresh cookie")]
    MissingRefreshCookie,
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<RefreshError> for ClientError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Failed(message) => ClientError::RefreshFailed(message),
            RefreshError::Abandoned => {
                ClientError::RefreshFailed(RefreshError::Abandoned.to_string())
            }
            RefreshError::Rejected(_) | RefreshError::NoCredential => ClientError::SessionExpired,
        }
    }
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
    device_label: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    account_id: i64,
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: Option<String>,
}

/// Account created by registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredAccount {
    pub account_id: i64,
    pub username: String,
    pub roles: Vec<String>,
}

/// Claims of the current access token as reported by the server
#[derive(Debug, Clone, Deserialize)]
pub struct Principal {
    pub account_id: i64,
    pub roles: Vec<String>,
    pub issuer: String,
    pub audience: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// One of the caller's devices
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub id: i64,
    pub label: String,
    pub user_agent: Option<String>,
    pub created_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub session_expires_at: Option<DateTime<Utc>>,
}

/// Credentials held between calls, persistable by the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub account_id: i64,
    pub roles: Vec<String>,
    pub access_token: String,
    pub refresh_token: String,
}

/// API client for communicating with the lottery server
///
/// Methods take `&self`; share one instance behind an `Arc` so that
/// concurrent requests share its refresh coordinator.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    session: Mutex<Option<StoredSession>>,
    refresh: RefreshCoordinator,
}

/// Refresh token value from `Set-Cookie` response headers
fn refresh_cookie_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| Cookie::parse(value.to_string()).ok())
        .find(|cookie| cookie.name() == REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Turn a non-success response into [`ClientError::Api`]
async fn api_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    match response.json::<ErrorBody>().await {
        Ok(body) => ClientError::Api {
            status,
            code: body.code,
            message: body.error,
        },
        Err(e) => ClientError::Api {
            status,
            code: None,
            message: format!("Failed to read error response: {e}"),
        },
    }
}

impl ApiClient {
    /// Create a new API client without credentials
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            session: Mutex::new(None),
            refresh: RefreshCoordinator::new(),
        }
    }

    /// Create a client that resumes a previously stored session
    pub fn with_session(base_url: impl Into<String>, session: StoredSession) -> Self {
        let client = Self::new(base_url);
        *client.lock_session() = Some(session);
        client
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<StoredSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the held credentials
    pub fn session(&self) -> Option<StoredSession> {
        self.lock_session().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock_session().is_some()
    }

    fn access_token(&self) -> Option<String> {
        self.lock_session().as_ref().map(|s| s.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.lock_session().as_ref().map(|s| s.refresh_token.clone())
    }

    /// Forget all credentials
    pub fn clear_session(&self) {
        *self.lock_session() = None;
    }

    async fn store_tokens(&self, response: Response) -> ClientResult<StoredSession> {
        let refresh_token =
            refresh_cookie_from(response.headers()).ok_or(ClientError::MissingRefreshCookie)?;
        let body: TokenBody = response.json().await?;

        let session = StoredSession {
            account_id: body.account_id,
            roles: body.roles,
            access_token: body.access_token,
            refresh_token,
        };
        *self.lock_session() = Some(session.clone());
        Ok(session)
    }

    /// Register a new account; does not log in
    pub async fn register(&self, username: &str, password: &str) -> ClientResult<RegisteredAccount> {
        let response = self
            .http
            .post(self.url("/auth/register"))
            .json(&RegisterBody { username, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Login with username and password on the named device
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device_label: Option<&str>,
    ) -> ClientResult<StoredSession> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginBody {
                username,
                password,
                device_label,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        self.store_tokens(response).await
    }

    /// Exchange the refresh cookie for a new access token
    ///
    /// Concurrent callers share a single refresh call. Any failure clears
    /// the stored credentials.
    pub async fn refresh_access_token(&self) -> ClientResult<String> {
        Ok(self.refresh.run(|| self.rotate()).await?)
    }

    async fn rotate(&self) -> Result<String, RefreshError> {
        let result = self.rotate_once().await;
        if let Err(e) = &result {
            log::warn!("Refresh failed, clearing session: {e}");
            self.clear_session();
        }
        result
    }

    async fn rotate_once(&self) -> Result<String, RefreshError> {
        let refresh_token = self.refresh_token().ok_or(RefreshError::NoCredential)?;

        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .header(COOKIE, format!("{REFRESH_COOKIE}={refresh_token}"))
            .send()
            .await
            .map_err(|e| RefreshError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RefreshError::Rejected(response.status().as_u16()));
        }

        let session = self
            .store_tokens(response)
            .await
            .map_err(|e| RefreshError::Failed(e.to_string()))?;
        log::debug!("Access token refreshed for account {}", session.account_id);
        Ok(session.access_token)
    }

    /// Send a bearer-authenticated request, refreshing once on `401`
    ///
    /// `build` is called again for the retry with the new access token.
    async fn send_authorized<F>(&self, build: F) -> ClientResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let sent = self.access_token().ok_or(ClientError::NotLoggedIn)?;
        let response = build(&sent).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Another caller may already have refreshed while this request was out
        let fresh = match self.access_token() {
            None => return Err(ClientError::SessionExpired),
            Some(current) if current != sent => current,
            Some(_) => self.refresh_access_token().await?,
        };

        Ok(build(&fresh).send().await?)
    }

    async fn json_or_error<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Claims of the current access token
    pub async fn whoami(&self) -> ClientResult<Principal> {
        let response = self
            .send_authorized(|token| self.http.get(self.url("/auth/me")).bearer_auth(token))
            .await?;
        Self::json_or_error(response).await
    }

    /// List the caller's devices
    pub async fn list_devices(&self) -> ClientResult<Vec<DeviceInfo>> {
        let response = self
            .send_authorized(|token| self.http.get(self.url("/devices")).bearer_auth(token))
            .await?;
        Self::json_or_error(response).await
    }

    /// Revoke one of the caller's devices
    pub async fn revoke_device(&self, device_id: i64) -> ClientResult<()> {
        let response = self
            .send_authorized(|token| {
                self.http
                    .delete(self.url(&format!("/devices/{device_id}")))
                    .bearer_auth(token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    /// End this device's session and forget the credentials
    pub async fn logout(&self) -> ClientResult<()> {
        let refresh_token = self.refresh_token().ok_or(ClientError::NotLoggedIn)?;
        let response = self
            .send_authorized(|token| {
                self.http
                    .post(self.url("/auth/logout"))
                    .bearer_auth(token)
                    .header(COOKIE, format!("{REFRESH_COOKIE}={refresh_token}"))
            })
            .await;

        self.clear_session();
        let response = response?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}
