//! Session lifetimes and limits.

use chrono::Duration;

/// Default access token lifetime in minutes
pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 15;

/// Default refresh token lifetime in days
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 7;

/// Default number of devices an account may hold at once
pub const DEFAULT_MAX_DEVICES: usize = 5;

/// Tunables shared by the token issuer, device registry and credential store
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `iss` claim written into and required from access tokens
    pub issuer: String,
    /// `aud` claim written into and required from access tokens
    pub audience: String,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    /// Device cap, checked only when a new device is created
    pub max_devices: usize,
    /// When set, every rotation restarts the refresh lifetime instead of
    /// carrying the original expiry forward
    pub sliding_refresh_expiry: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issuer: "lottery".to_string(),
            audience: "lottery-web".to_string(),
            access_token_lifetime: Duration::minutes(DEFAULT_ACCESS_TOKEN_MINUTES),
            refresh_token_lifetime: Duration::days(DEFAULT_REFRESH_TOKEN_DAYS),
            max_devices: DEFAULT_MAX_DEVICES,
            sliding_refresh_expiry: false,
        }
    }
}
