//! Session and device authentication.
//!
//! This module implements:
//! - HS256 access tokens with a fixed claim set (15-minute default expiry)
//! - Single-use refresh tokens rotated along a forward-linked chain
//! - Device fingerprinting with a per-account device cap
//! - Argon2id password hashing with server-side pepper
//!
//! ## Example
//!
//! ```no_run
//! use lottery::auth::{Argon2Hasher, ClientInfo, LoginRequest, SessionConfig, SessionManager};
//! use lottery::clock::SystemClock;
//! use lottery::db::{Database, DatabaseConfig, PgAuthRepository};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::default()).await?;
//!     let sessions = SessionManager::new(
//!         Arc::new(PgAuthRepository::new(db.pool().clone())),
//!         Arc::new(Argon2Hasher::new("server_side_pepper".to_string())),
//!         "a_jwt_secret_of_at_least_32_characters",
//!         SessionConfig::default(),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let request = LoginRequest {
//!         username: "member1".to_string(),
//!         password: "SecurePass123".to_string(),
//!         device_label: Some("laptop".to_string()),
//!     };
//!
//!     let (account, device, tokens) = sessions.login(request, &ClientInfo::default()).await?;
//!     println!("{} logged in on device {}", account.username, device.id);
//!     println!("access token expires at {}", tokens.access.expires_at);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod devices;
pub mod errors;
pub mod manager;
pub mod models;
pub mod password;
pub mod tokens;

pub use config::SessionConfig;
pub use credentials::CredentialStore;
pub use devices::{DeviceRegistry, fingerprint};
pub use errors::{AuthError, AuthErrorKind, AuthResult};
pub use manager::SessionManager;
pub use models::{
    AccessClaims, Account, AccountId, AccountRecord, ClientInfo, Device, DeviceId, DeviceSummary,
    IssuedAccessToken, LoginRequest, NewAccount, NewDevice, NewRefreshToken, RefreshToken,
    RefreshTokenId, RegisterRequest, Role, SessionTokens,
};
pub use password::{Argon2Hasher, CredentialHasher};
pub use tokens::TokenIssuer;
