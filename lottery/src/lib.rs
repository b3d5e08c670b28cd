//! # Lottery
//!
//! Session and device authentication for the lottery membership service.
//!
//! Members log in from a device and receive a short-lived access token plus
//! a single-use refresh token bound to that device. Refresh tokens rotate on
//! every use and form a forward-linked chain, so a rotated token can never be
//! replayed and each device holds exactly one live session. The number of
//! devices per account is capped.
//!
//! ## Core Modules
//!
//! - [`auth`]: Token issuer, device registry, credential store and the
//!   [`auth::SessionManager`] composing them
//! - [`db`]: Repository traits with PostgreSQL and in-memory implementations
//! - [`clock`]: Injectable time source
//!
//! ## Example
//!
//! ```
//! use lottery::auth::{Argon2Hasher, SessionConfig, SessionManager};
//! use lottery::clock::SystemClock;
//! use lottery::db::MemoryAuthRepository;
//! use std::sync::Arc;
//!
//! let sessions = SessionManager::new(
//!     Arc::new(MemoryAuthRepository::new()),
//!     Arc::new(Argon2Hasher::new("dev_pepper_value".to_string())),
//!     "development_secret_with_32_characters",
//!     SessionConfig::default(),
//!     Arc::new(SystemClock),
//! )
//! .unwrap();
//! assert_eq!(sessions.config().max_devices, 5);
//! ```

/// Session, device and credential management.
pub mod auth;

/// Injectable wall-clock time.
pub mod clock;

/// Persistence layer.
pub mod db;

pub use auth::{AuthError, AuthResult, SessionConfig, SessionManager};
pub use clock::{Clock, ManualClock, SystemClock};
