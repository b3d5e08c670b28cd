//! Authentication data models.

use super::errors::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Account ID type
pub type AccountId = i64;

/// Device ID type
pub type DeviceId = i64;

/// Refresh token row ID type
pub type RefreshTokenId = i64;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular lottery member
    Member,
    /// Back-office reviewer
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::Configuration(format!("unknown role '{other}'"))),
        }
    }
}

/// Account as seen by the session subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub roles: BTreeSet<Role>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Account together with its stored password hash
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub account: Account,
    pub password_hash: String,
}

/// Input for creating an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub roles: BTreeSet<Role>,
    pub created_at: DateTime<Utc>,
}

/// A client device bound to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub account_id: AccountId,
    pub fingerprint: String,
    pub label: String,
    pub user_agent: Option<String>,
    pub created_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Input for registering a device
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub account_id: AccountId,
    pub fingerprint: String,
    pub label: String,
    pub user_agent: Option<String>,
    pub created_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted refresh token, one link of a rotation chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: RefreshTokenId,
    pub account_id: AccountId,
    pub device_id: Option<DeviceId>,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    pub replaced_by_token_id: Option<RefreshTokenId>,
}

impl RefreshToken {
    /// Not revoked and not yet expired at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Input for persisting a refresh token
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub account_id: AccountId,
    pub device_id: Option<DeviceId>,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Request-scoped facts about the caller
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Account registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_label: Option<String>,
}

/// JWT claims for access token
///
/// The claim set is fixed; construct through [`AccessClaims::new`] so that an
/// empty role set or inverted lifetime never gets signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub roles: BTreeSet<Role>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(
        account_id: AccountId,
        roles: BTreeSet<Role>,
        issuer: &str,
        audience: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Self> {
        if roles.is_empty() {
            return Err(AuthError::Configuration(
                "access token needs at least one role".to_string(),
            ));
        }
        if issuer.is_empty() || audience.is_empty() {
            return Err(AuthError::Configuration(
                "issuer and audience must be set".to_string(),
            ));
        }
        if expires_at <= issued_at {
            return Err(AuthError::Configuration(
                "access token lifetime must be positive".to_string(),
            ));
        }

        Ok(Self {
            sub: account_id.to_string(),
            roles,
            iss: issuer.to_string(),
            aud: audience.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        })
    }

    /// Account ID carried in `sub`
    pub fn account_id(&self) -> AuthResult<AccountId> {
        self.sub.parse().map_err(|_| AuthError::MissingClaim("sub"))
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Signed access token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token pair handed back by login and refresh
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub account_id: AccountId,
    pub roles: BTreeSet<Role>,
    pub access: IssuedAccessToken,
    pub refresh: RefreshToken,
}

/// Device listing entry
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    #[serde(flatten)]
    pub device: Device,
    /// Expiry of the device's live refresh token, if it has one
    pub session_expires_at: Option<DateTime<Utc>>,
}
