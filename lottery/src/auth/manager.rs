//! Session manager implementation.

use super::{
    config::SessionConfig,
    credentials::CredentialStore,
    devices::DeviceRegistry,
    errors::{AuthError, AuthResult},
    models::{
        AccessClaims, Account, AccountId, ClientInfo, Device, DeviceId, DeviceSummary, LoginRequest,
        NewAccount, RegisterRequest, Role, SessionTokens,
    },
    password::{CredentialHasher, validate_password, validate_username},
    tokens::TokenIssuer,
};
use crate::clock::Clock;
use crate::db::{AccountRepository, AuthStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Session manager
///
/// Composes the device registry, the credential store and the token issuer
/// into login, refresh and logout. Holds no session state of its own; every
/// decision is made against the store and the injected clock.
#[derive(Clone)]
pub struct SessionManager {
    accounts: Arc<dyn AccountRepository>,
    devices: DeviceRegistry,
    credentials: CredentialStore,
    tokens: TokenIssuer,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for accounts, devices and refresh tokens
    /// * `hasher` - Password hash/verify capability
    /// * `jwt_secret` - HS256 signing secret for access tokens
    /// * `config` - Lifetimes, device cap and claim values
    /// * `clock` - Time source for every expiry decision
    ///
    /// # Errors
    ///
    /// * `AuthError::Configuration` - Secret too short or invalid lifetimes
    pub fn new<S>(
        store: Arc<S>,
        hasher: Arc<dyn CredentialHasher>,
        jwt_secret: &str,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self>
    where
        S: AuthStore + 'static,
    {
        if config.refresh_token_lifetime <= chrono::Duration::zero() {
            return Err(AuthError::Configuration(
                "refresh token lifetime must be positive".to_string(),
            ));
        }
        if config.max_devices == 0 {
            return Err(AuthError::Configuration(
                "device cap must be at least 1".to_string(),
            ));
        }

        let tokens = TokenIssuer::new(jwt_secret, &config, clock.clone())?;
        let devices = DeviceRegistry::new(store.clone(), clock.clone(), config.max_devices);
        let credentials = CredentialStore::new(
            store.clone(),
            clock.clone(),
            config.refresh_token_lifetime,
            config.sliding_refresh_expiry,
        );

        Ok(Self {
            accounts: store,
            devices,
            credentials,
            tokens,
            hasher,
            clock,
            config,
        })
    }

    /// Register a new member account
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidUsername` - Username format invalid
    /// * `AuthError::WeakPassword` - Password too weak
    /// * `AuthError::UsernameTaken` - Username already exists
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<Account> {
        validate_username(&request.username)?;
        validate_password(&request.password)?;

        let password_hash = self.hasher.hash(&request.password)?;
        let account = self
            .accounts
            .create_account(NewAccount {
                username: request.username,
                password_hash,
                roles: BTreeSet::from([Role::Member]),
                created_at: self.clock.now(),
            })
            .await?;

        log::info!("Registered account {} ({})", account.id, account.username);
        Ok(account)
    }

    /// Login an account from a device
    ///
    /// # Arguments
    ///
    /// * `request` - Username, password and optional device label
    /// * `client` - Caller IP and user agent, used for the device fingerprint
    ///
    /// # Returns
    ///
    /// * `AuthResult<(Account, Device, SessionTokens)>` - The account, the
    ///   device the session is bound to and a fresh token pair
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidCredentials` - Unknown user, wrong password or
    ///   inactive account, indistinguishably
    /// * `AuthError::TooManyDevices` - New device would exceed the cap
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> AuthResult<(Account, Device, SessionTokens)> {
        let record = self
            .accounts
            .find_account_by_username(&request.username)
            .await?;

        let Some(record) = record else {
            log::debug!("Login for unknown username {:?}", request.username);
            return Err(AuthError::InvalidCredentials);
        };
        if !self.hasher.verify(&request.password, &record.password_hash) {
            log::debug!("Wrong password for account {}", record.account.id);
            return Err(AuthError::InvalidCredentials);
        }
        let mut account = record.account;
        if !account.is_active {
            log::info!("Login attempt on inactive account {}", account.id);
            return Err(AuthError::InvalidCredentials);
        }

        let device = self
            .devices
            .get_or_create_device(account.id, request.device_label.as_deref(), client)
            .await?;
        let refresh = self
            .credentials
            .issue_refresh(account.id, Some(device.id), client.ip.as_deref())
            .await?;
        let access = self.tokens.issue_access(account.id, &account.roles)?;

        let now = self.clock.now();
        self.accounts.record_login(account.id, now).await?;
        account.last_login = Some(now);

        let tokens = SessionTokens {
            account_id: account.id,
            roles: account.roles.clone(),
            access,
            refresh,
        };
        Ok((account, device, tokens))
    }

    /// Rotate a refresh token and mint a new access token
    ///
    /// Never retried here; a lost rotation race surfaces as
    /// `InvalidRefreshToken` and the client decides what to do.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidRefreshToken` - Token unusable, account gone or
    ///   deactivated
    pub async fn refresh(&self, presented: &str, client: &ClientInfo) -> AuthResult<SessionTokens> {
        let refresh = self
            .credentials
            .rotate(presented, client.ip.as_deref())
            .await?;

        let account = match self.accounts.find_account(refresh.account_id).await? {
            Some(account) if account.is_active => account,
            Some(_) => {
                log::info!("Refresh rejected for inactive account {}", refresh.account_id);
                return Err(AuthError::InvalidRefreshToken);
            }
            None => return Err(AuthError::InvalidRefreshToken),
        };

        let access = self.tokens.issue_access(account.id, &account.roles)?;
        Ok(SessionTokens {
            account_id: account.id,
            roles: account.roles,
            access,
            refresh,
        })
    }

    /// End the session of the device the presented refresh token belongs to
    ///
    /// Idempotent: no token, an unknown or inactive token, a token of another
    /// account or an already removed device all succeed without effect.
    pub async fn logout(
        &self,
        account_id: AccountId,
        presented: Option<&str>,
        client: &ClientInfo,
    ) -> AuthResult<()> {
        let Some(presented) = presented else {
            return Ok(());
        };
        let Some(token) = self.credentials.find_active(presented).await? else {
            return Ok(());
        };
        if token.account_id != account_id {
            log::warn!(
                "Account {} presented a refresh token of account {} on logout",
                account_id,
                token.account_id
            );
            return Ok(());
        }
        let Some(device_id) = token.device_id else {
            return Ok(());
        };
        let Some(device) = self.devices.find_device(account_id, device_id).await? else {
            return Ok(());
        };

        match self
            .devices
            .revoke_device(account_id, &device.fingerprint, client.ip.as_deref())
            .await
        {
            Ok(_) | Err(AuthError::DeviceNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Devices of the account with the expiry of each live session
    pub async fn list_devices(&self, account_id: AccountId) -> AuthResult<Vec<DeviceSummary>> {
        let devices = self.devices.list_devices(account_id).await?;
        let mut summaries = Vec::with_capacity(devices.len());

        for device in devices {
            let session_expires_at = self
                .credentials
                .latest_active_for_device(account_id, device.id)
                .await?
                .map(|t| t.expires_at);
            summaries.push(DeviceSummary {
                device,
                session_expires_at,
            });
        }
        Ok(summaries)
    }

    /// Revoke one of the account's own devices
    ///
    /// # Errors
    ///
    /// * `AuthError::DeviceNotFound` - Unknown device or owned by another account
    pub async fn revoke_device(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
        client: &ClientInfo,
    ) -> AuthResult<()> {
        self.devices
            .revoke_device_by_id(account_id, device_id, client.ip.as_deref())
            .await?;
        Ok(())
    }

    /// Admin action: activate or deactivate an account
    ///
    /// Deactivation takes effect on the next login or refresh; outstanding
    /// access tokens stay valid until they expire.
    pub async fn set_account_active(&self, account_id: AccountId, active: bool) -> AuthResult<()> {
        self.accounts.set_account_active(account_id, active).await?;
        log::info!("Account {} set active={}", account_id, active);
        Ok(())
    }

    pub async fn find_account(&self, account_id: AccountId) -> AuthResult<Account> {
        self.accounts
            .find_account(account_id)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    /// Verify an access token presented as a bearer credential
    pub fn verify_access_token(&self, token: &str) -> AuthResult<AccessClaims> {
        self.tokens.verify_access(token)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }
}
