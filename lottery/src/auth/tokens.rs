//! Access token issuance and verification.

use super::{
    config::SessionConfig,
    errors::{AuthError, AuthResult},
    models::{AccessClaims, AccountId, IssuedAccessToken, Role},
};
use crate::clock::Clock;
use chrono::Duration;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Minimum accepted length of the HMAC signing secret
pub const MIN_SECRET_LEN: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Stateless signer for short-lived access tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Create an issuer from the signing secret and session settings
    ///
    /// # Errors
    ///
    /// * `AuthError::Configuration` - Secret shorter than [`MIN_SECRET_LEN`]
    ///   or a non-positive access lifetime
    pub fn new(secret: &str, config: &SessionConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Configuration(format!(
                "JWT secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if config.access_token_lifetime <= Duration::zero() {
            return Err(AuthError::Configuration(
                "access token lifetime must be positive".to_string(),
            ));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // Expiry is checked against the injected clock in `verify_access`
        validation.validate_exp = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            lifetime: config.access_token_lifetime,
            clock,
        })
    }

    /// Sign an access token for `account_id` carrying `roles`
    pub fn issue_access(
        &self,
        account_id: AccountId,
        roles: &BTreeSet<Role>,
    ) -> AuthResult<IssuedAccessToken> {
        let now = self.clock.now();
        let expires_at = now + self.lifetime;
        let claims = AccessClaims::new(
            account_id,
            roles.clone(),
            &self.issuer,
            &self.audience,
            now,
            expires_at,
        )?;

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)?;

        Ok(IssuedAccessToken { token, expires_at })
    }

    /// Verify signature, issuer, audience and expiry of an access token
    ///
    /// # Errors
    ///
    /// * `AuthError::MissingClaim` - A required claim is absent or malformed
    /// * `AuthError::InvalidAccessToken` - Any other verification failure
    pub fn verify_access(&self, token: &str) -> AuthResult<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(match claim.as_str() {
                    "exp" => "exp",
                    "sub" => "sub",
                    "iss" => "iss",
                    "aud" => "aud",
                    _ => "unknown",
                }),
                _ => {
                    log::debug!("Rejected access token: {}", e);
                    AuthError::InvalidAccessToken
                }
            },
        )?;

        let claims = data.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(AuthError::InvalidAccessToken);
        }
        claims.account_id()?;

        Ok(claims)
    }

    /// Lifetime of newly issued access tokens
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}
