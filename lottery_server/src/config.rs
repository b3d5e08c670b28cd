//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use chrono::Duration;
use lottery::auth::{
    SessionConfig,
    config::{DEFAULT_ACCESS_TOKEN_MINUTES, DEFAULT_MAX_DEVICES, DEFAULT_REFRESH_TOKEN_DAYS},
    tokens::MIN_SECRET_LEN,
};
use lottery::db::{DatabaseConfig, config::DEVELOPMENT_DATABASE_URL};
use std::net::SocketAddr;

/// Default HTTP bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Minimum accepted length of the password pepper
pub const MIN_PEPPER_LEN: usize = 16;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Prometheus scrape listener, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Token lifetimes and device cap
    pub session: SessionConfig,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Password hashing pepper (required)
    pub password_pepper: String,
    /// Mark the refresh cookie `Secure`
    pub cookie_secure: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::from_source(
            |key| std::env::var(key).ok(),
            bind_override,
            database_url_override,
        )
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_source<F>(
        source: F,
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = match bind_override {
            Some(bind) => bind,
            None => match parse_addr(&source, "SERVER_BIND")? {
                Some(bind) => bind,
                None => default_bind()?,
            },
        };
        let metrics_bind = parse_addr(&source, "METRICS_BIND")?;

        // Database configuration
        let database_url = database_url_override
            .or_else(|| source("DATABASE_URL"))
            .unwrap_or_else(|| DEVELOPMENT_DATABASE_URL.to_string());

        let database = DatabaseConfig {
            database_url,
            max_connections: parse_env_or(&source, "DB_MAX_CONNECTIONS", 20),
            min_connections: parse_env_or(&source, "DB_MIN_CONNECTIONS", 2),
            connection_timeout_secs: parse_env_or(&source, "DB_CONNECTION_TIMEOUT_SECS", 5),
            idle_timeout_secs: parse_env_or(&source, "DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: parse_env_or(&source, "DB_MAX_LIFETIME_SECS", 1800),
        };

        // Security configuration (REQUIRED)
        let jwt_secret = source("JWT_SECRET").ok_or_else(|| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let password_pepper =
            source("PASSWORD_PEPPER").ok_or_else(|| ConfigError::MissingRequired {
                var: "PASSWORD_PEPPER".to_string(),
                hint: "Generate with: openssl rand -hex 16".to_string(),
            })?;

        let security = SecurityConfig {
            jwt_secret,
            password_pepper,
            cookie_secure: parse_env_or(&source, "COOKIE_SECURE", true),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            issuer: source("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: source("JWT_AUDIENCE").unwrap_or(defaults.audience),
            access_token_lifetime: Duration::minutes(parse_env_or(
                &source,
                "ACCESS_TOKEN_MINUTES",
                DEFAULT_ACCESS_TOKEN_MINUTES,
            )),
            refresh_token_lifetime: Duration::days(parse_env_or(
                &source,
                "REFRESH_TOKEN_DAYS",
                DEFAULT_REFRESH_TOKEN_DAYS,
            )),
            max_devices: parse_env_or(&source, "MAX_DEVICES_PER_ACCOUNT", DEFAULT_MAX_DEVICES),
            sliding_refresh_expiry: parse_env_or(&source, "SLIDING_REFRESH_EXPIRY", false),
        };

        Ok(ServerConfig {
            bind,
            metrics_bind,
            database,
            security,
            session,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: format!("Must be at least {MIN_SECRET_LEN} characters"),
            });
        }

        if self.security.password_pepper.len() < MIN_PEPPER_LEN {
            return Err(ConfigError::Invalid {
                var: "PASSWORD_PEPPER".to_string(),
                reason: format!("Must be at least {MIN_PEPPER_LEN} characters"),
            });
        }

        if self.session.access_token_lifetime <= Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "ACCESS_TOKEN_MINUTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.session.refresh_token_lifetime <= self.session.access_token_lifetime {
            return Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_DAYS".to_string(),
                reason: "Must outlive the access token".to_string(),
            });
        }

        if self.session.max_devices == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_DEVICES_PER_ACCOUNT".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }

        if self.session.issuer.is_empty() || self.session.audience.is_empty() {
            return Err(ConfigError::Invalid {
                var: "JWT_ISSUER/JWT_AUDIENCE".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> Result<SocketAddr, ConfigError> {
    DEFAULT_BIND.parse().map_err(|_| ConfigError::Invalid {
        var: "SERVER_BIND".to_string(),
        reason: format!("Default {DEFAULT_BIND} is not a socket address"),
    })
}

/// Socket addresses are never silently defaulted when set but malformed
fn parse_addr<F>(source: &F, key: &str) -> Result<Option<SocketAddr>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    source(key)
        .map(|v| {
            v.parse().map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("'{v}' is not a socket address"),
            })
        })
        .transpose()
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<F, T>(source: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    source(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("PASSWORD_PEPPER", "fedcba9876543210"),
        ]
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_defaults_apply() {
        let config = ServerConfig::from_source(source(&required()), None, None).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bind, DEFAULT_BIND.parse().unwrap());
        assert!(config.metrics_bind.is_none());
        assert!(config.security.cookie_secure);
        assert_eq!(config.session.access_token_lifetime, Duration::minutes(15));
        assert_eq!(config.session.refresh_token_lifetime, Duration::days(7));
        assert_eq!(config.session.max_devices, 5);
        assert!(!config.session.sliding_refresh_expiry);
    }

    #[test]
    fn test_missing_secret_is_reported() {
        let err = ServerConfig::from_source(source(&[("PASSWORD_PEPPER", "x")]), None, None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_short_secret_fails_validation() {
        let config = ServerConfig::from_source(
            source(&[("JWT_SECRET", "short"), ("PASSWORD_PEPPER", "fedcba9876543210")]),
            None,
            None,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_overrides_and_session_settings() {
        let mut vars = required();
        vars.extend([
            ("SERVER_BIND", "0.0.0.0:9000"),
            ("METRICS_BIND", "127.0.0.1:9100"),
            ("ACCESS_TOKEN_MINUTES", "5"),
            ("MAX_DEVICES_PER_ACCOUNT", "3"),
            ("SLIDING_REFRESH_EXPIRY", "true"),
            ("COOKIE_SECURE", "false"),
        ]);
        let bind: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let config = ServerConfig::from_source(
            source(&vars),
            Some(bind),
            Some("postgres://override/db".to_string()),
        )
        .unwrap();

        assert_eq!(config.bind, bind);
        assert_eq!(config.metrics_bind, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(config.database.database_url, "postgres://override/db");
        assert_eq!(config.session.access_token_lifetime, Duration::minutes(5));
        assert_eq!(config.session.max_devices, 3);
        assert!(config.session.sliding_refresh_expiry);
        assert!(!config.security.cookie_secure);
    }

    #[test]
    fn test_malformed_bind_is_an_error() {
        let mut vars = required();
        vars.push(("SERVER_BIND", "not-an-address"));
        let err = ServerConfig::from_source(source(&vars), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_zero_device_cap_fails_validation() {
        let mut vars = required();
        vars.push(("MAX_DEVICES_PER_ACCOUNT", "0"));
        let config = ServerConfig::from_source(source(&vars), None, None).unwrap();
        assert!(config.validate().is_err());
    }
}
