//! Centralized configuration for the refresh token service.
//!
//! All configuration is loaded from environment variables once at startup
//! and validated. Components receive the immutable [`TokenPolicy`] rather
//! than reading the environment at call time.

use crate::error::TokenError;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// Minimum accepted signing secret length in bytes.
const MIN_SECRET_LEN: usize = 32;

/// Refresh token rules shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Lifetime of every issued refresh token
    pub refresh_token_ttl: Duration,
    /// Maximum concurrently valid tokens per identity
    pub max_sessions_per_identity: u32,
    /// Upper bound on `replaced_by` hops walked during family revocation
    pub max_chain_length: usize,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            refresh_token_ttl: Duration::from_secs(604_800),
            max_sessions_per_identity: 5,
            max_chain_length: 10_000,
        }
    }
}

impl TokenPolicy {
    /// Set the refresh token TTL.
    #[must_use]
    pub const fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    /// Set the per-identity session ceiling.
    #[must_use]
    pub const fn with_max_sessions(mut self, max: u32) -> Self {
        self.max_sessions_per_identity = max;
        self
    }

    /// Set the chain walk guard.
    #[must_use]
    pub const fn with_max_chain_length(mut self, max: usize) -> Self {
        self.max_chain_length = max;
        self
    }

    /// TTL as a chrono duration for timestamp arithmetic.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL does not fit chrono's range.
    pub fn ttl(&self) -> Result<chrono::Duration, TokenError> {
        chrono::Duration::from_std(self.refresh_token_ttl)
            .map_err(|e| TokenError::config(format!("Invalid refresh token TTL: {e}")))
    }

    /// Check the policy bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if any bound is violated.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.refresh_token_ttl.is_zero() {
            return Err(TokenError::config("REFRESH_TOKEN_TTL must be greater than 0"));
        }
        if self.max_sessions_per_identity < 1 {
            return Err(TokenError::config("MAX_SESSIONS_PER_IDENTITY must be at least 1"));
        }
        if self.max_chain_length < 1 {
            return Err(TokenError::config("MAX_CHAIN_LENGTH must be at least 1"));
        }
        self.ttl().map(|_| ())
    }
}

/// Log output settings for the sweeper binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl LoggingConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, TokenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let filter = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        EnvFilter::try_new(&filter)
            .map_err(|e| TokenError::config(format!("Invalid LOG_LEVEL: {e}")))?;

        Ok(Self {
            filter,
            json: parse_var(lookup, "LOG_JSON", true)?,
        })
    }
}

/// Refresh token service configuration.
#[derive(Clone)]
pub struct Config {
    /// Token lifetime and session rules
    pub policy: TokenPolicy,

    // JWT settings
    /// Issuer claim written into and required from refresh tokens
    pub jwt_issuer: String,
    /// HMAC signing secret
    pub signing_secret: Zeroizing<Vec<u8>>,

    // Storage settings
    /// Redis connection URL
    pub redis_url: String,
    /// Namespace prefix for every Redis key
    pub redis_key_prefix: String,

    // Scheduling
    /// Period between expired-record sweeps
    pub cleanup_interval: Duration,

    // Observability
    /// Log output configuration
    pub logging: LoggingConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("policy", &self.policy)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("signing_secret", &"[REDACTED]")
            .field("redis_url", &self.redis_url)
            .field("redis_key_prefix", &self.redis_key_prefix)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if variables are invalid.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if variables are invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TokenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let policy = TokenPolicy {
            refresh_token_ttl: Duration::from_secs(parse_var(&lookup, "REFRESH_TOKEN_TTL", 604_800)?),
            max_sessions_per_identity: parse_var(&lookup, "MAX_SESSIONS_PER_IDENTITY", 5)?,
            max_chain_length: parse_var(&lookup, "MAX_CHAIN_LENGTH", 10_000)?,
        };
        policy.validate()?;

        let jwt_issuer = lookup("JWT_ISSUER").unwrap_or_else(|| "auth-platform".to_string());
        if jwt_issuer.trim().is_empty() {
            return Err(TokenError::config("JWT_ISSUER must not be blank"));
        }
        let signing_secret = parse_signing_secret(lookup("JWT_SECRET"))?;

        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let redis_key_prefix = lookup("REDIS_KEY_PREFIX").unwrap_or_else(|| "refresh".to_string());
        if redis_key_prefix.trim().is_empty() {
            return Err(TokenError::config("REDIS_KEY_PREFIX must not be blank"));
        }

        let cleanup_interval = Duration::from_secs(parse_var(&lookup, "CLEANUP_INTERVAL", 3600)?);
        if cleanup_interval.is_zero() {
            return Err(TokenError::config("CLEANUP_INTERVAL must be greater than 0"));
        }

        let logging = LoggingConfig::from_lookup(&lookup)?;

        Ok(Self {
            policy,
            jwt_issuer,
            signing_secret,
            redis_url,
            redis_key_prefix,
            cleanup_interval,
            logging,
        })
    }
}

/// Parse a variable with a default value.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, TokenError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}

/// Decode the base64 signing secret, or generate one for development.
fn parse_signing_secret(raw: Option<String>) -> Result<Zeroizing<Vec<u8>>, TokenError> {
    match raw {
        Some(encoded) => {
            let bytes = Zeroizing::new(
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
                    .map_err(|e| TokenError::config(format!("Invalid JWT_SECRET: {e}")))?,
            );

            if bytes.len() < MIN_SECRET_LEN {
                return Err(TokenError::config(format!(
                    "JWT_SECRET must be at least {MIN_SECRET_LEN} bytes, got {}",
                    bytes.len()
                )));
            }
            Ok(bytes)
        }
        None => {
            // Tokens signed with a generated key do not survive a restart.
            use rand::RngCore;
            let mut key = Zeroizing::new(vec![0u8; MIN_SECRET_LEN]);
            rand::thread_rng().fill_bytes(&mut key);
            tracing::warn!("JWT_SECRET not set, using a random development key");
            Ok(key)
        }
    }
}
