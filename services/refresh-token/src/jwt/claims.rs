//! Refresh token claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `token_type` value carried by every refresh token.
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Claims carried by a refresh token JWT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    /// Issuer
    pub iss: String,
    /// Identity the token belongs to
    pub sub: String,
    /// Optional on decode so that a token without one is rejected by the
    /// rotation engine rather than failing deserialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Always [`REFRESH_TOKEN_TYPE`] for tokens this service issues
    pub token_type: String,
}

impl RefreshClaims {
    /// Build refresh claims with whole-second timestamps.
    pub fn new(
        issuer: String,
        subject: String,
        jti: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        RefreshClaims {
            iss: issuer,
            sub: subject,
            jti: Some(jti),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
        }
    }

    /// Whether `token_type` marks a refresh token.
    pub fn is_refresh(&self) -> bool {
        self.token_type == REFRESH_TOKEN_TYPE
    }

    /// Expired at or before `now`, to the second.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    /// Non-blank `jti`, if any.
    pub fn jti(&self) -> Option<&str> {
        self.jti.as_deref().filter(|jti| !jti.trim().is_empty())
    }
}
