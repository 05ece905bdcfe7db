//! Error types for refresh token operations.
//!
//! Reuse detection is tracked as its own variant so that logs and metrics
//! can tell it apart, but it renders and maps exactly like an invalid token.

use thiserror::Error;

/// Errors produced by the refresh token core.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Null, blank or malformed input. Rejected before any side effect.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad signature, expired token, missing or unknown `jti`.
    ///
    /// The reason is kept for logging only and never rendered.
    #[error("Invalid refresh token")]
    InvalidToken(String),

    /// A revoked token was presented again. The family has been revoked.
    #[error("Invalid refresh token")]
    ReuseDetected {
        /// Token identifier that was replayed
        jti: String,
    },

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A uniqueness constraint in the store was violated.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// The signer could not produce a token.
    #[error("Signing error: {0}")]
    Signing(String),

    /// A `replaced_by` chain loops or exceeds the configured length.
    #[error("Token chain corrupted: {0}")]
    ChainCorrupted(String),

    /// Invalid startup configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TokenError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid token error with an internal reason.
    #[must_use]
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken(reason.into())
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a signing error.
    #[must_use]
    pub fn signing(msg: impl Into<String>) -> Self {
        Self::Signing(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this is a storage or signer failure rather than a caller problem.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::StorageConflict(_) | Self::Signing(_) | Self::ChainCorrupted(_)
        )
    }

    /// Whether the caller must treat the request as unauthenticated.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::InvalidToken(_) | Self::ReuseDetected { .. })
    }

    /// Public error code. Reuse detection shares the invalid token code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => TOKEN_VALIDATION_FAILED,
            Self::InvalidToken(_) | Self::ReuseDetected { .. } => TOKEN_INVALID,
            Self::Storage(_)
            | Self::StorageConflict(_)
            | Self::Signing(_)
            | Self::ChainCorrupted(_) => TOKEN_INTERNAL_ERROR,
            Self::Config(_) => TOKEN_CONFIG_ERROR,
        }
    }
}

impl From<redis::RedisError> for TokenError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("Record serialization failed: {err}"))
    }
}

/// Public code for rejected input.
pub const TOKEN_VALIDATION_FAILED: &str = "TOKEN_VALIDATION_FAILED";
/// Public code for any rejected refresh token.
pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
/// Public code for storage and signer failures.
pub const TOKEN_INTERNAL_ERROR: &str = "TOKEN_INTERNAL_ERROR";
/// Public code for configuration failures.
pub const TOKEN_CONFIG_ERROR: &str = "TOKEN_CONFIG_ERROR";
