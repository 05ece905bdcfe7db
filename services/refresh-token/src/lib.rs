//! Refresh token service library.
//!
//! Provides refresh token issuance, single-use rotation with reuse
//! detection, family revocation, per-identity session limits and cleanup of
//! expired records.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod refresh;
pub mod service;
pub mod shutdown;
pub mod storage;

// Re-exports for convenience
pub use config::{Config, TokenPolicy};
pub use error::TokenError;
pub use refresh::{IssuedToken, RefreshTokenRecord};
pub use service::RefreshTokenService;
