//! Refresh token JWT encoding.

pub mod claims;
pub mod signer;

pub use claims::{RefreshClaims, REFRESH_TOKEN_TYPE};
pub use signer::{HmacSigner, TokenSigner};
