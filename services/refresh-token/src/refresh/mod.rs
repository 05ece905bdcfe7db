//! Refresh token lifecycle: issuance, session limits, rotation and family
//! revocation.

pub mod family;
pub mod issuer;
pub mod limiter;
pub mod record;
pub mod rotator;

pub use family::{FamilyRevoker, RevocationReason};
pub use issuer::{IssuedToken, TokenIssuer};
pub use limiter::SessionLimiter;
pub use record::RefreshTokenRecord;
pub use rotator::RotationEngine;

use crate::error::TokenError;

/// Reject blank identities before any side effect.
pub(crate) fn validate_identity(identity_id: &str) -> Result<(), TokenError> {
    if identity_id.trim().is_empty() {
        return Err(TokenError::validation("identity must not be blank"));
    }
    Ok(())
}
