//! Refresh token signing and verification.

use crate::error::TokenError;
use crate::jwt::claims::RefreshClaims;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

/// Produces and verifies signed refresh tokens.
pub trait TokenSigner: Send + Sync {
    /// Sign claims into an opaque token string.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if the token cannot be produced.
    fn encode(&self, claims: &RefreshClaims) -> Result<String, TokenError>;

    /// Verify signature, expiry and issuer, then return the claims.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidToken`] for any verification failure.
    fn decode(&self, token: &str) -> Result<RefreshClaims, TokenError>;
}

/// HS256 signer backed by a shared secret.
pub struct HmacSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    key_id: Option<String>,
}

impl HmacSigner {
    /// Create a signer that accepts only tokens from `issuer`.
    #[must_use]
    pub fn new(secret: &[u8], issuer: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            key_id: None,
        }
    }

    /// Set the key ID written into the JWT header.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

impl TokenSigner for HmacSigner {
    fn encode(&self, claims: &RefreshClaims) -> Result<String, TokenError> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid.clone_from(&self.key_id);

        encode(&header, claims, &self.encoding_key).map_err(|e| TokenError::signing(e.to_string()))
    }

    fn decode(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::invalid_token(format!("JWT verification failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SECRET: &[u8] = b"test-secret-key-for-testing-only-32bytes";

    fn claims_expiring_in(seconds: i64) -> RefreshClaims {
        let now = Utc::now();
        RefreshClaims::new(
            "test-issuer".to_string(),
            "user-123".to_string(),
            uuid::Uuid::new_v4().to_string(),
            now,
            now + chrono::Duration::seconds(seconds),
        )
    }

    #[test]
    fn test_round_trip() {
        let signer = HmacSigner::new(SECRET, "test-issuer").with_key_id("key-1");
        let claims = claims_expiring_in(3600);

        let token = signer.encode(&claims).unwrap();
        let decoded = signer.decode(&token).unwrap();

        assert_eq!(decoded.jti, claims.jti);
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.exp, claims.exp);
        assert!(decoded.is_refresh());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = HmacSigner::new(SECRET, "test-issuer");
        let other = HmacSigner::new(b"another-secret-key-for-tests-32bytes!", "test-issuer");

        let token = other.encode(&claims_expiring_in(3600)).unwrap();

        assert!(matches!(signer.decode(&token), Err(TokenError::InvalidToken(_))));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = HmacSigner::new(SECRET, "test-issuer");
        let token = signer.encode(&claims_expiring_in(3600)).unwrap();

        let signature_start = token.rfind('.').unwrap() + 1;
        let mut tampered = token.into_bytes();
        tampered[signature_start] = if tampered[signature_start] == b'A' { b'Q' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();

        assert!(signer.decode(&tampered).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = HmacSigner::new(SECRET, "test-issuer");
        let token = signer.encode(&claims_expiring_in(-60)).unwrap();

        assert!(matches!(signer.decode(&token), Err(TokenError::InvalidToken(_))));
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let signer = HmacSigner::new(SECRET, "test-issuer");
        let foreign = HmacSigner::new(SECRET, "someone-else");
        let mut claims = claims_expiring_in(3600);
        claims.iss = "someone-else".to_string();

        let token = foreign.encode(&claims).unwrap();

        assert!(signer.decode(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let signer = HmacSigner::new(SECRET, "test-issuer");
        assert!(matches!(signer.decode("not.a.jwt"), Err(TokenError::InvalidToken(_))));
    }
}
