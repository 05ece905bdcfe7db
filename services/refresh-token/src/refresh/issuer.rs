//! Token issuance.

use crate::cleanup::Cleaner;
use crate::clock::Clock;
use crate::config::TokenPolicy;
use crate::error::TokenError;
use crate::jwt::{RefreshClaims, TokenSigner};
use crate::metrics;
use crate::refresh::limiter::SessionLimiter;
use crate::refresh::record::RefreshTokenRecord;
use crate::refresh::validate_identity;
use crate::storage::RefreshTokenStore;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A signed refresh token and the record backing it.
#[derive(Clone)]
pub struct IssuedToken {
    /// Signed JWT handed to the client.
    pub token: String,
    /// Stored record keyed by the token's `jti`.
    pub record: RefreshTokenRecord,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("record", &self.record)
            .finish()
    }
}

/// Creates refresh tokens for an identity.
pub struct TokenIssuer {
    store: Arc<dyn RefreshTokenStore>,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
    issuer: String,
    limiter: SessionLimiter,
    cleaner: Cleaner,
}

impl TokenIssuer {
    /// `issuer` becomes the `iss` claim of every token.
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        signer: Arc<dyn TokenSigner>,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
        issuer: impl Into<String>,
    ) -> Self {
        let limiter = SessionLimiter::new(store.clone(), clock.clone(), policy);
        let cleaner = Cleaner::new(store.clone(), clock.clone());
        TokenIssuer {
            store,
            signer,
            clock,
            policy,
            issuer: issuer.into(),
            limiter,
            cleaner,
        }
    }

    /// Issue and persist a new refresh token, evicting the oldest sessions
    /// first if the identity is at its limit.
    #[instrument(skip(self))]
    pub async fn issue(&self, identity_id: &str) -> Result<IssuedToken, TokenError> {
        validate_identity(identity_id)?;

        self.cleaner.sweep_identity_quietly(identity_id).await;
        self.limiter.enforce(identity_id).await?;

        let prepared = self.sign_new(identity_id)?;
        let record = self.store.save(prepared.record).await?;

        metrics::TOKENS_ISSUED.inc();
        info!(identity_id = %identity_id, jti = %record.jti, record_id = %record.id, "Issued refresh token");

        Ok(IssuedToken {
            token: prepared.token,
            record,
        })
    }

    /// Sign a successor for `predecessor` without persisting it.
    ///
    /// Nothing is evicted here. Call [`settle_rotation`](Self::settle_rotation)
    /// once the successor is committed.
    pub fn prepare_successor(
        &self,
        predecessor: &RefreshTokenRecord,
    ) -> Result<IssuedToken, TokenError> {
        validate_identity(&predecessor.identity_id)?;
        self.sign_new(&predecessor.identity_id)
    }

    /// Apply the session limit after `successor` was committed, never
    /// evicting the successor itself.
    ///
    /// Failures are logged, not returned.
    pub async fn settle_rotation(&self, successor: &RefreshTokenRecord) -> u64 {
        match self
            .limiter
            .enforce_excluding(&successor.identity_id, Some(successor.id))
            .await
        {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(
                    identity_id = %successor.identity_id,
                    record_id = %successor.id,
                    error = %e,
                    "Session limit check after rotation failed"
                );
                0
            }
        }
    }

    fn sign_new(&self, identity_id: &str) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + self.policy.ttl()?;
        let jti = Uuid::new_v4().to_string();

        let claims = RefreshClaims::new(
            self.issuer.clone(),
            identity_id.to_string(),
            jti.clone(),
            now,
            expires_at,
        );
        let token = self.signer.encode(&claims)?;

        Ok(IssuedToken {
            token,
            record: RefreshTokenRecord::new(jti, identity_id.to_string(), now, expires_at),
        })
    }
}
