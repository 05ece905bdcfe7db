//! Single-use refresh token rotation with reuse detection.
//!
//! Presenting a token that was already rotated means two parties hold it.
//! The engine then revokes everything rotated from it so that whichever
//! party holds the newer tokens is logged out as well.

use crate::clock::Clock;
use crate::error::TokenError;
use crate::jwt::TokenSigner;
use crate::metrics;
use crate::refresh::family::{FamilyRevoker, RevocationReason};
use crate::refresh::issuer::{IssuedToken, TokenIssuer};
use crate::refresh::record::RefreshTokenRecord;
use crate::storage::{RefreshTokenStore, RotationCommit};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Exchanges refresh tokens for their successors.
pub struct RotationEngine {
    store: Arc<dyn RefreshTokenStore>,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
    issuer: Arc<TokenIssuer>,
    revoker: Arc<FamilyRevoker>,
}

impl RotationEngine {
    /// `issuer` signs successors and `revoker` handles replayed tokens.
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        signer: Arc<dyn TokenSigner>,
        clock: Arc<dyn Clock>,
        issuer: Arc<TokenIssuer>,
        revoker: Arc<FamilyRevoker>,
    ) -> Self {
        RotationEngine {
            store,
            signer,
            clock,
            issuer,
            revoker,
        }
    }

    /// Exchange a refresh token for its successor.
    ///
    /// The presented token is revoked and linked to the successor. A revoked
    /// token revokes its whole family and fails with
    /// [`TokenError::ReuseDetected`].
    #[instrument(skip_all)]
    pub async fn rotate(&self, presented: &str) -> Result<IssuedToken, TokenError> {
        let result = self.try_rotate(presented).await;
        metrics::record_rotation(status_label(&result));
        result
    }

    async fn try_rotate(&self, presented: &str) -> Result<IssuedToken, TokenError> {
        if presented.trim().is_empty() {
            return Err(TokenError::validation("refresh token must not be blank"));
        }

        let claims = self.signer.decode(presented)?;
        if !claims.is_refresh() {
            return Err(TokenError::invalid_token(format!(
                "unexpected token type {}",
                claims.token_type
            )));
        }

        let now = self.clock.now();
        if claims.is_expired_at(now) {
            return Err(TokenError::invalid_token("token expired"));
        }

        let jti = claims
            .jti()
            .ok_or_else(|| TokenError::invalid_token("missing jti"))?;

        let record = self
            .store
            .find_by_jti(jti)
            .await?
            .ok_or_else(|| TokenError::invalid_token("unknown jti"))?;

        if record.is_expired_at(now) {
            return Err(TokenError::invalid_token("record expired"));
        }
        if record.revoked {
            return Err(self.reuse_detected(&record).await);
        }
        if claims.sub != record.identity_id {
            warn!(jti = %record.jti, record_id = %record.id, "Token subject does not match record");
            return Err(TokenError::invalid_token("subject mismatch"));
        }

        let successor = self.issuer.prepare_successor(&record)?;

        match self
            .store
            .commit_rotation(record.id, successor.record, now)
            .await?
        {
            RotationCommit::Committed(stored) => {
                self.issuer.settle_rotation(&stored).await;
                metrics::TOKENS_ISSUED.inc();
                info!(
                    identity_id = %stored.identity_id,
                    predecessor = %record.id,
                    successor = %stored.id,
                    jti = %stored.jti,
                    "Rotated refresh token"
                );
                Ok(IssuedToken {
                    token: successor.token,
                    record: stored,
                })
            }
            RotationCommit::Conflict => Err(self.lost_commit(record.id, now).await),
        }
    }

    /// Work out why the commit was refused by re-reading the predecessor.
    async fn lost_commit(&self, predecessor_id: Uuid, now: DateTime<Utc>) -> TokenError {
        let current = match self.store.find_by_id(predecessor_id).await {
            Ok(current) => current,
            Err(e) => return e,
        };

        match current {
            None => TokenError::invalid_token("record removed during rotation"),
            Some(record) if record.is_expired_at(now) => {
                TokenError::invalid_token("record expired during rotation")
            }
            Some(record) if record.revoked => self.reuse_detected(&record).await,
            Some(record) => TokenError::StorageConflict(format!(
                "rotation of {} refused without a competing update",
                record.id
            )),
        }
    }

    /// Revoke the family of a replayed token and build the error to return.
    ///
    /// If revocation fails the storage error is returned instead, so a retry
    /// takes this path again.
    async fn reuse_detected(&self, record: &RefreshTokenRecord) -> TokenError {
        warn!(
            identity_id = %record.identity_id,
            jti = %record.jti,
            record_id = %record.id,
            "Refresh token reuse detected, revoking family"
        );
        metrics::REUSE_DETECTED.inc();

        match self
            .revoker
            .revoke_family(record, RevocationReason::ReuseDetected)
            .await
        {
            Ok(_) => TokenError::ReuseDetected {
                jti: record.jti.clone(),
            },
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Family revocation after reuse failed");
                e
            }
        }
    }
}

fn status_label(result: &Result<IssuedToken, TokenError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(TokenError::ReuseDetected { .. }) => "reuse",
        Err(TokenError::InvalidToken(_)) => "invalid",
        Err(TokenError::Validation(_)) => "validation",
        Err(_) => "error",
    }
}
