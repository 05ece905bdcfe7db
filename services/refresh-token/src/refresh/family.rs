//! Revocation of token lineages.

use crate::clock::Clock;
use crate::config::TokenPolicy;
use crate::error::TokenError;
use crate::metrics;
use crate::refresh::record::RefreshTokenRecord;
use crate::refresh::validate_identity;
use crate::storage::RefreshTokenStore;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Why records were revoked. Used as the metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// A rotated token was presented again.
    ReuseDetected,
    /// The holder logged out of one session.
    Logout,
    /// The holder logged out everywhere.
    LogoutAll,
    /// Evicted to stay under the per-identity session limit.
    SessionLimit,
}

impl RevocationReason {
    /// Metrics label for this reason.
    pub const fn as_str(self) -> &'static str {
        match self {
            RevocationReason::ReuseDetected => "reuse_detected",
            RevocationReason::Logout => "logout",
            RevocationReason::LogoutAll => "logout_all",
            RevocationReason::SessionLimit => "session_limit",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revokes a record and everything rotated from it.
pub struct FamilyRevoker {
    store: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
}

impl FamilyRevoker {
    /// `policy.max_chain_length` bounds every walk.
    pub fn new(store: Arc<dyn RefreshTokenStore>, clock: Arc<dyn Clock>, policy: TokenPolicy) -> Self {
        FamilyRevoker {
            store,
            clock,
            policy,
        }
    }

    /// Revoke `record` and every descendant reachable through `replaced_by`.
    ///
    /// Each hop follows the state returned by the store after revoking, so a
    /// rotation racing with the walk either shows up here or loses its
    /// commit. Returns how many records this call revoked; records already
    /// revoked are walked through but not counted.
    pub async fn revoke_family(
        &self,
        record: &RefreshTokenRecord,
        reason: RevocationReason,
    ) -> Result<u64, TokenError> {
        let now = self.clock.now();
        let max_chain_length = self.policy.max_chain_length;

        let mut visited = HashSet::new();
        let mut next = Some(record.id);
        let mut revoked = 0u64;

        while let Some(id) = next {
            if !visited.insert(id) {
                warn!(root = %record.id, record_id = %id, "Cycle in token chain");
                metrics::record_revoked(reason.as_str(), revoked);
                return Err(TokenError::ChainCorrupted(format!("cycle at record {id}")));
            }
            if visited.len() > max_chain_length {
                warn!(root = %record.id, max_chain_length, "Token chain exceeds maximum length");
                metrics::record_revoked(reason.as_str(), revoked);
                return Err(TokenError::ChainCorrupted(format!(
                    "chain from {} longer than {max_chain_length}",
                    record.id
                )));
            }

            // A missing link was swept after expiring; nothing beyond it can be valid.
            let Some(outcome) = self.store.revoke(id, now).await? else {
                break;
            };
            if outcome.newly_revoked {
                revoked += 1;
            }
            next = outcome.record.replaced_by;
        }

        metrics::record_revoked(reason.as_str(), revoked);
        info!(
            identity_id = %record.identity_id,
            root = %record.id,
            chain_length = visited.len(),
            count = revoked,
            reason = %reason,
            "Revoked token family"
        );

        Ok(revoked)
    }

    /// Revoke every currently valid token of an identity.
    pub async fn revoke_all(&self, identity_id: &str) -> Result<u64, TokenError> {
        validate_identity(identity_id)?;

        let count = self
            .store
            .revoke_all_for_identity(identity_id, self.clock.now())
            .await?;

        metrics::record_revoked(RevocationReason::LogoutAll.as_str(), count);
        info!(identity_id = %identity_id, count, "Revoked all sessions");

        Ok(count)
    }
}
