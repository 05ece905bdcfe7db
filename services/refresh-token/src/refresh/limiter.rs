//! Per-identity session ceiling.
//!
//! The count-then-evict sequence is not atomic with concurrent issuance for
//! the same identity, so the ceiling is soft: under heavy concurrency an
//! identity can briefly hold a few more valid tokens than the maximum.

use crate::clock::Clock;
use crate::config::TokenPolicy;
use crate::error::TokenError;
use crate::metrics;
use crate::refresh::family::RevocationReason;
use crate::refresh::validate_identity;
use crate::storage::RefreshTokenStore;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Caps the number of concurrently valid tokens per identity.
pub struct SessionLimiter {
    store: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
}

impl SessionLimiter {
    /// Limiter enforcing `policy.max_sessions_per_identity`.
    pub fn new(store: Arc<dyn RefreshTokenStore>, clock: Arc<dyn Clock>, policy: TokenPolicy) -> Self {
        SessionLimiter {
            store,
            clock,
            policy,
        }
    }

    /// Make room for one more session, revoking the oldest valid tokens.
    ///
    /// Returns the number of sessions evicted.
    pub async fn enforce(&self, identity_id: &str) -> Result<u64, TokenError> {
        self.enforce_excluding(identity_id, None).await
    }

    /// Same as [`enforce`](Self::enforce), but leaves `replacing` out of the
    /// count. Rotation passes its predecessor here since it stops being
    /// valid once the successor is committed.
    pub async fn enforce_excluding(
        &self,
        identity_id: &str,
        replacing: Option<Uuid>,
    ) -> Result<u64, TokenError> {
        validate_identity(identity_id)?;

        let now = self.clock.now();
        let mut valid: Vec<_> = self
            .store
            .find_valid(identity_id, now)
            .await?
            .into_iter()
            .filter(|record| Some(record.id) != replacing)
            .collect();

        let max = self.policy.max_sessions_per_identity as usize;
        if valid.len() < max {
            debug!(identity_id = %identity_id, active = valid.len(), max, "Session limit not reached");
            return Ok(0);
        }

        valid.sort_by_key(|record| record.age_key());
        let excess = valid.len() - max + 1;

        let mut evicted = 0u64;
        for record in valid.iter().take(excess) {
            let outcome = self.store.revoke(record.id, now).await?;
            if outcome.is_some_and(|outcome| outcome.newly_revoked) {
                evicted += 1;
                info!(
                    identity_id = %identity_id,
                    record_id = %record.id,
                    created_at = %record.created_at,
                    "Evicted oldest session"
                );
            }
        }

        metrics::record_evicted(evicted);
        metrics::record_revoked(RevocationReason::SessionLimit.as_str(), evicted);

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::refresh::RefreshTokenRecord;
    use crate::storage::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: ManualClock,
        limiter: SessionLimiter,
    }

    fn fixture(max_sessions: u32) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        let policy = TokenPolicy::default().with_max_sessions(max_sessions);
        let limiter = SessionLimiter::new(store.clone(), Arc::new(clock.clone()), policy);
        Fixture {
            store,
            clock,
            limiter,
        }
    }

    async fn seed(fixture: &Fixture, jti: &str, identity: &str) -> RefreshTokenRecord {
        let now = fixture.clock.now();
        let record = RefreshTokenRecord::new(
            jti.to_string(),
            identity.to_string(),
            now,
            now + chrono::Duration::hours(1),
        );
        let saved = fixture.store.save(record).await.unwrap();
        fixture.clock.advance(chrono::Duration::seconds(1));
        saved
    }

    #[tokio::test]
    async fn test_below_limit_evicts_nothing() {
        let f = fixture(3);
        seed(&f, "a", "u").await;
        seed(&f, "b", "u").await;

        assert_eq!(f.limiter.enforce("u").await.unwrap(), 0);
        assert_eq!(f.store.find_valid("u", f.clock.now()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_at_limit_evicts_oldest() {
        let f = fixture(2);
        let oldest = seed(&f, "a", "u").await;
        let newer = seed(&f, "b", "u").await;

        assert_eq!(f.limiter.enforce("u").await.unwrap(), 1);

        let valid = f.store.find_valid("u", f.clock.now()).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].id, newer.id);
        assert!(f.store.find_by_id(oldest.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_over_limit_evicts_down_to_room_for_one() {
        let f = fixture(2);
        for jti in ["a", "b", "c", "d"] {
            seed(&f, jti, "u").await;
        }

        assert_eq!(f.limiter.enforce("u").await.unwrap(), 3);
        assert_eq!(f.store.find_valid("u", f.clock.now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ties_broken_by_insertion_order() {
        let f = fixture(2);
        let now = f.clock.now();
        let mut ids = Vec::new();
        for jti in ["a", "b"] {
            let record = RefreshTokenRecord::new(
                jti.to_string(),
                "u".to_string(),
                now,
                now + chrono::Duration::hours(1),
            );
            ids.push(f.store.save(record).await.unwrap().id);
        }

        f.limiter.enforce("u").await.unwrap();

        assert!(f.store.find_by_id(ids[0]).await.unwrap().unwrap().revoked);
        assert!(!f.store.find_by_id(ids[1]).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_other_identities_untouched() {
        let f = fixture(1);
        seed(&f, "a", "u").await;
        let other = seed(&f, "b", "other").await;

        f.limiter.enforce("u").await.unwrap();

        assert!(!f.store.find_by_id(other.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_excluded_record_is_not_counted_or_evicted() {
        let f = fixture(2);
        let rotating = seed(&f, "a", "u").await;
        seed(&f, "b", "u").await;

        assert_eq!(f.limiter.enforce_excluding("u", Some(rotating.id)).await.unwrap(), 0);
        assert!(!f.store.find_by_id(rotating.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_blank_identity_rejected() {
        let f = fixture(1);
        assert!(matches!(
            f.limiter.enforce("  ").await,
            Err(TokenError::Validation(_))
        ));
    }
}
