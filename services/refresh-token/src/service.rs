//! Entry point that wires the refresh token components together.

use crate::cleanup::Cleaner;
use crate::clock::Clock;
use crate::config::TokenPolicy;
use crate::error::TokenError;
use crate::jwt::TokenSigner;
use crate::refresh::{FamilyRevoker, IssuedToken, RevocationReason, RotationEngine, TokenIssuer};
use crate::storage::RefreshTokenStore;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Login, refresh, logout and cleanup over one store, signer and clock.
pub struct RefreshTokenService {
    store: Arc<dyn RefreshTokenStore>,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
    issuer: Arc<TokenIssuer>,
    revoker: Arc<FamilyRevoker>,
    rotator: RotationEngine,
    cleaner: Cleaner,
}

impl RefreshTokenService {
    /// Build every component from shared dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Config`] if `policy` is invalid.
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        signer: Arc<dyn TokenSigner>,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
        issuer: impl Into<String>,
    ) -> Result<Self, TokenError> {
        policy.validate()?;

        let token_issuer = Arc::new(TokenIssuer::new(
            store.clone(),
            signer.clone(),
            clock.clone(),
            policy,
            issuer,
        ));
        let revoker = Arc::new(FamilyRevoker::new(store.clone(), clock.clone(), policy));
        let rotator = RotationEngine::new(
            store.clone(),
            signer.clone(),
            clock.clone(),
            token_issuer.clone(),
            revoker.clone(),
        );
        let cleaner = Cleaner::new(store.clone(), clock.clone());

        Ok(Self {
            store,
            signer,
            clock,
            issuer: token_issuer,
            revoker,
            rotator,
            cleaner,
        })
    }

    /// Issue a refresh token for a freshly authenticated identity.
    pub async fn login(&self, identity_id: &str) -> Result<IssuedToken, TokenError> {
        self.issuer.issue(identity_id).await
    }

    /// Rotate a refresh token.
    pub async fn refresh(&self, presented: &str) -> Result<IssuedToken, TokenError> {
        self.rotator.rotate(presented).await
    }

    /// End the session holding `presented`, including anything rotated from it.
    ///
    /// Unknown, expired or malformed tokens are ignored so logout can be
    /// repeated safely. Returns the number of records revoked.
    #[instrument(skip_all)]
    pub async fn logout(&self, presented: &str) -> Result<u64, TokenError> {
        if presented.trim().is_empty() {
            return Err(TokenError::validation("refresh token must not be blank"));
        }

        let claims = match self.signer.decode(presented) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = ?e, "Logout with undecodable token ignored");
                return Ok(0);
            }
        };
        let Some(jti) = claims.jti() else {
            debug!("Logout with token lacking jti ignored");
            return Ok(0);
        };
        let Some(record) = self.store.find_by_jti(jti).await? else {
            debug!(jti = %jti, "Logout with unknown token ignored");
            return Ok(0);
        };

        self.revoker
            .revoke_family(&record, RevocationReason::Logout)
            .await
    }

    /// Revoke every session of an identity.
    pub async fn logout_all(&self, identity_id: &str) -> Result<u64, TokenError> {
        self.revoker.revoke_all(identity_id).await
    }

    /// Delete all expired records now.
    pub async fn sweep(&self) -> Result<u64, TokenError> {
        self.cleaner.sweep(self.clock.now()).await
    }

    /// Cleaner sharing this service's store, for the cleanup scheduler.
    #[must_use]
    pub fn cleaner(&self) -> Cleaner {
        self.cleaner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jwt::HmacSigner;
    use crate::storage::InMemoryStore;

    const SECRET: &[u8] = b"service-test-secret-key-32-bytes!!";

    fn service(max_sessions: u32) -> (RefreshTokenService, Arc<InMemoryStore>, ManualClock) {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        let service = RefreshTokenService::new(
            store.clone(),
            Arc::new(HmacSigner::new(SECRET, "auth-platform")),
            Arc::new(clock.clone()),
            TokenPolicy::default().with_max_sessions(max_sessions),
            "auth-platform",
        )
        .unwrap();
        (service, store, clock)
    }

    #[tokio::test]
    async fn test_login_refresh_logout() {
        let (service, store, _clock) = service(5);

        let first = service.login("u").await.unwrap();
        let second = service.refresh(&first.token).await.unwrap();
        assert_eq!(service.logout(&second.token).await.unwrap(), 1);

        assert!(store.find_by_id(second.record.id).await.unwrap().unwrap().revoked);
        assert!(service.refresh(&second.token).await.is_err());
    }

    #[tokio::test]
    async fn test_logout_from_old_token_revokes_descendants() {
        let (service, store, _clock) = service(5);

        let first = service.login("u").await.unwrap();
        let second = service.refresh(&first.token).await.unwrap();

        service.logout(&first.token).await.unwrap();

        assert!(store.find_by_id(second.record.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, _store, _clock) = service(5);
        let issued = service.login("u").await.unwrap();

        assert_eq!(service.logout(&issued.token).await.unwrap(), 1);
        assert_eq!(service.logout(&issued.token).await.unwrap(), 0);
        assert_eq!(service.logout("garbage").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_logout_rejects_blank() {
        let (service, _store, _clock) = service(5);

        assert!(matches!(
            service.logout(" ").await,
            Err(TokenError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_all_scenario() {
        let (service, store, clock) = service(5);
        for _ in 0..3 {
            service.login("u").await.unwrap();
        }

        assert_eq!(service.logout_all("u").await.unwrap(), 3);
        assert_eq!(service.logout_all("u").await.unwrap(), 0);
        assert!(store.find_valid("u", clock.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_after_expiry() {
        let (service, store, clock) = service(5);
        service.login("u").await.unwrap();
        service.login("v").await.unwrap();

        assert_eq!(service.sweep().await.unwrap(), 0);
        clock.advance(TokenPolicy::default().ttl().unwrap() + chrono::Duration::seconds(1));
        assert_eq!(service.sweep().await.unwrap(), 2);
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let result = RefreshTokenService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HmacSigner::new(SECRET, "auth-platform")),
            Arc::new(ManualClock::starting_now()),
            TokenPolicy::default().with_max_sessions(0),
            "auth-platform",
        );

        assert!(matches!(result, Err(TokenError::Config(_))));
    }
}
