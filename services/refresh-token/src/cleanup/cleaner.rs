//! Expired record deletion.

use crate::clock::Clock;
use crate::error::TokenError;
use crate::metrics;
use crate::refresh::validate_identity;
use crate::storage::RefreshTokenStore;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Permanently deletes records whose expiry has passed, revoked or not.
#[derive(Clone)]
pub struct Cleaner {
    store: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleaner").finish()
    }
}

impl Cleaner {
    /// Cleaner over `store`, using `clock` for the cutoff.
    pub fn new(store: Arc<dyn RefreshTokenStore>, clock: Arc<dyn Clock>) -> Self {
        Cleaner { store, clock }
    }

    /// Delete every record with `expires_at < now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, TokenError> {
        let deleted = self.store.delete_expired(now).await?;
        metrics::record_swept(deleted);
        info!(count = deleted, "Expired refresh tokens swept");
        Ok(deleted)
    }

    /// Delete the expired records of one identity.
    pub async fn sweep_identity(&self, identity_id: &str, now: DateTime<Utc>) -> Result<u64, TokenError> {
        validate_identity(identity_id)?;

        let deleted = self.store.delete_expired_for_identity(identity_id, now).await?;
        metrics::record_swept(deleted);
        debug!(identity_id = %identity_id, count = deleted, "Expired refresh tokens swept for identity");
        Ok(deleted)
    }

    /// Sweep at the current time. Failures are logged, never returned.
    pub async fn run_once(&self) -> Option<u64> {
        match self.sweep(self.clock.now()).await {
            Ok(deleted) => Some(deleted),
            Err(e) => {
                error!(error = %e, "Refresh token cleanup failed");
                None
            }
        }
    }

    /// Identity sweep ahead of issuance. Failures must not block login.
    pub(crate) async fn sweep_identity_quietly(&self, identity_id: &str) {
        if let Err(e) = self.sweep_identity(identity_id, self.clock.now()).await {
            warn!(identity_id = %identity_id, error = %e, "Opportunistic cleanup failed");
        }
    }
}
