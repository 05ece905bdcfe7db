//! Stored refresh token state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted state of one refresh token.
///
/// Only `revoked` and `replaced_by` ever change after creation, and both
/// only move one way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Record identifier, the target of `replaced_by` links.
    pub id: Uuid,
    /// JWT ID of the token this record backs.
    pub jti: String,
    /// Subject the token was issued to.
    pub identity_id: String,
    /// Instant the token stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Once set, never cleared.
    pub revoked: bool,
    /// Successor issued when this token was rotated.
    pub replaced_by: Option<Uuid>,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Last revocation or replacement.
    pub updated_at: DateTime<Utc>,
    /// Insertion order assigned by the store. Breaks `created_at` ties.
    #[serde(default)]
    pub sequence: u64,
}

impl RefreshTokenRecord {
    /// A fresh, unrevoked record with a random id.
    pub fn new(
        jti: String,
        identity_id: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            jti,
            identity_id,
            expires_at,
            revoked: false,
            replaced_by: None,
            created_at,
            updated_at: created_at,
            sequence: 0,
        }
    }

    /// Expired at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Neither revoked nor expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    /// Eligible for deletion by the cleaner.
    pub fn is_sweepable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Mark revoked. Returns `false` if it already was.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        self.updated_at = now;
        true
    }

    /// Link to `successor` and revoke.
    pub fn mark_replaced(&mut self, successor: Uuid, now: DateTime<Utc>) {
        self.replaced_by = Some(successor);
        self.revoked = true;
        self.updated_at = now;
    }

    /// Oldest-first ordering key.
    pub fn age_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }
}
