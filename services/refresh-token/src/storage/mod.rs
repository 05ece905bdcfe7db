//! Persistence for refresh token records.
//!
//! The store is the only concurrency control for rotation: every mutation
//! that must be exclusive is a single conditional update inside the store,
//! so several service instances can share one backend.

pub mod memory;
pub mod redis;

use crate::error::TokenError;
use crate::refresh::RefreshTokenRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Outcome of an atomic rotation commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationCommit {
    /// Successor stored and predecessor marked replaced.
    Committed(RefreshTokenRecord),
    /// Predecessor was missing, expired, revoked or already replaced.
    Conflict,
}

/// Result of revoking one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    /// Record state after the update.
    pub record: RefreshTokenRecord,
    /// False when the record was already revoked.
    pub newly_revoked: bool,
}

/// Record store used by every refresh token component.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Look up a record by token identifier.
    async fn find_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>, TokenError>;

    /// Look up a record by primary key.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, TokenError>;

    /// Records of `identity_id` valid at `now`, oldest first.
    async fn find_valid(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, TokenError>;

    /// Insert a new record and return it with its assigned sequence.
    ///
    /// Fails with [`TokenError::StorageConflict`] on a duplicate `jti`, or
    /// when `replaced_by` names a record that already has a parent. A
    /// stored `replaced_by` claims its target like a committed rotation.
    async fn save(&self, record: RefreshTokenRecord) -> Result<RefreshTokenRecord, TokenError>;

    /// Atomically insert `successor` and mark `predecessor_id` revoked and
    /// replaced by it.
    ///
    /// Succeeds only while the predecessor is unrevoked, unreplaced and
    /// unexpired at `now`. A successor that reuses a `jti` or is already
    /// some record's replacement fails with [`TokenError::StorageConflict`].
    async fn commit_rotation(
        &self,
        predecessor_id: Uuid,
        successor: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotationCommit, TokenError>;

    /// Set `revoked` on one record and return its state after the update.
    ///
    /// Returns `None` if the record does not exist.
    async fn revoke(&self, id: Uuid, now: DateTime<Utc>)
        -> Result<Option<RevokeOutcome>, TokenError>;

    /// Revoke every record of `identity_id` valid at `now`.
    async fn revoke_all_for_identity(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenError>;

    /// Delete every record with `expires_at < now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenError>;

    /// Delete the records of `identity_id` with `expires_at < now`.
    async fn delete_expired_for_identity(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenError>;
}
