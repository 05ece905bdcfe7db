//! Single-process record store.
//!
//! Each operation runs under one write lock, which gives the same atomicity
//! the Redis scripts provide across instances.

use crate::error::TokenError;
use crate::refresh::RefreshTokenRecord;
use crate::storage::{RefreshTokenStore, RevokeOutcome, RotationCommit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    records: HashMap<Uuid, RefreshTokenRecord>,
    by_jti: HashMap<String, Uuid>,
    /// Ids that are already some record's `replaced_by` target.
    successors: HashSet<Uuid>,
    next_sequence: u64,
}

impl State {
    fn insert(&mut self, mut record: RefreshTokenRecord) -> Result<RefreshTokenRecord, TokenError> {
        if self.by_jti.contains_key(&record.jti) {
            return Err(TokenError::StorageConflict(format!(
                "duplicate jti {}",
                record.jti
            )));
        }
        if self.records.contains_key(&record.id) {
            return Err(TokenError::StorageConflict(format!(
                "duplicate record id {}",
                record.id
            )));
        }

        self.next_sequence += 1;
        record.sequence = self.next_sequence;
        self.by_jti.insert(record.jti.clone(), record.id);
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn remove(&mut self, id: Uuid) {
        if let Some(record) = self.records.remove(&id) {
            self.by_jti.remove(&record.jti);
            self.successors.remove(&id);
        }
    }

    fn remove_where<F>(&mut self, predicate: F) -> u64
    where
        F: Fn(&RefreshTokenRecord) -> bool,
    {
        let doomed: Vec<Uuid> = self
            .records
            .values()
            .filter(|record| predicate(record))
            .map(|record| record.id)
            .collect();

        for id in &doomed {
            self.remove(*id);
        }
        doomed.len() as u64
    }
}

fn second_parent(id: Uuid) -> TokenError {
    TokenError::StorageConflict(format!("record {id} already replaces another record"))
}

/// In-memory [`RefreshTokenStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including revoked and expired ones.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Snapshot of every stored record, oldest first.
    pub async fn all(&self) -> Vec<RefreshTokenRecord> {
        let mut records: Vec<_> = self.state.read().await.records.values().cloned().collect();
        records.sort_by_key(RefreshTokenRecord::age_key);
        records
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn find_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>, TokenError> {
        let state = self.state.read().await;
        Ok(state
            .by_jti
            .get(jti)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, TokenError> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn find_valid(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, TokenError> {
        let state = self.state.read().await;
        let mut valid: Vec<_> = state
            .records
            .values()
            .filter(|record| record.identity_id == identity_id && record.is_valid_at(now))
            .cloned()
            .collect();
        valid.sort_by_key(RefreshTokenRecord::age_key);
        Ok(valid)
    }

    async fn save(&self, record: RefreshTokenRecord) -> Result<RefreshTokenRecord, TokenError> {
        let mut state = self.state.write().await;

        let target = record.replaced_by;
        if let Some(target) = target {
            if state.successors.contains(&target) {
                return Err(second_parent(target));
            }
        }

        let record = state.insert(record)?;
        if let Some(target) = target {
            state.successors.insert(target);
        }
        Ok(record)
    }

    async fn commit_rotation(
        &self,
        predecessor_id: Uuid,
        successor: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotationCommit, TokenError> {
        let mut state = self.state.write().await;

        let rotatable = state.records.get(&predecessor_id).is_some_and(|predecessor| {
            predecessor.replaced_by.is_none() && predecessor.is_valid_at(now)
        });
        if !rotatable {
            return Ok(RotationCommit::Conflict);
        }
        if state.successors.contains(&successor.id) {
            return Err(second_parent(successor.id));
        }

        let successor = state.insert(successor)?;
        state.successors.insert(successor.id);
        if let Some(predecessor) = state.records.get_mut(&predecessor_id) {
            predecessor.mark_replaced(successor.id, now);
        }

        Ok(RotationCommit::Committed(successor))
    }

    async fn revoke(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RevokeOutcome>, TokenError> {
        let mut state = self.state.write().await;
        Ok(state.records.get_mut(&id).map(|record| {
            let newly_revoked = record.revoke(now);
            RevokeOutcome {
                record: record.clone(),
                newly_revoked,
            }
        }))
    }

    async fn revoke_all_for_identity(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenError> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for record in state.records.values_mut() {
            if record.identity_id == identity_id && record.is_valid_at(now) && record.revoke(now) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenError> {
        Ok(self
            .state
            .write()
            .await
            .remove_where(|record| record.is_sweepable_at(now)))
    }

    async fn delete_expired_for_identity(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenError> {
        Ok(self.state.write().await.remove_where(|record| {
            record.identity_id == identity_id && record.is_sweepable_at(now)
        }))
    }
}
