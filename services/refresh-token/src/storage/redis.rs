//! Redis-backed record store for multi-instance deployments.
//!
//! Every mutation that has to be exclusive runs as a Lua script, so the
//! check and the write happen in one step on the server.
//!
//! Key layout under `{prefix}`:
//! - `record:{id}`      JSON encoded [`RefreshTokenRecord`]
//! - `jti:{jti}`        record id, enforces `jti` uniqueness
//! - `successor:{id}`   predecessor id, enforces one parent per record
//! - `identity:{sub}`   sorted set of record ids scored by sequence
//! - `expiry`           sorted set of record ids scored by expiry millis
//! - `sequence`         insertion counter
//!
//! The delete scripts build record-specific keys server side, so the store
//! targets a single Redis node or a replicated primary, not Redis Cluster.

use crate::error::TokenError;
use crate::refresh::RefreshTokenRecord;
use crate::storage::{RefreshTokenStore, RevokeOutcome, RotationCommit};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{error, info};
use uuid::Uuid;

/// Maximum records deleted per sweep script call.
const SWEEP_BATCH: usize = 500;

/// KEYS[1] = record key
/// KEYS[2] = jti key
/// KEYS[3] = identity set
/// KEYS[4] = expiry set
/// KEYS[5] = marker key of the `replaced_by` target, when set
/// ARGV[1] = record json
/// ARGV[2] = record id
/// ARGV[3] = sequence
/// ARGV[4] = expiry millis
///
/// Returns 1 when stored, 0 when the jti is taken, -2 when the
/// `replaced_by` target already has a parent.
const SAVE_SCRIPT: &str = r"
    if redis.call('EXISTS', KEYS[2]) == 1 then
        return 0
    end
    if KEYS[5] and redis.call('EXISTS', KEYS[5]) == 1 then
        return -2
    end
    redis.call('SET', KEYS[1], ARGV[1])
    redis.call('SET', KEYS[2], ARGV[2])
    redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
    redis.call('ZADD', KEYS[4], ARGV[4], ARGV[2])
    if KEYS[5] then
        redis.call('SET', KEYS[5], ARGV[2])
    end
    return 1
";

/// KEYS[1] = predecessor record key
/// KEYS[2] = successor record key
/// KEYS[3] = successor jti key
/// KEYS[4] = successor marker key
/// KEYS[5] = identity set
/// KEYS[6] = expiry set
/// ARGV[1] = successor json
/// ARGV[2] = successor id
/// ARGV[3] = successor sequence
/// ARGV[4] = successor expiry millis
/// ARGV[5] = predecessor id
/// ARGV[6] = now rfc3339
/// ARGV[7] = now millis
///
/// Returns 1 committed, 0 predecessor not rotatable, -1 jti taken,
/// -2 successor already has a parent.
const ROTATE_SCRIPT: &str = r"
    local raw = redis.call('GET', KEYS[1])
    if not raw then
        return 0
    end
    local predecessor = cjson.decode(raw)
    if predecessor.revoked then
        return 0
    end
    local replaced = predecessor.replaced_by
    if replaced ~= nil and replaced ~= cjson.null then
        return 0
    end
    local expiry = redis.call('ZSCORE', KEYS[6], ARGV[5])
    if not expiry or tonumber(expiry) <= tonumber(ARGV[7]) then
        return 0
    end
    if redis.call('EXISTS', KEYS[3]) == 1 then
        return -1
    end
    if redis.call('EXISTS', KEYS[4]) == 1 then
        return -2
    end
    predecessor.revoked = true
    predecessor.replaced_by = ARGV[2]
    predecessor.updated_at = ARGV[6]
    redis.call('SET', KEYS[1], cjson.encode(predecessor))
    redis.call('SET', KEYS[2], ARGV[1])
    redis.call('SET', KEYS[3], ARGV[2])
    redis.call('SET', KEYS[4], ARGV[5])
    redis.call('ZADD', KEYS[5], ARGV[3], ARGV[2])
    redis.call('ZADD', KEYS[6], ARGV[4], ARGV[2])
    return 1
";

/// KEYS[1] = record key
/// ARGV[1] = now rfc3339
///
/// Returns {changed, record json after the update}, or nil when absent.
const REVOKE_SCRIPT: &str = r"
    local raw = redis.call('GET', KEYS[1])
    if not raw then
        return false
    end
    local record = cjson.decode(raw)
    if record.revoked then
        return {0, raw}
    end
    record.revoked = true
    record.updated_at = ARGV[1]
    local encoded = cjson.encode(record)
    redis.call('SET', KEYS[1], encoded)
    return {1, encoded}
";

/// KEYS[1] = identity set
/// KEYS[2] = expiry set
/// ARGV[1] = key prefix
/// ARGV[2] = now rfc3339
/// ARGV[3] = now millis
///
/// Returns the number of records revoked.
const REVOKE_ALL_SCRIPT: &str = r"
    local ids = redis.call('ZRANGE', KEYS[1], 0, -1)
    local now = tonumber(ARGV[3])
    local count = 0
    for _, id in ipairs(ids) do
        local expiry = redis.call('ZSCORE', KEYS[2], id)
        if expiry and tonumber(expiry) > now then
            local key = ARGV[1] .. ':record:' .. id
            local raw = redis.call('GET', key)
            if raw then
                local record = cjson.decode(raw)
                if not record.revoked then
                    record.revoked = true
                    record.updated_at = ARGV[2]
                    redis.call('SET', key, cjson.encode(record))
                    count = count + 1
                end
            end
        end
    end
    return count
";

/// KEYS[1] = expiry set
/// ARGV[1] = key prefix
/// ARGV[2] = now millis
/// ARGV[3] = batch size
///
/// Returns {fetched, deleted}.
const SWEEP_SCRIPT: &str = r"
    local prefix = ARGV[1]
    local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[2], 'LIMIT', 0, tonumber(ARGV[3]))
    local deleted = 0
    for _, id in ipairs(ids) do
        local key = prefix .. ':record:' .. id
        local raw = redis.call('GET', key)
        if raw then
            local record = cjson.decode(raw)
            redis.call('DEL', prefix .. ':jti:' .. record.jti)
            redis.call('ZREM', prefix .. ':identity:' .. record.identity_id, id)
            redis.call('DEL', key)
            deleted = deleted + 1
        end
        redis.call('DEL', prefix .. ':successor:' .. id)
        redis.call('ZREM', KEYS[1], id)
    end
    return {#ids, deleted}
";

/// KEYS[1] = identity set
/// KEYS[2] = expiry set
/// ARGV[1] = key prefix
/// ARGV[2] = now millis
///
/// Returns the number of records deleted.
const SWEEP_IDENTITY_SCRIPT: &str = r"
    local prefix = ARGV[1]
    local now = tonumber(ARGV[2])
    local ids = redis.call('ZRANGE', KEYS[1], 0, -1)
    local deleted = 0
    for _, id in ipairs(ids) do
        local expiry = redis.call('ZSCORE', KEYS[2], id)
        if not expiry or tonumber(expiry) < now then
            local key = prefix .. ':record:' .. id
            local raw = redis.call('GET', key)
            if raw then
                local record = cjson.decode(raw)
                redis.call('DEL', prefix .. ':jti:' .. record.jti)
                redis.call('DEL', key)
                deleted = deleted + 1
            end
            redis.call('DEL', prefix .. ':successor:' .. id)
            redis.call('ZREM', KEYS[2], id)
            redis.call('ZREM', KEYS[1], id)
        end
    end
    return deleted
";

struct Scripts {
    save: Script,
    rotate: Script,
    revoke: Script,
    revoke_all: Script,
    sweep: Script,
    sweep_identity: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            save: Script::new(SAVE_SCRIPT),
            rotate: Script::new(ROTATE_SCRIPT),
            revoke: Script::new(REVOKE_SCRIPT),
            revoke_all: Script::new(REVOKE_ALL_SCRIPT),
            sweep: Script::new(SWEEP_SCRIPT),
            sweep_identity: Script::new(SWEEP_IDENTITY_SCRIPT),
        }
    }
}

/// Redis implementation of [`RefreshTokenStore`].
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    scripts: Scripts,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or connected.
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, TokenError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TokenError::storage(format!("Redis client creation failed: {e}")))?;

        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| TokenError::storage(format!("Redis connection failed: {e}")))?;

        let prefix = prefix.into();
        info!(prefix = %prefix, "Redis refresh token store connected");

        Ok(Self {
            conn,
            prefix,
            scripts: Scripts::load(),
        })
    }

    fn record_key(&self, id: Uuid) -> String {
        format!("{}:record:{}", self.prefix, id)
    }

    fn jti_key(&self, jti: &str) -> String {
        format!("{}:jti:{}", self.prefix, jti)
    }

    fn successor_key(&self, id: Uuid) -> String {
        format!("{}:successor:{}", self.prefix, id)
    }

    fn identity_key(&self, identity_id: &str) -> String {
        format!("{}:identity:{}", self.prefix, identity_id)
    }

    fn expiry_key(&self) -> String {
        format!("{}:expiry", self.prefix)
    }

    fn sequence_key(&self) -> String {
        format!("{}:sequence", self.prefix)
    }

    async fn next_sequence(&self) -> Result<u64, TokenError> {
        let mut conn = self.conn.clone();
        let sequence: u64 = conn.incr(self.sequence_key(), 1).await?;
        Ok(sequence)
    }

    async fn load(&self, key: String) -> Result<Option<RefreshTokenRecord>, TokenError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|json| decode_record(&json)).transpose()
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, TokenError> {
        let mut conn = self.conn.clone();
        let mut total = 0u64;

        loop {
            let (fetched, deleted): (usize, u64) = self
                .scripts
                .sweep
                .key(self.expiry_key())
                .arg(&self.prefix)
                .arg(now.timestamp_millis())
                .arg(SWEEP_BATCH)
                .invoke_async(&mut conn)
                .await?;

            total += deleted;
            if fetched < SWEEP_BATCH {
                break;
            }
        }

        Ok(total)
    }
}

fn encode_record(record: &RefreshTokenRecord) -> Result<String, TokenError> {
    Ok(serde_json::to_string(record)?)
}

fn decode_record(json: &str) -> Result<RefreshTokenRecord, TokenError> {
    serde_json::from_str(json).map_err(|e| {
        error!(error = %e, "Corrupted refresh token record in Redis");
        TokenError::from(e)
    })
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl RefreshTokenStore for RedisStore {
    async fn find_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>, TokenError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(self.jti_key(jti)).await?;

        match id {
            Some(id) => {
                let id = Uuid::parse_str(&id)
                    .map_err(|e| TokenError::storage(format!("Invalid record id in jti index: {e}")))?;
                self.find_by_id(id).await
            }
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, TokenError> {
        self.load(self.record_key(id)).await
    }

    async fn find_valid(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, TokenError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.identity_key(identity_id), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}:record:{}", self.prefix, id))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut valid = Vec::with_capacity(raw.len());
        for json in raw.into_iter().flatten() {
            let record = decode_record(&json)?;
            if record.is_valid_at(now) {
                valid.push(record);
            }
        }
        valid.sort_by_key(RefreshTokenRecord::age_key);
        Ok(valid)
    }

    async fn save(&self, mut record: RefreshTokenRecord) -> Result<RefreshTokenRecord, TokenError> {
        record.sequence = self.next_sequence().await?;
        let json = encode_record(&record)?;

        let mut invocation = self.scripts.save.key(self.record_key(record.id));
        invocation
            .key(self.jti_key(&record.jti))
            .key(self.identity_key(&record.identity_id))
            .key(self.expiry_key())
            .arg(json)
            .arg(record.id.to_string())
            .arg(record.sequence)
            .arg(record.expires_at.timestamp_millis());
        if let Some(target) = record.replaced_by {
            invocation.key(self.successor_key(target));
        }

        let mut conn = self.conn.clone();
        let stored: i64 = invocation.invoke_async(&mut conn).await?;

        match (stored, record.replaced_by) {
            (1, _) => Ok(record),
            (0, _) => Err(TokenError::StorageConflict(format!("duplicate jti {}", record.jti))),
            (-2, Some(target)) => Err(TokenError::StorageConflict(format!(
                "record {target} already replaces another record"
            ))),
            (other, _) => Err(TokenError::storage(format!(
                "Unexpected save script result: {other}"
            ))),
        }
    }

    async fn commit_rotation(
        &self,
        predecessor_id: Uuid,
        mut successor: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotationCommit, TokenError> {
        successor.sequence = self.next_sequence().await?;
        let json = encode_record(&successor)?;

        let mut conn = self.conn.clone();
        let outcome: i64 = self
            .scripts
            .rotate
            .key(self.record_key(predecessor_id))
            .key(self.record_key(successor.id))
            .key(self.jti_key(&successor.jti))
            .key(self.successor_key(successor.id))
            .key(self.identity_key(&successor.identity_id))
            .key(self.expiry_key())
            .arg(json)
            .arg(successor.id.to_string())
            .arg(successor.sequence)
            .arg(successor.expires_at.timestamp_millis())
            .arg(predecessor_id.to_string())
            .arg(timestamp(now))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(RotationCommit::Committed(successor)),
            0 => Ok(RotationCommit::Conflict),
            -1 => Err(TokenError::StorageConflict(format!(
                "duplicate jti {}",
                successor.jti
            ))),
            -2 => Err(TokenError::StorageConflict(format!(
                "record {} already replaces another record",
                successor.id
            ))),
            other => Err(TokenError::storage(format!(
                "Unexpected rotation script result: {other}"
            ))),
        }
    }

    async fn revoke(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RevokeOutcome>, TokenError> {
        let mut conn = self.conn.clone();
        let raw: Option<(i64, String)> = self
            .scripts
            .revoke
            .key(self.record_key(id))
            .arg(timestamp(now))
            .invoke_async(&mut conn)
            .await?;

        raw.map(|(changed, json)| {
            Ok(RevokeOutcome {
                record: decode_record(&json)?,
                newly_revoked: changed == 1,
            })
        })
        .transpose()
    }

    async fn revoke_all_for_identity(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenError> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .scripts
            .revoke_all
            .key(self.identity_key(identity_id))
            .key(self.expiry_key())
            .arg(&self.prefix)
            .arg(timestamp(now))
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenError> {
        self.sweep(now).await
    }

    async fn delete_expired_for_identity(
        &self,
        identity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenError> {
        let mut conn = self.conn.clone();
        let deleted: u64 = self
            .scripts
            .sweep_identity
            .key(self.identity_key(identity_id))
            .key(self.expiry_key())
            .arg(&self.prefix)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted)
    }
}
