//! Prometheus metrics for the refresh token service.

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_counter_vec, Counter, CounterVec};

/// Refresh tokens issued, including rotation successors.
pub static TOKENS_ISSUED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "refresh_tokens_issued_total",
        "Total number of refresh tokens issued"
    )
    .expect("Failed to register tokens_issued metric")
});

/// Rotation attempts by outcome.
pub static TOKENS_ROTATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "refresh_tokens_rotated_total",
        "Total number of refresh token rotation attempts",
        &["status"]
    )
    .expect("Failed to register tokens_rotated metric")
});

/// Records revoked, by reason.
pub static TOKENS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "refresh_tokens_revoked_total",
        "Total number of refresh token records revoked",
        &["reason"]
    )
    .expect("Failed to register tokens_revoked metric")
});

/// Revoked tokens presented again.
pub static REUSE_DETECTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "refresh_token_reuse_detected_total",
        "Total number of revoked refresh tokens presented again"
    )
    .expect("Failed to register reuse_detected metric")
});

/// Sessions evicted by the per-identity ceiling.
pub static SESSIONS_EVICTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "refresh_sessions_evicted_total",
        "Total number of sessions evicted by the session limit"
    )
    .expect("Failed to register sessions_evicted metric")
});

/// Expired records deleted.
pub static RECORDS_SWEPT: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "refresh_records_swept_total",
        "Total number of expired refresh token records deleted"
    )
    .expect("Failed to register records_swept metric")
});

/// Record a rotation outcome.
pub fn record_rotation(status: &str) {
    TOKENS_ROTATED.with_label_values(&[status]).inc();
}

/// Record revoked records for a reason.
#[allow(clippy::cast_precision_loss)]
pub fn record_revoked(reason: &str, count: u64) {
    if count > 0 {
        TOKENS_REVOKED.with_label_values(&[reason]).inc_by(count as f64);
    }
}

/// Record sessions evicted by the session limit.
#[allow(clippy::cast_precision_loss)]
pub fn record_evicted(count: u64) {
    if count > 0 {
        SESSIONS_EVICTED.inc_by(count as f64);
    }
}

/// Record deleted records.
#[allow(clippy::cast_precision_loss)]
pub fn record_swept(count: u64) {
    if count > 0 {
        RECORDS_SWEPT.inc_by(count as f64);
    }
}
