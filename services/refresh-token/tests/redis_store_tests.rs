//! Redis store integration tests.
//!
//! Require a running Redis; run with `cargo test -- --ignored`. Each test
//! uses its own key prefix.

use chrono::{Duration, Utc};
use refresh_token_service::storage::{RedisStore, RefreshTokenStore, RotationCommit};
use refresh_token_service::{RefreshTokenRecord, TokenError};

async fn create_store() -> RedisStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisStore::new(&url, format!("refresh-test-{}", uuid::Uuid::new_v4()))
        .await
        .unwrap()
}

fn record(jti: &str, identity: &str, ttl: Duration) -> RefreshTokenRecord {
    let now = Utc::now();
    RefreshTokenRecord::new(jti.to_string(), identity.to_string(), now, now + ttl)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_save_and_find() {
    let store = create_store().await;

    let saved = store.save(record("a", "u", Duration::hours(1))).await.unwrap();
    assert!(saved.sequence > 0);

    let by_jti = store.find_by_jti("a").await.unwrap().unwrap();
    assert_eq!(by_jti, saved);
    assert_eq!(store.find_by_id(saved.id).await.unwrap(), Some(saved));
    assert!(store.find_by_jti("missing").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_jti_rejected() {
    let store = create_store().await;
    store.save(record("dup", "u", Duration::hours(1))).await.unwrap();

    let result = store.save(record("dup", "v", Duration::hours(1))).await;

    assert!(matches!(result, Err(TokenError::StorageConflict(_))));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_find_valid_oldest_first() {
    let store = create_store().await;
    let first = store.save(record("a", "u", Duration::hours(1))).await.unwrap();
    let second = store.save(record("b", "u", Duration::hours(1))).await.unwrap();
    let revoked = store.save(record("c", "u", Duration::hours(1))).await.unwrap();
    store.revoke(revoked.id, Utc::now()).await.unwrap();
    store.save(record("d", "u", Duration::seconds(-1))).await.unwrap();

    let valid: Vec<_> = store
        .find_valid("u", Utc::now())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(valid, vec![first.id, second.id]);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_commit_rotation_is_single_use() {
    let store = create_store().await;
    let predecessor = store.save(record("p", "u", Duration::hours(1))).await.unwrap();

    let first = store
        .commit_rotation(predecessor.id, record("s1", "u", Duration::hours(1)), Utc::now())
        .await
        .unwrap();
    let RotationCommit::Committed(successor) = first else {
        panic!("first rotation must commit");
    };

    let second = store
        .commit_rotation(predecessor.id, record("s2", "u", Duration::hours(1)), Utc::now())
        .await
        .unwrap();
    assert_eq!(second, RotationCommit::Conflict);
    assert!(store.find_by_jti("s2").await.unwrap().is_none());

    let predecessor = store.find_by_id(predecessor.id).await.unwrap().unwrap();
    assert!(predecessor.revoked);
    assert_eq!(predecessor.replaced_by, Some(successor.id));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_commit_rotation_rejects_duplicate_jti() {
    let store = create_store().await;
    store.save(record("taken", "u", Duration::hours(1))).await.unwrap();
    let predecessor = store.save(record("p", "u", Duration::hours(1))).await.unwrap();

    let result = store
        .commit_rotation(predecessor.id, record("taken", "u", Duration::hours(1)), Utc::now())
        .await;

    assert!(matches!(result, Err(TokenError::StorageConflict(_))));
    let predecessor = store.find_by_id(predecessor.id).await.unwrap().unwrap();
    assert!(!predecessor.revoked);
    assert!(predecessor.replaced_by.is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_commit_rotation_rejects_second_parent() {
    let store = create_store().await;
    let first = store.save(record("p1", "u", Duration::hours(1))).await.unwrap();
    let second = store.save(record("p2", "u", Duration::hours(1))).await.unwrap();

    let successor = record("s", "u", Duration::hours(1));
    let mut twin = record("twin", "u", Duration::hours(1));
    twin.id = successor.id;

    let committed = store
        .commit_rotation(first.id, successor, Utc::now())
        .await
        .unwrap();
    assert!(matches!(committed, RotationCommit::Committed(_)));

    let result = store.commit_rotation(second.id, twin, Utc::now()).await;

    assert!(matches!(result, Err(TokenError::StorageConflict(_))));
    assert!(store.find_by_jti("twin").await.unwrap().is_none());
    assert!(!store.find_by_id(second.id).await.unwrap().unwrap().revoked);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_saved_link_claims_its_target() {
    let store = create_store().await;
    let target = uuid::Uuid::new_v4();

    let mut first = record("a", "u", Duration::hours(1));
    first.replaced_by = Some(target);
    store.save(first).await.unwrap();

    let mut second = record("b", "u", Duration::hours(1));
    second.replaced_by = Some(target);
    let result = store.save(second).await;

    assert!(matches!(result, Err(TokenError::StorageConflict(_))));
    assert!(store.find_by_jti("b").await.unwrap().is_none());

    let predecessor = store.save(record("p", "u", Duration::hours(1))).await.unwrap();
    let mut claimed = record("s", "u", Duration::hours(1));
    claimed.id = target;
    let result = store.commit_rotation(predecessor.id, claimed, Utc::now()).await;
    assert!(matches!(result, Err(TokenError::StorageConflict(_))));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_revoke_reports_change_once() {
    let store = create_store().await;
    let saved = store.save(record("a", "u", Duration::hours(1))).await.unwrap();

    let first = store.revoke(saved.id, Utc::now()).await.unwrap().unwrap();
    let second = store.revoke(saved.id, Utc::now()).await.unwrap().unwrap();

    assert!(first.newly_revoked);
    assert!(first.record.revoked);
    assert!(!second.newly_revoked);
    assert!(store.revoke(uuid::Uuid::new_v4(), Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_revoke_all_and_sweep() {
    let store = create_store().await;
    for jti in ["a", "b", "c"] {
        store.save(record(jti, "u", Duration::hours(1))).await.unwrap();
    }
    store.save(record("old", "u", Duration::seconds(-5))).await.unwrap();
    store.save(record("other-old", "v", Duration::seconds(-5))).await.unwrap();

    assert_eq!(store.revoke_all_for_identity("u", Utc::now()).await.unwrap(), 3);
    assert_eq!(store.revoke_all_for_identity("u", Utc::now()).await.unwrap(), 0);

    assert_eq!(store.delete_expired_for_identity("u", Utc::now()).await.unwrap(), 1);
    assert!(store.find_by_jti("other-old").await.unwrap().is_some());
    assert_eq!(store.delete_expired(Utc::now()).await.unwrap(), 1);
    assert!(store.find_by_jti("other-old").await.unwrap().is_none());
    assert!(store.find_by_jti("a").await.unwrap().is_some());
}
