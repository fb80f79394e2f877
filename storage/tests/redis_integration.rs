//! Integration tests against a live Redis at 127.0.0.1:6379.
//!
//! Run with `cargo test -p storage -- --ignored` when a server is up.

use std::collections::HashSet;
use std::time::Duration;
use storage::{DistributedLock, ReadAffinity, RedisConfig, RedisStore};

fn test_config() -> RedisConfig {
    RedisConfig {
        uri: "redis://127.0.0.1:6379".to_string(),
        read_uri: None,
        cluster: false,
        prefix: format!("pennant-test-{}", std::process::id()),
        read_affinity: ReadAffinity::Replica,
        connect_timeout_secs: 2,
        operation_timeout_secs: 2,
    }
}

async fn connect() -> RedisStore {
    RedisStore::connect(&test_config())
        .await
        .expect("redis must be running for integration tests")
}

fn set_of(members: &[&str]) -> HashSet<String> {
    members.iter().map(|m| m.to_string()).collect()
}

#[tokio::test]
#[ignore]
async fn scalar_roundtrip() {
    let store = connect().await;
    let key = store.keys().lock("scalar-roundtrip");

    store.set(&key, "value").await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Some("value".to_string()));

    store.del(&key).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn batched_set_writes_and_scan() {
    let store = connect().await;
    let key = store.keys().cohort_members("p1", "scan", "User", 1);

    let members: HashSet<String> = (0..5000).map(|i| format!("user-{i}")).collect();
    store.sadd_batched(&key, &members).await.unwrap();

    assert_eq!(store.scard(&key).await.unwrap(), 5000);
    assert_eq!(store.sscan(&key).await.unwrap(), members);
    assert!(store.sismember(&key, "user-42").await.unwrap());

    store.srem_batched(&key, &members).await.unwrap();
    assert_eq!(store.scard(&key).await.unwrap(), 0);
    store.del(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn set_diff_between_cohort_versions() {
    let store = connect().await;
    let old_key = store.keys().cohort_members("p1", "diff", "User", 100);
    let new_key = store.keys().cohort_members("p1", "diff", "User", 150);

    store.sadd_batched(&old_key, &set_of(&["1", "2"])).await.unwrap();
    store
        .sadd_batched(&new_key, &set_of(&["2", "3", "4"]))
        .await
        .unwrap();

    assert_eq!(store.sdiff(&new_key, &old_key).await.unwrap(), set_of(&["3", "4"]));
    assert_eq!(store.sdiff(&old_key, &new_key).await.unwrap(), set_of(&["1"]));

    let dest = store.keys().cohort_members("p1", "diff", "User", 0);
    let stored = store.sdiffstore(&dest, &new_key, &old_key).await.unwrap();
    assert_eq!(stored, 2);
    assert_eq!(store.smembers(&dest).await.unwrap(), set_of(&["3", "4"]));

    for key in [&old_key, &new_key, &dest] {
        store.del(key).await.unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn lock_exclusivity() {
    let store = connect().await;
    let ttl = Duration::from_secs(10);

    let mut first = DistributedLock::new(store.clone(), "exclusivity", ttl);
    let mut second = DistributedLock::new(store.clone(), "exclusivity", ttl);

    let first_acquired = first.acquire().await.unwrap();
    let second_acquired = second.acquire().await.unwrap();
    assert!(first_acquired);
    assert!(!second_acquired);

    // Only the holder can release.
    assert!(!second.release().await.unwrap());
    assert!(first.release().await.unwrap());

    // Released, so a new acquisition succeeds.
    assert!(second.acquire().await.unwrap());
    assert!(second.release().await.unwrap());
}

#[tokio::test]
#[ignore]
async fn hash_roundtrip() {
    let store = connect().await;
    let key = store.keys().cohort_descriptions("p-hash");

    store.hset(&key, "a", "1").await.unwrap();
    store
        .hset_multiple(&key, &[("b".to_string(), "2".to_string()), ("c".to_string(), "3".to_string())])
        .await
        .unwrap();

    assert_eq!(store.hget(&key, "b").await.unwrap(), Some("2".to_string()));
    assert_eq!(store.hgetall(&key).await.unwrap().len(), 3);

    store.hdel(&key, "a").await.unwrap();
    let mut fields = store.hkeys(&key).await.unwrap();
    fields.sort();
    assert_eq!(fields, vec!["b".to_string(), "c".to_string()]);

    store.del(&key).await.unwrap();
}
