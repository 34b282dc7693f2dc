use offerguard::cache::{CacheBackend, CacheKey, ResultCache};
use offerguard_redis::RedisCacheBackend;
use std::sync::Arc;
use std::time::Duration;

// Requires redis running. If OFFERGUARD_TEST_REDIS_URL is unset, the tests skip.
async fn backend() -> Option<RedisCacheBackend> {
    let url = match std::env::var("OFFERGUARD_TEST_REDIS_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set OFFERGUARD_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
            return None;
        }
    };
    Some(
        RedisCacheBackend::connect(&url)
            .await
            .unwrap_or_else(|e| panic!("Failed to connect to redis at '{}': {}", url, e)),
    )
}

#[tokio::test]
async fn result_cache_round_trip() {
    let Some(backend) = backend().await else { return };
    let cache = ResultCache::new(Arc::new(backend));
    let key = CacheKey::best_offer(uuid::Uuid::new_v4());

    cache.put(&key, &serde_json::json!({"rank": 1}), Duration::from_secs(60)).await;
    let hit: Option<serde_json::Value> = cache.get(&key).await;
    assert_eq!(hit, Some(serde_json::json!({"rank": 1})));

    let left = cache.ttl_remaining(&key).await.expect("ttl");
    assert!(left <= 60 && left > 50);

    assert!(cache.invalidate(&key).await);
    assert_eq!(cache.get::<serde_json::Value>(&key).await, None);
}

#[tokio::test]
async fn delete_prefix_removes_only_matching_keys() {
    let Some(backend) = backend().await else { return };
    let namespace = format!("offerguard-test-{}:", uuid::Uuid::new_v4());
    for id in 0..250 {
        backend.set(&format!("{namespace}{id}"), "x".into(), Duration::from_secs(60)).await.unwrap();
    }
    let other = format!("other-{}", uuid::Uuid::new_v4());
    backend.set(&other, "y".into(), Duration::from_secs(60)).await.unwrap();

    assert_eq!(backend.delete_prefix(&namespace).await.unwrap(), 250);
    assert_eq!(backend.get(&other).await.unwrap().as_deref(), Some("y"));

    assert!(backend.delete(&other).await.unwrap());
}

#[tokio::test]
async fn entries_expire_server_side() {
    let Some(backend) = backend().await else { return };
    let key = format!("offerguard-test-{}", uuid::Uuid::new_v4());
    backend.set(&key, "1".into(), Duration::from_millis(200)).await.unwrap();
    assert!(backend.ttl(&key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(backend.get(&key).await.unwrap(), None);
    assert_eq!(backend.ttl(&key).await.unwrap(), None);
}
