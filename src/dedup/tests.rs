//! Unit tests for the shared-resource cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::domain::RegionAndName;
use rstest::{fixture, rstest};
use tokio::time::sleep;

type Cache = SharedResourceCache<RegionAndName, String, String>;

#[fixture]
fn cache() -> Arc<Cache> {
    Arc::new(SharedResourceCache::new("test"))
}

fn key() -> RegionAndName {
    RegionAndName::new("us-east-1", "g")
}

#[rstest]
#[tokio::test]
async fn concurrent_callers_share_one_load(cache: Arc<Cache>) {
    let calls = Arc::new(AtomicUsize::new(0));

    let load = |cache: Arc<Cache>, calls: Arc<AtomicUsize>| async move {
        cache
            .get_or_create(&key(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(String::from("key-1"))
            })
            .await
    };

    let (first, second) = tokio::join!(
        load(Arc::clone(&cache), Arc::clone(&calls)),
        load(Arc::clone(&cache), Arc::clone(&calls)),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, Ok(String::from("key-1")));
    assert_eq!(second, first);
    assert_eq!(cache.get_if_present(&key()), Some(String::from("key-1")));
}

#[rstest]
#[tokio::test]
async fn waiters_observe_the_same_failure_then_entry_is_evicted(cache: Arc<Cache>) {
    let calls = Arc::new(AtomicUsize::new(0));

    let load = |cache: Arc<Cache>, calls: Arc<AtomicUsize>| async move {
        cache
            .get_or_create(&key(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Err::<String, _>(String::from("quota exceeded"))
            })
            .await
    };

    let (first, second) = tokio::join!(
        load(Arc::clone(&cache), Arc::clone(&calls)),
        load(Arc::clone(&cache), Arc::clone(&calls)),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, Err(String::from("quota exceeded")));
    assert_eq!(second, first);
    assert!(cache.is_empty(), "failed load should be evicted");

    let retried = cache
        .get_or_create(&key(), || async { Ok::<_, String>(String::from("key-2")) })
        .await;
    assert_eq!(retried, Ok(String::from("key-2")));
}

#[rstest]
#[tokio::test]
async fn registered_values_bypass_the_loader(cache: Arc<Cache>) {
    cache.put(key(), String::from("imported"));

    let value = cache
        .get_or_create(&key(), || async {
            Err::<String, _>(String::from("loader must not run"))
        })
        .await;

    assert_eq!(value, Ok(String::from("imported")));
}

#[rstest]
fn invalidate_forgets_entries(cache: Arc<Cache>) {
    cache.put(key(), String::from("value"));
    assert!(cache.invalidate(&key()));
    assert!(!cache.invalidate(&key()));
    assert_eq!(cache.get_if_present(&key()), None);
    assert!(cache.loaded_keys().is_empty());
}
