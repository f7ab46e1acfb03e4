//! RenderCache contract tests: single-flight builds, negative TTL,
//! idempotent puts and LRU eviction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vizrender_core::{
    Artifact, CacheConfig, CacheError, ErrorKind, FailureRecord, Fingerprint, ManualClock,
    Outcome, PutResult, RenderCache, Resolution, SystemClock, MP4_CONTENT_TYPE,
};

fn key(n: u8) -> Fingerprint {
    Fingerprint::from_hex(&format!("{n:02x}").repeat(32)).unwrap()
}

/// Outcome whose accounted size is exactly `len` bytes.
fn video(len: usize, fill: u8) -> Outcome {
    Outcome::Success {
        artifact: Artifact::Video {
            content_type: MP4_CONTENT_TYPE.into(),
            bytes: vec![fill; len],
        },
    }
}

fn fault(message: &str) -> Outcome {
    Outcome::Failure {
        failure: FailureRecord {
            kind: ErrorKind::ExecutionFault,
            message: message.into(),
            fallback: None,
        },
    }
}

fn counting_build(
    builds: &Arc<AtomicUsize>,
    delay: Duration,
    outcome: Outcome,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Outcome, FailureRecord>> {
    let builds = Arc::clone(builds);
    move || {
        Box::pin(async move {
            builds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(outcome)
        })
    }
}

// -------------------------------------------------------------------------
// single flight
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_build() {
    let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
    let builds = Arc::new(AtomicUsize::new(0));

    let calls = (0..16).map(|_| {
        let cache = cache.clone();
        let build = counting_build(&builds, Duration::from_secs(2), video(10, 1));
        async move { cache.get_or_build(&key(1), build).await }
    });
    let results = futures::future::join_all(calls).await;

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    for result in &results {
        let Resolution::Built(entry) = result else {
            panic!("expected every caller to receive the build, got {result:?}");
        };
        assert_eq!(*entry.outcome, video(10, 1));
    }

    let stats = cache.stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.joined, 15);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_keys_build_in_parallel() {
    let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
    let builds = Arc::new(AtomicUsize::new(0));
    let started = tokio::time::Instant::now();

    let (k1, k2) = (key(1), key(2));
    let a = cache.get_or_build(&k1, counting_build(&builds, Duration::from_secs(5), video(1, 1)));
    let b = cache.get_or_build(&k2, counting_build(&builds, Duration::from_secs(5), video(1, 2)));
    let (a, b) = tokio::join!(a, b);

    assert!(matches!(a, Resolution::Built(_)));
    assert!(matches!(b, Resolution::Built(_)));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_caller_does_not_cancel_build() {
    let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
    let builds = Arc::new(AtomicUsize::new(0));

    let waited = tokio::time::timeout(
        Duration::from_millis(100),
        cache.get_or_build(&key(3), counting_build(&builds, Duration::from_secs(1), video(4, 3))),
    )
    .await;
    assert!(waited.is_err(), "caller gave up before the build finished");
    assert!(cache.is_building(&key(3)));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!cache.is_building(&key(3)));
    assert_eq!(*cache.get(&key(3)).unwrap().outcome, video(4, 3));
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

// -------------------------------------------------------------------------
// negative caching
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_negative_entries_expire_first() {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig {
        success_ttl_secs: 3_600,
        failure_ttl_secs: 600,
        ..CacheConfig::default()
    };
    let cache = RenderCache::new(config, clock.clone());

    cache.put(&key(1), video(8, 1)).await.unwrap();
    cache.put(&key(2), fault("division by zero")).await.unwrap();

    let negative = cache.get(&key(2)).unwrap();
    assert!(negative.is_negative());
    assert!(!cache.get(&key(1)).unwrap().is_negative());

    clock.advance(Duration::from_secs(601));
    assert!(cache.get(&key(2)).is_none(), "failure outlived its ttl");
    assert!(cache.get(&key(1)).is_some());

    clock.advance(Duration::from_secs(3_000));
    assert!(cache.get(&key(1)).is_none());
    assert_eq!(cache.stats().expired, 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_expired_failure_is_rebuilt() {
    let clock = Arc::new(ManualClock::default());
    let cache = RenderCache::new(CacheConfig::default(), clock.clone());
    let builds = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get_or_build(&key(5), counting_build(&builds, Duration::ZERO, fault("boom")))
        .await;
    assert!(matches!(first, Resolution::Built(ref e) if e.is_negative()));

    let second = cache
        .get_or_build(&key(5), counting_build(&builds, Duration::ZERO, video(2, 5)))
        .await;
    assert!(matches!(second, Resolution::Hit(ref e) if e.is_negative()));
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_secs(CacheConfig::default().failure_ttl_secs));
    let third = cache
        .get_or_build(&key(5), counting_build(&builds, Duration::ZERO, video(2, 5)))
        .await;
    assert!(matches!(third, Resolution::Built(ref e) if !e.is_negative()));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

// -------------------------------------------------------------------------
// put
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_put_is_idempotent_for_identical_content() {
    let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));

    assert_eq!(cache.put(&key(7), video(3, 7)).await.unwrap(), PutResult::Inserted);
    assert_eq!(cache.put(&key(7), video(3, 7)).await.unwrap(), PutResult::Unchanged);
    let err = cache.put(&key(7), video(3, 8)).await.unwrap_err();
    assert!(matches!(err, CacheError::ConflictingWrite { .. }));
    assert_eq!(cache.stats().total_bytes, 3);
}

// -------------------------------------------------------------------------
// eviction
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_lru_eviction_drops_least_recently_accessed() {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig {
        max_total_bytes: 250,
        ..CacheConfig::default()
    };
    let cache = RenderCache::new(config, clock.clone());

    cache.put(&key(1), video(100, 1)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    cache.put(&key(2), video(100, 2)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    assert!(cache.get(&key(1)).is_some(), "touch 1 so 2 is the oldest");
    clock.advance(Duration::from_secs(1));

    cache.put(&key(3), video(100, 3)).await.unwrap();

    assert!(cache.get(&key(2)).is_none());
    assert!(cache.get(&key(1)).is_some());
    assert!(cache.get(&key(3)).is_some());
    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.total_bytes, 200);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_skips_in_flight_keys() {
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig {
        max_total_bytes: 250,
        ..CacheConfig::default()
    };
    let cache = RenderCache::new(config, clock.clone());
    let builds = Arc::new(AtomicUsize::new(0));

    let building = tokio::spawn({
        let cache = cache.clone();
        let build = counting_build(&builds, Duration::from_secs(10), video(100, 9));
        async move { cache.get_or_build(&key(9), build).await }
    });
    while !cache.is_building(&key(9)) {
        tokio::task::yield_now().await;
    }

    // Key 9 is both stored and in flight, and is the oldest entry.
    cache.put(&key(9), video(100, 9)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    cache.put(&key(4), video(100, 4)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    cache.put(&key(5), video(100, 5)).await.unwrap();

    assert!(cache.get(&key(9)).is_some(), "in-flight key was evicted");
    assert!(cache.get(&key(4)).is_none());

    let built = building.await.unwrap();
    assert!(matches!(built, Resolution::Built(ref e) if *e.outcome == video(100, 9)));
}
