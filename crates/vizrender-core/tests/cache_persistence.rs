//! Persistent RenderCache tests: restart reload, corrupt records treated as
//! misses, access-time flush and garbage collection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vizrender_core::sandbox::fakes::ScriptedFactory;
use vizrender_core::{
    Artifact, CacheConfig, Dispatcher, ErrorKind, FailureRecord, Fingerprint, ManualClock,
    Outcome, PipelineConfig, RenderCache, SystemClock, VisualizationSpec, MP4_CONTENT_TYPE,
};

fn key(n: u8) -> Fingerprint {
    Fingerprint::from_hex(&format!("{n:02x}").repeat(32)).unwrap()
}

fn persistent(dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        persist_dir: Some(dir.to_path_buf()),
        ..CacheConfig::default()
    }
}

fn figure() -> Outcome {
    Outcome::Success {
        artifact: Artifact::Figure {
            figure: json!({"data": [{"type": "scatter", "x": [0, 1], "y": [1, 0]}], "layout": {}}),
        },
    }
}

fn video() -> Outcome {
    Outcome::Success {
        artifact: Artifact::Video {
            content_type: MP4_CONTENT_TYPE.into(),
            bytes: b"\x00\x00\x00\x18ftypmp42".to_vec(),
        },
    }
}

fn fault_with_figure() -> Outcome {
    Outcome::Failure {
        failure: FailureRecord {
            kind: ErrorKind::ExecutionFault,
            message: "division by zero".into(),
            fallback: Some(Artifact::Figure {
                figure: json!({"data": [], "layout": {"title": {"text": "Plot Generation Error"}}}),
            }),
        },
    }
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
        cache.put(&key(1), figure()).await.unwrap();
        cache.put(&key(2), video()).await.unwrap();
        cache.put(&key(3), fault_with_figure()).await.unwrap();
    }

    let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
    assert_eq!(cache.len(), 3);
    assert_eq!(*cache.get(&key(1)).unwrap().outcome, figure());
    assert_eq!(*cache.get(&key(2)).unwrap().outcome, video());

    let negative = cache.get(&key(3)).unwrap();
    assert!(negative.is_negative());
    assert_eq!(*negative.outcome, fault_with_figure());
}

#[tokio::test]
async fn test_dispatcher_hits_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let spec = VisualizationSpec::from_json(
        r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "function", "expr": "sin(x)"}}"#,
    )
    .unwrap();
    let config = PipelineConfig {
        cache: persistent(dir.path()),
        ..PipelineConfig::default()
    };

    let first = {
        let cache = RenderCache::open(config.cache.clone(), Arc::new(SystemClock)).unwrap();
        let d = Dispatcher::new(&config, Arc::new(ScriptedFactory::new(vec![])), cache);
        d.submit(&spec).await
    };
    assert_eq!(first.status(), "built");

    let cache = RenderCache::open(config.cache.clone(), Arc::new(SystemClock)).unwrap();
    let d = Dispatcher::new(&config, Arc::new(ScriptedFactory::new(vec![])), cache);
    let second = d.submit(&spec).await;
    assert_eq!(second.status(), "hit");
    assert_eq!(second.artifact(), first.artifact());
}

#[tokio::test]
async fn test_corrupt_records_are_dropped_as_misses() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
        cache.put(&key(1), figure()).await.unwrap();
        cache.put(&key(2), video()).await.unwrap();
    }

    // Truncate one index record.
    let index = dir.path().join("index");
    std::fs::write(index.join(format!("{}.json", key(2))), b"{\"key\":").unwrap();

    let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
    assert!(cache.get(&key(2)).is_none());
    assert!(cache.get(&key(1)).is_some());
    assert!(!index.join(format!("{}.json", key(2))).exists());
}

#[tokio::test]
async fn test_tampered_body_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
        cache.put(&key(4), video()).await.unwrap();
    }

    let objects = dir.path().join("objects");
    for shard in std::fs::read_dir(&objects).unwrap() {
        for blob in std::fs::read_dir(shard.unwrap().path()).unwrap() {
            std::fs::write(blob.unwrap().path(), b"bit-rot").unwrap();
        }
    }

    let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_undecodable_outcome_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
        cache.put(&key(5), figure()).await.unwrap();
    }

    // Valid record, but its descriptor names an unknown artifact type.
    let path = dir.path().join("index").join(format!("{}.json", key(5)));
    let mut record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    record["meta"]["artifact"]["type"] = json!("hologram");
    std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

    let cache = RenderCache::open(persistent(dir.path()), Arc::new(SystemClock)).unwrap();
    assert!(cache.is_empty());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_flush_persists_access_times() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let cache = RenderCache::open(persistent(dir.path()), clock.clone()).unwrap();
    cache.put(&key(6), figure()).await.unwrap();
    let created = cache.get(&key(6)).unwrap().created_at;

    clock.advance(Duration::from_secs(120));
    cache.get(&key(6)).unwrap();
    assert_eq!(cache.flush().await.unwrap(), 1);
    assert_eq!(cache.flush().await.unwrap(), 0, "nothing touched since");

    let reopened = RenderCache::open(persistent(dir.path()), clock.clone()).unwrap();
    let entry = reopened.get(&key(6)).unwrap();
    assert_eq!(entry.created_at, created);
    assert!(entry.last_accessed_at >= created + chrono::Duration::seconds(120));
}

#[tokio::test]
async fn test_gc_removes_expired_records_and_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let cache = RenderCache::open(persistent(dir.path()), clock.clone()).unwrap();
    cache.put(&key(7), figure()).await.unwrap();
    cache.put(&key(8), fault_with_figure()).await.unwrap();

    clock.advance(Duration::from_secs(CacheConfig::default().failure_ttl_secs + 1));
    let report = cache.gc().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.blobs_deleted, 1);
    assert_eq!(cache.len(), 1);

    let reopened = RenderCache::open(persistent(dir.path()), clock).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.get(&key(7)).is_some());
}

#[tokio::test]
async fn test_expired_records_are_skipped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    {
        let cache = RenderCache::open(persistent(dir.path()), clock.clone()).unwrap();
        cache.put(&key(9), fault_with_figure()).await.unwrap();
    }

    clock.advance(Duration::from_secs(3_600));
    let cache = RenderCache::open(persistent(dir.path()), clock).unwrap();
    assert!(cache.is_empty());
    assert!(!dir
        .path()
        .join("index")
        .join(format!("{}.json", key(9)))
        .exists());
}

fn record_path(dir: &std::path::Path, key: &Fingerprint) -> std::path::PathBuf {
    dir.join("index").join(format!("{key}.json"))
}

#[tokio::test]
async fn test_expired_record_is_removed_before_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let cache = RenderCache::open(persistent(dir.path()), clock.clone()).unwrap();
    cache.put(&key(10), fault_with_figure()).await.unwrap();

    clock.advance(Duration::from_secs(CacheConfig::default().failure_ttl_secs + 1));
    cache.put(&key(10), figure()).await.unwrap();
    assert!(record_path(dir.path(), &key(10)).exists());

    let reopened = RenderCache::open(persistent(dir.path()), clock).unwrap();
    assert_eq!(*reopened.get(&key(10)).unwrap().outcome, figure());
}

#[tokio::test]
async fn test_expired_record_is_removed_after_get() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let cache = RenderCache::open(persistent(dir.path()), clock.clone()).unwrap();
    cache.put(&key(11), fault_with_figure()).await.unwrap();
    let path = record_path(dir.path(), &key(11));
    assert!(path.exists());

    clock.advance(Duration::from_secs(CacheConfig::default().failure_ttl_secs + 1));
    assert!(cache.get(&key(11)).is_none());

    // Removal runs on the blocking pool without holding up `get`.
    for _ in 0..100 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!path.exists());
}
