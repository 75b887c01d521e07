//! End-to-end scenarios for the tiered cache manager.

use async_trait::async_trait;
use cascade_core::{CacheLayer, LayerError, LayerResult, MemoryCache};
use cascade_manager::{
    CacheManager, LoadError, PromotionPolicy, WriteError, WriteThrough,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Loader that counts invocations and tracks its peak concurrency.
struct CountingLoader {
    calls: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    delay: Duration,
    value: String,
}

impl CountingLoader {
    fn new(value: &str) -> Arc<Self> {
        Self::with_delay(value, Duration::ZERO)
    }

    fn with_delay(value: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            delay,
            value: value.to_string(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Cloneable handle passed to the builder while the test keeps the
/// counters.
#[derive(Clone)]
struct SharedLoader(Arc<CountingLoader>);

#[async_trait]
impl cascade_manager::Loader<String, String> for SharedLoader {
    async fn load(&self, _key: &String) -> Result<String, LoadError> {
        let loader = &self.0;
        loader.calls.fetch_add(1, Ordering::SeqCst);
        let now = loader.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        loader.max_concurrent.fetch_max(now, Ordering::SeqCst);
        if !loader.delay.is_zero() {
            tokio::time::sleep(loader.delay).await;
        }
        loader.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(loader.value.clone())
    }
}

/// A tier that fails every lookup, for fall-through tests.
struct BrokenLayer;

#[async_trait]
impl CacheLayer<String, String> for BrokenLayer {
    fn name(&self) -> &str {
        "broken"
    }

    async fn try_get(&self, _key: &String) -> LayerResult<Option<String>> {
        Err(LayerError::unavailable("injected failure"))
    }

    async fn set(&self, _key: &String, _value: String, _ttl: Duration) -> LayerResult<()> {
        Err(LayerError::unavailable("injected failure"))
    }

    async fn remove(&self, _key: &String) -> LayerResult<bool> {
        Err(LayerError::unavailable("injected failure"))
    }
}

fn memory_layer() -> Arc<MemoryCache<String, String>> {
    Arc::new(MemoryCache::new())
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test -- --nocapture`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn cold_read_populates_all_layers() {
    init_logging();
    let l1 = memory_layer();
    let l2 = memory_layer();
    let loader = CountingLoader::new("v1");

    let manager = CacheManager::builder()
        .layer_arc(l1.clone())
        .layer_arc(l2.clone())
        .loader(SharedLoader(loader.clone()))
        .write_policy(WriteThrough::new(Duration::from_secs(60)))
        .build()
        .unwrap();

    let value = manager.get_or_add(&"k".to_string()).await.unwrap();
    assert_eq!(value, "v1");
    assert_eq!(loader.calls(), 1);

    assert_eq!(
        l1.try_get(&"k".to_string()).await.unwrap(),
        Some("v1".to_string())
    );
    assert_eq!(
        l2.try_get(&"k".to_string()).await.unwrap(),
        Some("v1".to_string())
    );

    // A second read is a pure hit; the loader is not consulted again.
    let value = manager.get_or_add(&"k".to_string()).await.unwrap();
    assert_eq!(value, "v1");
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn hit_in_slower_tier_promotes_upward() {
    let l1 = memory_layer();
    let l2 = memory_layer();
    let loader = CountingLoader::new("unused");

    let manager = CacheManager::builder()
        .layer_arc(l1.clone())
        .layer_arc(l2.clone())
        .loader(SharedLoader(loader.clone()))
        .promotion_policy(PromotionPolicy::AllHigherLayers)
        .build()
        .unwrap();

    // Pre-seed only the slower tier.
    l2.set(&"k".to_string(), "v2".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let value = manager.get_or_add(&"k".to_string()).await.unwrap();
    assert_eq!(value, "v2");
    assert_eq!(loader.calls(), 0);

    // Promotion is fire-and-forget; it lands shortly after the hit.
    let mut promoted = None;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        promoted = l1.try_get(&"k".to_string()).await.unwrap();
        if promoted.is_some() {
            break;
        }
    }
    assert_eq!(promoted, Some("v2".to_string()));
}

#[tokio::test]
async fn promotion_policy_none_leaves_faster_tiers_empty() {
    let l1 = memory_layer();
    let l2 = memory_layer();

    let manager = CacheManager::builder()
        .layer_arc(l1.clone())
        .layer_arc(l2.clone())
        .loader(SharedLoader(CountingLoader::new("unused")))
        .promotion_policy(PromotionPolicy::None)
        .build()
        .unwrap();

    l2.set(&"k".to_string(), "v2".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(manager.get_or_add(&"k".to_string()).await.unwrap(), "v2");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(l1.try_get(&"k".to_string()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_load() {
    init_logging();
    let loader = CountingLoader::with_delay("L", Duration::from_millis(200));

    let manager = Arc::new(
        CacheManager::builder()
            .layer_arc(memory_layer())
            .loader(SharedLoader(loader.clone()))
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..50 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.get_or_add(&"k".to_string()).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "L");
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_load_is_shared_then_retried_fresh() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let loader = move |_key: String| {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<String, _>(LoadError::terminal("row does not exist"))
        }
    };

    let manager = Arc::new(
        CacheManager::builder()
            .layer_arc(memory_layer())
            .loader(loader)
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.get_or_add(&"k".to_string()).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("row does not exist"));
    }
    // All ten waiters shared one (non-retried, terminal) invocation.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The in-flight entry is gone, so the next miss loads afresh.
    let _ = manager.get_or_add(&"k".to_string()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_load_errors_are_retried_with_backoff() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let loader = move |_key: String| {
        let calls = calls2.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LoadError::transient("timeout"))
            } else {
                Ok("finally".to_string())
            }
        }
    };

    let manager = CacheManager::builder()
        .layer_arc(memory_layer())
        .loader(loader)
        .retry_base_delay(Duration::from_millis(10))
        .build()
        .unwrap();

    let value = manager.get_or_add(&"k".to_string()).await.unwrap();
    assert_eq!(value, "finally");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broken_tier_falls_through_to_next() {
    let l2 = memory_layer();
    l2.set(&"k".to_string(), "from-l2".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let manager = CacheManager::builder()
        .layer(BrokenLayer)
        .layer_arc(l2)
        .loader(SharedLoader(CountingLoader::new("unused")))
        .promotion_policy(PromotionPolicy::None)
        .build()
        .unwrap();

    assert_eq!(
        manager.get_or_add(&"k".to_string()).await.unwrap(),
        "from-l2"
    );
}

#[tokio::test]
async fn early_refresh_fires_inside_soft_window() {
    init_logging();
    let l1 = memory_layer();
    let loader = CountingLoader::new("fresh");

    let manager = CacheManager::builder()
        .layer_arc(l1.clone())
        .loader(SharedLoader(loader.clone()))
        .write_policy(WriteThrough::new(Duration::from_millis(200)))
        .early_refresh_threshold(Duration::from_millis(150))
        .min_refresh_interval(Duration::ZERO)
        .ttl_jitter_fraction(0.0)
        .build()
        .unwrap();

    manager.set(&"k".to_string(), "v0".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Hit inside the soft window: serves the old value and schedules a
    // background refresh.
    assert_eq!(manager.get_or_add(&"k".to_string()).await.unwrap(), "v0");

    // The refresh starts with up to 500 ms of jitter; give it room.
    let mut refreshed = 0;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        refreshed = manager.snapshot(10).total_early_refreshes;
        if refreshed >= 1 {
            break;
        }
    }
    assert!(refreshed >= 1, "no early refresh observed");
    assert!(loader.calls() >= 1);

    let snapshot = manager.snapshot(10);
    assert!(snapshot.keys[&"k".to_string()].early_refresh_count >= 1);
}

#[tokio::test]
async fn refresh_is_throttled_by_min_interval() {
    let loader = CountingLoader::new("fresh");

    let manager = CacheManager::builder()
        .layer_arc(memory_layer())
        .loader(SharedLoader(loader.clone()))
        .write_policy(WriteThrough::new(Duration::from_millis(200)))
        .early_refresh_threshold(Duration::from_millis(150))
        .min_refresh_interval(Duration::from_secs(600))
        .build()
        .unwrap();

    manager.set(&"k".to_string(), "v0".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    for _ in 0..5 {
        let _ = manager.get_or_add(&"k".to_string()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(manager.snapshot(10).total_early_refreshes, 0);
    assert_eq!(loader.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refresh_concurrency_is_capped() {
    let loader = CountingLoader::with_delay("fresh", Duration::from_millis(300));

    let manager = Arc::new(
        CacheManager::builder()
            .layer_arc(memory_layer())
            .loader(SharedLoader(loader.clone()))
            .write_policy(WriteThrough::new(Duration::from_millis(400)))
            .early_refresh_threshold(Duration::from_millis(390))
            .min_refresh_interval(Duration::ZERO)
            .max_concurrent_early_refreshes(2)
            .build()
            .unwrap(),
    );

    for i in 0..6 {
        manager
            .set(&format!("k{i}"), "v".to_string())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Every key is now in its soft window; hit them all.
    for i in 0..6 {
        let _ = manager.get_or_add(&format!("k{i}")).await;
    }
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(
        loader.max_concurrent.load(Ordering::SeqCst) <= 2,
        "refresh concurrency exceeded the cap"
    );
    assert!(loader.calls() >= 1, "no refresh ran at all");
}

#[tokio::test]
async fn events_are_broadcast_to_subscribers() {
    use cascade_manager::CacheEvent;

    let manager = CacheManager::builder()
        .layer_arc(memory_layer())
        .loader(SharedLoader(CountingLoader::new("v")))
        .event_capacity(64)
        .build()
        .unwrap();

    let mut events = manager.subscribe().expect("events enabled");

    manager.get_or_add(&"k".to_string()).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent::Miss {
            key: "k".to_string()
        }
    );

    manager.get_or_add(&"k".to_string()).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent::Hit {
            key: "k".to_string(),
            layer: 0
        }
    );
}

#[tokio::test]
async fn close_drains_and_blocks_new_refreshes() {
    let loader = CountingLoader::new("fresh");

    let mut manager = CacheManager::builder()
        .layer_arc(memory_layer())
        .loader(SharedLoader(loader.clone()))
        .write_policy(WriteThrough::new(Duration::from_millis(200)))
        .early_refresh_threshold(Duration::from_millis(150))
        .min_refresh_interval(Duration::ZERO)
        .build()
        .unwrap();

    manager.set(&"k".to_string(), "v0".to_string()).await.unwrap();
    manager.close().await;

    // In the soft window, but every refresh slot is retired.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let _ = manager.get_or_add(&"k".to_string()).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(manager.snapshot(10).total_early_refreshes, 0);
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn write_through_persistence_failure_surfaces_on_set() {
    let l1 = memory_layer();
    let persistent = |_key: String, _value: String| async move {
        Err::<(), _>(WriteError::persistence("disk full"))
    };

    let manager = CacheManager::builder()
        .layer_arc(l1.clone())
        .loader(SharedLoader(CountingLoader::new("unused")))
        .write_policy(WriteThrough::new(Duration::from_secs(60)))
        .persistent_store(persistent)
        .build()
        .unwrap();

    let err = manager
        .set(&"k".to_string(), "v".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Persistence(_)));

    // Tiers were written before the fatal persistence step.
    assert_eq!(
        l1.try_get(&"k".to_string()).await.unwrap(),
        Some("v".to_string())
    );
}

#[tokio::test]
async fn stale_key_state_is_cleaned_up() {
    let manager = CacheManager::builder()
        .layer_arc(memory_layer())
        .loader(SharedLoader(CountingLoader::new("v")))
        .stale_threshold(Duration::from_millis(100))
        .stale_key_cleanup_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    manager.set(&"old".to_string(), "v".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    manager.set(&"new".to_string(), "v".to_string()).await.unwrap();

    assert_eq!(manager.cleanup_now(), 1);

    let snapshot = manager.snapshot(10);
    assert!(!snapshot.keys.contains_key(&"old".to_string()));
    assert!(snapshot.keys.contains_key(&"new".to_string()));
}

#[tokio::test]
async fn remove_clears_every_tier_and_key_state() {
    let l1 = memory_layer();
    let l2 = memory_layer();

    let manager = CacheManager::builder()
        .layer_arc(l1.clone())
        .layer_arc(l2.clone())
        .loader(SharedLoader(CountingLoader::new("v1")))
        .build()
        .unwrap();

    manager.get_or_add(&"k".to_string()).await.unwrap();
    assert!(manager.remove(&"k".to_string()).await);

    assert_eq!(l1.try_get(&"k".to_string()).await.unwrap(), None);
    assert_eq!(l2.try_get(&"k".to_string()).await.unwrap(), None);
    assert!(!manager.snapshot(10).keys.contains_key(&"k".to_string()));
}

#[tokio::test]
async fn snapshot_reports_totals_and_top_keys() {
    let manager = CacheManager::builder()
        .layer_arc(memory_layer())
        .loader(SharedLoader(CountingLoader::new("v")))
        .build()
        .unwrap();

    manager.set(&"hot".to_string(), "v".to_string()).await.unwrap();
    manager.set(&"cold".to_string(), "v".to_string()).await.unwrap();

    for _ in 0..5 {
        manager.get_or_add(&"hot".to_string()).await.unwrap();
    }
    manager.get_or_add(&"cold".to_string()).await.unwrap();
    manager.get_or_add(&"missing".to_string()).await.unwrap();

    let snapshot = manager.snapshot(1);
    assert_eq!(snapshot.total_hits, 6);
    assert_eq!(snapshot.total_misses, 1);
    assert_eq!(snapshot.top_keys.len(), 1);
    assert_eq!(snapshot.top_keys[0].0, "hot");
    assert_eq!(snapshot.keys[&"hot".to_string()].access_count, 5);
}
