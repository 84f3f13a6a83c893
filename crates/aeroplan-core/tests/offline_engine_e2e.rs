use aeroplan_core::geo::{BoundingBox, TileCoord};
use aeroplan_core::navdata::geojson::RawNavFeature;
use aeroplan_core::navdata::{Integrity, NavCategory, NavDataClient};
use aeroplan_core::store::{Database, LayerStatus};
use aeroplan_core::tile_source::{ConnectivityProbe, FetchedTile, TileFetcher, BLANK_TILE_PNG};
use aeroplan_core::{EngineConfig, LayerDef, OfflineEngine, OfflineError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn brazil() -> BoundingBox {
    BoundingBox::new(-33.75, 5.27, -73.99, -34.79)
}

fn test_config() -> EngineConfig {
    EngineConfig {
        layers: vec![LayerDef {
            id: "wac".to_string(),
            wms_layer: "ICA:wac".to_string(),
            endpoint: "https://wms.example.com/geoserver/wms".to_string(),
            cache_enabled: true,
        }],
        mirror_groups: Vec::new(),
        batch_pause: Duration::from_millis(0),
        tile_retry_backoff: Duration::from_millis(0),
        page_retry_backoff: Duration::from_millis(0),
        expected_ranges: vec![
            (NavCategory::Airport, (1, 1_000)),
            (NavCategory::Heliport, (1, 1_000)),
            (NavCategory::Vor, (1, 1_000)),
            (NavCategory::Ndb, (1, 1_000)),
            (NavCategory::Fix, (1, 1_000)),
        ],
        sanity_floor: 1,
        min_cached_points: 1,
        ..EngineConfig::default()
    }
}

struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<FetchedTile, OfflineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedTile {
            bytes: vec![0x42; 24],
            content_type: "image/png".to_string(),
        })
    }
}

struct FixedProbe(bool);

#[async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}

/// Serves one short page per synced category.
struct OnePageClient;

#[async_trait]
impl NavDataClient for OnePageClient {
    async fn fetch_page(
        &self,
        category: NavCategory,
        start_index: u64,
        _page_size: u64,
    ) -> Result<Vec<RawNavFeature>, OfflineError> {
        if start_index > 0 {
            return Ok(Vec::new());
        }
        Ok(vec![RawNavFeature {
            id: format!("{}.0", category.as_str()),
            ident: Some(format!("ID{}", category.as_str().to_uppercase())),
            name: format!("{} zero", category.as_str()),
            kind: None,
            lat: -20.0,
            lng: -45.0,
        }])
    }
}

async fn engine_with(
    db: Option<Database>,
    fetcher: Arc<CountingFetcher>,
    online: bool,
) -> OfflineEngine {
    OfflineEngine::with_parts(
        test_config(),
        db,
        fetcher,
        Arc::new(FixedProbe(online)),
        Arc::new(OnePageClient),
    )
}

#[tokio::test]
async fn test_download_then_resolve_serves_from_cache() {
    let db = Database::open_in_memory().await.unwrap();
    let fetcher = CountingFetcher::new();
    let engine = engine_with(Some(db), fetcher.clone(), true).await;

    let meta = engine
        .download_layer("wac", &brazil(), &[5], |_| {})
        .await
        .unwrap();
    assert_eq!(meta.total_tiles, 20);
    assert_eq!(meta.downloaded_tiles, 20);
    assert_eq!(meta.status, LayerStatus::Complete);
    assert!(engine.is_layer_cached("wac").await);
    assert_eq!(engine.cached_tile_count("wac").await, 20);
    assert!(engine.cache_size_bytes().await > 0);

    // A tile inside the downloaded region resolves without another fetch
    let fetches_after_download = fetcher.call_count();
    let coord = aeroplan_core::geo::tile_for(-15.79, -47.88, 5);
    let bytes = engine.resolve_tile("wac", coord).await;
    assert_eq!(bytes, vec![0x42; 24]);
    assert_eq!(fetcher.call_count(), fetches_after_download);
}

#[tokio::test]
async fn test_resolve_caches_for_the_next_request() {
    let db = Database::open_in_memory().await.unwrap();
    let fetcher = CountingFetcher::new();
    let engine = engine_with(Some(db), fetcher.clone(), true).await;

    let coord = TileCoord::new(11, 17, 5);
    engine.resolve_tile("wac", coord).await;
    assert_eq!(fetcher.call_count(), 1);

    engine.resolve_tile("wac", coord).await;
    assert_eq!(fetcher.call_count(), 1, "second request must hit the cache");
}

#[tokio::test]
async fn test_unknown_layer_yields_placeholder() {
    let db = Database::open_in_memory().await.unwrap();
    let fetcher = CountingFetcher::new();
    let engine = engine_with(Some(db), fetcher.clone(), true).await;

    let bytes = engine.resolve_tile("sectional", TileCoord::new(0, 0, 1)).await;
    assert_eq!(bytes, BLANK_TILE_PNG);
    assert_eq!(fetcher.call_count(), 0);

    let result = engine
        .download_layer("sectional", &brazil(), &[5], |_| {})
        .await;
    assert!(matches!(result, Err(OfflineError::InvalidLayer(_))));
}

#[tokio::test]
async fn test_sync_then_search_offline() {
    let db = Database::open_in_memory().await.unwrap();
    let engine = engine_with(Some(db), CountingFetcher::new(), true).await;

    assert!(engine.is_sync_needed().await);

    let result = engine.sync_reference_data(|_| {}).await.unwrap();
    assert_eq!(result.total, 5);
    assert_eq!(result.integrity, Integrity::Verified);

    let hits = engine.search_offline("vor zero").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].category, NavCategory::Vor);

    assert!(!engine.is_sync_needed().await);
}

#[tokio::test]
async fn test_clear_layer_through_the_engine() {
    let db = Database::open_in_memory().await.unwrap();
    let engine = engine_with(Some(db), CountingFetcher::new(), true).await;

    engine
        .download_layer("wac", &brazil(), &[5], |_| {})
        .await
        .unwrap();
    assert_eq!(engine.cached_tile_count("wac").await, 20);

    engine.clear_layer_cache("wac").await.unwrap();
    assert_eq!(engine.cached_tile_count("wac").await, 0);
    assert!(!engine.is_layer_cached("wac").await);
    assert!(engine.layer_metadata("wac").await.is_none());
}

#[tokio::test]
async fn test_cacheless_engine_still_serves_tiles() {
    let fetcher = CountingFetcher::new();
    let engine = engine_with(None, fetcher.clone(), true).await;

    // Tile serving falls back to the network
    let bytes = engine.resolve_tile("wac", TileCoord::new(3, 3, 3)).await;
    assert_eq!(bytes, vec![0x42; 24]);
    assert_eq!(fetcher.call_count(), 1);

    // Everything that needs storage degrades without panicking
    let result = engine.download_layer("wac", &brazil(), &[5], |_| {}).await;
    assert!(matches!(result, Err(OfflineError::StorageUnavailable)));
    let result = engine.sync_reference_data(|_| {}).await;
    assert!(matches!(result, Err(OfflineError::StorageUnavailable)));
    assert!(engine.search_offline("anything").await.is_empty());
    assert!(engine.is_sync_needed().await);
    assert_eq!(engine.cached_tile_count("wac").await, 0);
    assert_eq!(engine.cache_size_bytes().await, 0);
    assert!(engine.nav_store().is_none());
}

#[tokio::test]
async fn test_cacheless_offline_engine_serves_placeholders() {
    let fetcher = CountingFetcher::new();
    let engine = engine_with(None, fetcher.clone(), false).await;

    let bytes = engine.resolve_tile("wac", TileCoord::new(3, 3, 3)).await;
    assert_eq!(bytes, BLANK_TILE_PNG);
    assert_eq!(fetcher.call_count(), 0);
}
