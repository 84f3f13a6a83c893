//! Offline cache and synchronization engine for the AeroPlan flight
//! planner: a persistent keyed blob store for map tiles, a cache-first tile
//! source with multi-endpoint failover, a bulk region downloader, and a
//! paginated reference-data synchronizer with offline search.

pub mod bulk;
pub mod geo;
pub mod navdata;
pub mod store;
pub mod tile_key;
pub mod tile_source;

use geo::BoundingBox;
use log::warn;
use navdata::{
    HttpNavDataClient, NavCategory, NavDataClient, NavPoint, NavStore, ReferenceSyncService,
    SyncResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::{Database, LayerMetadata, TileStore};
use thiserror::Error;
use tile_source::{
    ConnectivityProbe, HttpConnectivityProbe, HttpTileFetcher, TileFetcher, TileSource,
    BLANK_TILE_PNG,
};

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("unknown layer id: {0}")]
    InvalidLayer(String),
    #[error("invalid bounding box: {0}")]
    InvalidBounds(String),
    #[error("network unavailable")]
    Offline,
    #[error("local storage unavailable")]
    StorageUnavailable,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One independently cacheable map layer (one chart type or base-map
/// style), identified by its id in the layer catalog.
#[derive(Debug, Clone)]
pub struct LayerDef {
    pub id: String,
    pub wms_layer: String,
    pub endpoint: String,
    pub cache_enabled: bool,
}

/// All engine tuning in one place, so nothing is an inline literal and
/// every knob is testable and environment-tunable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Catalog of downloadable layers.
    pub layers: Vec<LayerDef>,
    /// Interchangeable host mirrors; each group's first entry is canonical.
    pub mirror_groups: Vec<Vec<String>>,
    /// CORS-relay fallbacks, each taking the encoded target URL appended.
    pub proxy_endpoints: Vec<String>,
    /// HEAD target for the connectivity probe; empty means assume online.
    pub probe_url: String,

    /// Region covered by the reference-data sync.
    pub region_bbox: BoundingBox,
    pub wfs_endpoint: String,
    pub wfs_type_names: Vec<(NavCategory, String)>,
    /// Expected `[min, max]` cached-point counts per category.
    pub expected_ranges: Vec<(NavCategory, (u64, u64))>,

    pub direct_timeout: Duration,
    pub proxy_timeout: Duration,
    pub page_timeout: Duration,

    pub batch_size: usize,
    pub batch_pause: Duration,
    pub tile_retries: u32,
    pub tile_retry_backoff: Duration,

    pub page_size: u64,
    pub page_retries: u32,
    pub page_retry_backoff: Duration,
    pub insert_batch: usize,

    pub freshness_window: Duration,
    pub min_cached_points: u64,
    pub sanity_floor: u64,
    pub search_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let endpoint = "https://geoaisweb.decea.mil.br/geoserver/ICA/wms".to_string();
        Self {
            layers: vec![
                LayerDef {
                    id: "wac".to_string(),
                    wms_layer: "ICA:wac".to_string(),
                    endpoint: endpoint.clone(),
                    cache_enabled: true,
                },
                LayerDef {
                    id: "enrc-low".to_string(),
                    wms_layer: "ICA:enrc_baixa".to_string(),
                    endpoint,
                    cache_enabled: true,
                },
            ],
            mirror_groups: vec![vec![
                "geoaisweb.decea.mil.br".to_string(),
                "geoaisweb2.decea.mil.br".to_string(),
            ]],
            proxy_endpoints: vec![
                "https://corsproxy.io/?".to_string(),
                "https://api.allorigins.win/raw?url=".to_string(),
            ],
            probe_url: "https://www.gstatic.com/generate_204".to_string(),

            // Brazil's extent
            region_bbox: BoundingBox::new(-33.75, 5.27, -73.99, -34.79),
            wfs_endpoint: "https://geoaisweb.decea.mil.br/geoserver/ICA/ows".to_string(),
            wfs_type_names: vec![
                (NavCategory::Airport, "ICA:aerodromos".to_string()),
                (NavCategory::Heliport, "ICA:helipontos".to_string()),
                (NavCategory::Vor, "ICA:vor".to_string()),
                (NavCategory::Ndb, "ICA:ndb".to_string()),
                (NavCategory::Fix, "ICA:waypoints".to_string()),
            ],
            expected_ranges: vec![
                (NavCategory::Airport, (400, 6_000)),
                (NavCategory::Heliport, (200, 8_000)),
                (NavCategory::Vor, (40, 400)),
                (NavCategory::Ndb, (30, 500)),
                (NavCategory::Fix, (1_000, 30_000)),
            ],

            direct_timeout: Duration::from_secs(2),
            proxy_timeout: Duration::from_secs(3),
            page_timeout: Duration::from_secs(20),

            batch_size: 15,
            batch_pause: Duration::from_millis(200),
            tile_retries: 2,
            tile_retry_backoff: Duration::from_millis(500),

            page_size: 1_000,
            page_retries: 3,
            page_retry_backoff: Duration::from_millis(1_000),
            insert_batch: 200,

            freshness_window: Duration::from_secs(7 * 24 * 60 * 60),
            min_cached_points: 100,
            sanity_floor: 100,
            search_limit: 20,
        }
    }
}

impl EngineConfig {
    pub fn layer(&self, layer_id: &str) -> Option<&LayerDef> {
        self.layers.iter().find(|l| l.id == layer_id)
    }

    pub fn wfs_type_name(&self, category: NavCategory) -> Option<&str> {
        self.wfs_type_names
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, name)| name.as_str())
    }

    /// `(0, u64::MAX)` for categories without a configured range.
    pub fn expected_range(&self, category: NavCategory) -> (u64, u64) {
        self.expected_ranges
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, range)| *range)
            .unwrap_or((0, u64::MAX))
    }
}

/// Facade over the whole engine, consumed by the UI/map layer.
///
/// If the local database cannot be opened the engine still works: tile
/// reads fall back to network-or-placeholder, cache writes become no-ops,
/// and the bulk/sync operations report `StorageUnavailable` instead of
/// crashing.
pub struct OfflineEngine {
    config: Arc<EngineConfig>,
    tiles: Option<Arc<TileStore>>,
    sources: HashMap<String, TileSource>,
    fetcher: Arc<dyn TileFetcher>,
    probe: Arc<dyn ConnectivityProbe>,
    sync: Option<ReferenceSyncService>,
}

impl OfflineEngine {
    /// Opens the engine against the database at `db_path` with production
    /// HTTP collaborators.
    pub async fn open(config: EngineConfig, db_path: &Path) -> Self {
        let db = match Database::open(db_path).await {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(
                    "local storage unavailable, running cacheless — db_path={} err={}",
                    db_path.display(),
                    e
                );
                None
            }
        };
        let config = Arc::new(config);
        let fetcher: Arc<dyn TileFetcher> = Arc::new(HttpTileFetcher::new());
        let probe: Arc<dyn ConnectivityProbe> = Arc::new(HttpConnectivityProbe::new(&config));
        let nav_client: Arc<dyn NavDataClient> = Arc::new(HttpNavDataClient::new(config.clone()));
        Self::assemble(config, db, fetcher, probe, nav_client)
    }

    /// Wires the engine from explicit collaborators; the seam tests use to
    /// inject fakes.
    pub fn with_parts(
        config: EngineConfig,
        db: Option<Database>,
        fetcher: Arc<dyn TileFetcher>,
        probe: Arc<dyn ConnectivityProbe>,
        nav_client: Arc<dyn NavDataClient>,
    ) -> Self {
        Self::assemble(Arc::new(config), db, fetcher, probe, nav_client)
    }

    fn assemble(
        config: Arc<EngineConfig>,
        db: Option<Database>,
        fetcher: Arc<dyn TileFetcher>,
        probe: Arc<dyn ConnectivityProbe>,
        nav_client: Arc<dyn NavDataClient>,
    ) -> Self {
        let tiles = db.as_ref().map(|db| Arc::new(TileStore::new(db)));
        let sync = db.as_ref().map(|db| {
            ReferenceSyncService::new(NavStore::new(db), nav_client, config.clone())
        });

        let sources = config
            .layers
            .iter()
            .map(|layer| {
                (
                    layer.id.clone(),
                    TileSource::new(
                        layer.clone(),
                        tiles.clone(),
                        fetcher.clone(),
                        probe.clone(),
                        config.clone(),
                    ),
                )
            })
            .collect();

        Self {
            config,
            tiles,
            sources,
            fetcher,
            probe,
            sync,
        }
    }

    /// Default per-user database location.
    pub fn default_db_path() -> PathBuf {
        directories::ProjectDirs::from("br", "aeroplan", "AeroPlan")
            .map(|dirs| dirs.data_dir().join("offline_cache.sqlite"))
            .unwrap_or_else(|| PathBuf::from("offline_cache.sqlite"))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Serve one tile. Never fails; unknown layers and every error path
    /// yield the transparent placeholder.
    pub async fn resolve_tile(&self, layer_id: &str, coord: geo::TileCoord) -> Vec<u8> {
        match self.sources.get(layer_id) {
            Some(source) => source.resolve(coord).await,
            None => {
                warn!("tile requested for unknown layer — layer_id={}", layer_id);
                BLANK_TILE_PNG.to_vec()
            }
        }
    }

    pub async fn cached_tile_count(&self, layer_id: &str) -> u64 {
        match &self.tiles {
            Some(store) => store.count(layer_id).await,
            None => 0,
        }
    }

    pub async fn is_layer_cached(&self, layer_id: &str) -> bool {
        match &self.tiles {
            Some(store) => store
                .layer_metadata(layer_id)
                .await
                .map(|m| m.status == store::LayerStatus::Complete)
                .unwrap_or(false),
            None => false,
        }
    }

    pub async fn clear_layer_cache(&self, layer_id: &str) -> Result<(), OfflineError> {
        let store = self.tiles.as_ref().ok_or(OfflineError::StorageUnavailable)?;
        store.clear_layer(layer_id).await?;
        Ok(())
    }

    pub async fn list_complete_layer_ids(&self) -> Vec<String> {
        match &self.tiles {
            Some(store) => store.list_complete_layer_ids().await,
            None => Vec::new(),
        }
    }

    /// Bulk-download a layer for offline use. `Err` means the run was
    /// rejected before any tile work started.
    pub async fn download_layer<F>(
        &self,
        layer_id: &str,
        bbox: &BoundingBox,
        zoom_levels: &[u8],
        on_progress: F,
    ) -> Result<LayerMetadata, OfflineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        let layer = self
            .config
            .layer(layer_id)
            .ok_or_else(|| OfflineError::InvalidLayer(layer_id.to_string()))?
            .clone();
        let store = self
            .tiles
            .as_ref()
            .ok_or(OfflineError::StorageUnavailable)?
            .clone();
        bulk::BulkDownloader::new(
            store,
            self.fetcher.clone(),
            self.probe.clone(),
            self.config.clone(),
        )
        .download_layer(&layer, bbox, zoom_levels, on_progress)
        .await
    }

    pub async fn sync_reference_data<F>(&self, on_progress: F) -> Result<SyncResult, OfflineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        let sync = self.sync.as_ref().ok_or(OfflineError::StorageUnavailable)?;
        sync.sync(on_progress).await
    }

    pub async fn search_offline(&self, query: &str) -> Vec<NavPoint> {
        match &self.sync {
            Some(sync) => sync.search(query).await,
            None => Vec::new(),
        }
    }

    pub async fn is_sync_needed(&self) -> bool {
        match &self.sync {
            Some(sync) => sync.is_sync_needed().await,
            // Without storage there is nothing cached to be fresh
            None => true,
        }
    }

    /// Direct access to the nav store for user-fix CRUD.
    pub fn nav_store(&self) -> Option<&NavStore> {
        self.sync.as_ref().map(|s| s.store())
    }

    pub async fn cache_size_bytes(&self) -> u64 {
        match &self.tiles {
            Some(store) => store.total_size_bytes().await,
            None => 0,
        }
    }

    pub async fn layer_metadata(&self, layer_id: &str) -> Option<LayerMetadata> {
        match &self.tiles {
            Some(store) => store.layer_metadata(layer_id).await,
            None => None,
        }
    }
}
