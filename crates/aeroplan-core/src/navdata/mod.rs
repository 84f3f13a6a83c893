//! Reference-data synchronizer and offline search.
//!
//! Pulls the complete paginated reference dataset for the configured region
//! (airports, heliports, VORs, NDBs, fixes), validates per-category counts
//! against expected ranges, and writes the results into the local nav-point
//! collections so search keeps working without a network.

pub mod geojson;
pub mod store;

use crate::store::now_ms;
use crate::{EngineConfig, OfflineError};
use async_trait::async_trait;
use geojson::{FeatureCollection, RawNavFeature};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use store::NavStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavCategory {
    Airport,
    Heliport,
    Vor,
    Ndb,
    Fix,
    UserFix,
}

impl NavCategory {
    /// The categories pulled from the remote dataset. `UserFix` is owned by
    /// the UI and never synced.
    pub const SYNCED: [NavCategory; 5] = [
        NavCategory::Airport,
        NavCategory::Heliport,
        NavCategory::Vor,
        NavCategory::Ndb,
        NavCategory::Fix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NavCategory::Airport => "airport",
            NavCategory::Heliport => "heliport",
            NavCategory::Vor => "vor",
            NavCategory::Ndb => "ndb",
            NavCategory::Fix => "fix",
            NavCategory::UserFix => "user_fix",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "airport" => Some(NavCategory::Airport),
            "heliport" => Some(NavCategory::Heliport),
            "vor" => Some(NavCategory::Vor),
            "ndb" => Some(NavCategory::Ndb),
            "fix" => Some(NavCategory::Fix),
            "user_fix" => Some(NavCategory::UserFix),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavPoint {
    pub id: String,
    pub category: NavCategory,
    pub name: String,
    pub icao_code: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub kind: Option<String>,
    pub cached_at: i64,
    pub search_key: String,
}

impl NavPoint {
    /// Builds a point, computing `search_key` once at write time: the
    /// lower-cased concatenation of name and ICAO code.
    pub fn new(
        id: String,
        category: NavCategory,
        name: String,
        icao_code: Option<String>,
        lat: f64,
        lng: f64,
        kind: Option<String>,
        cached_at: i64,
    ) -> Self {
        let search_key = format!("{} {}", name, icao_code.as_deref().unwrap_or(""))
            .trim()
            .to_lowercase();
        Self {
            id,
            category,
            name,
            icao_code,
            lat,
            lng,
            kind,
            cached_at,
            search_key,
        }
    }

    fn from_raw(category: NavCategory, raw: RawNavFeature, cached_at: i64) -> Self {
        Self::new(
            raw.id,
            category,
            raw.name,
            raw.ident,
            raw.lat,
            raw.lng,
            raw.kind,
            cached_at,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Syncing,
    Complete,
    Partial,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Complete => "complete",
            SyncStatus::Partial => "partial",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "syncing" => SyncStatus::Syncing,
            "complete" => SyncStatus::Complete,
            "partial" => SyncStatus::Partial,
            "error" => SyncStatus::Error,
            _ => SyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncMetadata {
    pub last_sync: i64,
    pub total_points: u64,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Verified,
    Partial,
}

/// Outcome of one sync run: per-category counts plus the integrity verdict
/// and its human-readable explanation.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub counts: Vec<(NavCategory, u64)>,
    pub total: u64,
    pub integrity: Integrity,
    pub warnings: Vec<String>,
}

/// Injectable page fetcher for the remote reference dataset.
#[async_trait]
pub trait NavDataClient: Send + Sync {
    async fn fetch_page(
        &self,
        category: NavCategory,
        start_index: u64,
        page_size: u64,
    ) -> Result<Vec<RawNavFeature>, OfflineError>;
}

/// Production client: paginated WFS GetFeature requests returning GeoJSON.
pub struct HttpNavDataClient {
    client: reqwest::Client,
    config: Arc<EngineConfig>,
}

impl HttpNavDataClient {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn page_url(&self, category: NavCategory, start_index: u64, page_size: u64) -> String {
        let type_name = self.config.wfs_type_name(category).unwrap_or("");
        format!(
            "{}?service=WFS&version=1.0.0&request=GetFeature&typeName={}&outputFormat=application/json&bbox={}&maxFeatures={}&startIndex={}",
            self.config.wfs_endpoint,
            type_name,
            self.config.region_bbox.to_wms_param(),
            page_size,
            start_index
        )
    }
}

#[async_trait]
impl NavDataClient for HttpNavDataClient {
    async fn fetch_page(
        &self,
        category: NavCategory,
        start_index: u64,
        page_size: u64,
    ) -> Result<Vec<RawNavFeature>, OfflineError> {
        let url = self.page_url(category, start_index, page_size);
        let response = self
            .client
            .get(&url)
            .timeout(self.config.page_timeout)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        let collection: FeatureCollection = serde_json::from_slice(&bytes)?;
        Ok(geojson::collect_points(collection))
    }
}

pub struct ReferenceSyncService {
    store: NavStore,
    client: Arc<dyn NavDataClient>,
    config: Arc<EngineConfig>,
}

impl ReferenceSyncService {
    pub fn new(store: NavStore, client: Arc<dyn NavDataClient>, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &NavStore {
        &self.store
    }

    /// Runs a full sync across every synced category. A category that never
    /// succeeds records 0 points and turns the verdict `Partial` instead of
    /// aborting the run.
    pub async fn sync<F>(&self, on_progress: F) -> Result<SyncResult, OfflineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        let prior = self.store.sync_metadata().await;
        self.store
            .put_sync_metadata(&SyncMetadata {
                last_sync: prior.as_ref().map(|m| m.last_sync).unwrap_or(0),
                total_points: prior.as_ref().map(|m| m.total_points).unwrap_or(0),
                status: SyncStatus::Syncing,
            })
            .await?;

        let categories = NavCategory::SYNCED;
        let mut counts = Vec::with_capacity(categories.len());
        let mut warnings = Vec::new();
        let mut below_minimum = false;
        let mut total = 0u64;

        for (index, category) in categories.iter().enumerate() {
            let count = self.sync_category(*category, &mut warnings).await;
            let (min, _max) = self.config.expected_range(*category);
            if count < min {
                below_minimum = true;
                warnings.push(format!(
                    "{}: cached {} points, expected at least {}",
                    category.as_str(),
                    count,
                    min
                ));
            }
            total += count;
            counts.push((*category, count));
            on_progress(
                (((index + 1) as f64 / categories.len() as f64) * 100.0).round() as u8,
            );
        }

        let integrity = if below_minimum || total < self.config.sanity_floor {
            Integrity::Partial
        } else {
            Integrity::Verified
        };
        if total < self.config.sanity_floor {
            warnings.push(format!(
                "total of {} cached points is below the sanity floor of {}",
                total, self.config.sanity_floor
            ));
        }

        let status = match integrity {
            Integrity::Verified => SyncStatus::Complete,
            Integrity::Partial => SyncStatus::Partial,
        };
        self.store
            .put_sync_metadata(&SyncMetadata {
                last_sync: now_ms(),
                total_points: total,
                status,
            })
            .await?;

        info!(
            "reference sync finished — total_points={} integrity={:?} warnings={}",
            total,
            integrity,
            warnings.len()
        );
        Ok(SyncResult {
            counts,
            total,
            integrity,
            warnings,
        })
    }

    /// Pages through one category until a short page or exhausted retries,
    /// writing accumulated points in sub-batches. Returns the cached count.
    async fn sync_category(&self, category: NavCategory, warnings: &mut Vec<String>) -> u64 {
        let page_size = self.config.page_size;
        let mut points: Vec<NavPoint> = Vec::new();
        let mut start_index = 0u64;

        loop {
            let mut page = None;
            for attempt in 1..=self.config.page_retries {
                match self
                    .client
                    .fetch_page(category, start_index, page_size)
                    .await
                {
                    Ok(features) => {
                        page = Some(features);
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "page fetch failed — category={} start_index={} attempt={} err={}",
                            category.as_str(),
                            start_index,
                            attempt,
                            e
                        );
                        if attempt < self.config.page_retries {
                            // Linear backoff between attempts
                            tokio::time::sleep(self.config.page_retry_backoff * attempt).await;
                        }
                    }
                }
            }

            let Some(features) = page else {
                warnings.push(format!(
                    "{}: page at offset {} failed after {} attempts",
                    category.as_str(),
                    start_index,
                    self.config.page_retries
                ));
                break;
            };

            let fetched = features.len() as u64;
            let now = now_ms();
            points.extend(
                features
                    .into_iter()
                    .map(|raw| NavPoint::from_raw(category, raw, now)),
            );

            // A page shorter than the page size is the end of the dataset
            if fetched < page_size {
                break;
            }
            start_index += fetched;
        }

        for chunk in points.chunks(self.config.insert_batch) {
            if let Err(e) = self.store.put_points(chunk).await {
                warn!(
                    "nav point batch write failed — category={} batch_len={} err={}",
                    category.as_str(),
                    chunk.len(),
                    e
                );
            }
        }

        points.len() as u64
    }

    /// True when the offline dataset should be (re)fetched: no prior sync,
    /// an incomplete one, a stale one, or an implausibly small one.
    pub async fn is_sync_needed(&self) -> bool {
        let Some(meta) = self.store.sync_metadata().await else {
            return true;
        };
        if meta.status != SyncStatus::Complete {
            return true;
        }
        let age_ms = now_ms() - meta.last_sync;
        if age_ms > self.config.freshness_window.as_millis() as i64 {
            return true;
        }
        self.store.count_points().await < self.config.min_cached_points
    }

    /// Case-insensitive substring search over all categories, user fixes
    /// included, capped at the configured result count.
    pub async fn search(&self, query: &str) -> Vec<NavPoint> {
        self.store.search(query, self.config.search_limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_is_lowercased_name_plus_icao() {
        let p = NavPoint::new(
            "1".to_string(),
            NavCategory::Airport,
            "Guarulhos Intl".to_string(),
            Some("SBGR".to_string()),
            -23.43,
            -46.47,
            None,
            0,
        );
        assert_eq!(p.search_key, "guarulhos intl sbgr");
    }

    #[test]
    fn test_search_key_without_icao() {
        let p = NavPoint::new(
            "2".to_string(),
            NavCategory::Fix,
            "UKBIR".to_string(),
            None,
            -20.0,
            -45.0,
            None,
            0,
        );
        assert_eq!(p.search_key, "ukbir");
    }

    #[test]
    fn test_category_parse_roundtrip() {
        for cat in [
            NavCategory::Airport,
            NavCategory::Heliport,
            NavCategory::Vor,
            NavCategory::Ndb,
            NavCategory::Fix,
            NavCategory::UserFix,
        ] {
            assert_eq!(NavCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(NavCategory::parse("bogus"), None);
    }
}
