//! Bulk tile downloader: covers a geographic region across several zoom
//! levels for offline use.
//!
//! Tiles are fetched in fixed-size concurrent batches with a pause between
//! batches so the origin server is not overwhelmed. A tile that exhausts its
//! retries is skipped, never aborting the run; a layer that finishes with
//! gaps is still finalized as `Complete` (the cache-first serving path fills
//! holes lazily later).

use crate::geo::{tiles_in_bbox, BoundingBox, TileCoord};
use crate::store::{now_ms, LayerMetadata, LayerStatus, TileStore};
use crate::tile_key;
use crate::tile_source::{wms_url, ConnectivityProbe, TileFetcher};
use crate::{EngineConfig, LayerDef, OfflineError};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;

pub struct BulkDownloader {
    store: Arc<TileStore>,
    fetcher: Arc<dyn TileFetcher>,
    probe: Arc<dyn ConnectivityProbe>,
    config: Arc<EngineConfig>,
}

impl BulkDownloader {
    pub fn new(
        store: Arc<TileStore>,
        fetcher: Arc<dyn TileFetcher>,
        probe: Arc<dyn ConnectivityProbe>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            fetcher,
            probe,
            config,
        }
    }

    /// Download every tile of `layer` inside `bbox` at the given zoom
    /// levels. `on_progress` receives whole percentages as tiles finish.
    ///
    /// Input validation and the connectivity check happen before any
    /// metadata is written; once the run is underway it always finishes and
    /// finalizes the layer as `Complete`, however many tiles were skipped.
    pub async fn download_layer<F>(
        &self,
        layer: &LayerDef,
        bbox: &BoundingBox,
        zoom_levels: &[u8],
        on_progress: F,
    ) -> Result<LayerMetadata, OfflineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        if !bbox.is_valid() {
            return Err(OfflineError::InvalidBounds(format!(
                "{},{} .. {},{}",
                bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
            )));
        }
        if zoom_levels.is_empty() {
            return Err(OfflineError::InvalidBounds("no zoom levels".to_string()));
        }
        if !self.probe.is_online().await {
            return Err(OfflineError::Offline);
        }

        let tasks: Vec<TileCoord> = zoom_levels
            .iter()
            .flat_map(|z| tiles_in_bbox(bbox, *z))
            .collect();
        let total = tasks.len() as u64;

        let mut meta = LayerMetadata {
            layer_id: layer.id.clone(),
            total_tiles: total,
            downloaded_tiles: 0,
            last_updated: now_ms(),
            status: LayerStatus::Downloading,
        };
        self.store.put_layer_metadata(&meta).await?;

        info!(
            "bulk download started — layer_id={} zoom_levels={:?} total_tiles={}",
            layer.id, zoom_levels, total
        );

        if total == 0 {
            meta.status = LayerStatus::Complete;
            meta.last_updated = now_ms();
            self.store.put_layer_metadata(&meta).await?;
            on_progress(100);
            return Ok(meta);
        }

        let mut processed = 0u64;
        let mut downloaded = 0u64;

        for (batch_index, batch) in tasks.chunks(self.config.batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
            }

            let mut results = stream::iter(
                batch
                    .iter()
                    .copied()
                    .map(|coord| self.fetch_one(layer, coord)),
            )
            .buffer_unordered(batch.len());

            while let Some(fetched) = results.next().await {
                processed += 1;
                if fetched {
                    downloaded += 1;
                }
                on_progress(percent(processed, total));
            }
            drop(results);

            meta.downloaded_tiles = downloaded.min(total);
            meta.last_updated = now_ms();
            // Mid-run metadata persistence is best-effort; a storage hiccup
            // must not abort the batches still in flight.
            if let Err(e) = self.store.put_layer_metadata(&meta).await {
                warn!("progress metadata write failed — layer_id={} err={}", layer.id, e);
            }
        }

        meta.status = LayerStatus::Complete;
        meta.last_updated = now_ms();
        self.store.put_layer_metadata(&meta).await?;

        info!(
            "bulk download finished — layer_id={} downloaded_tiles={} total_tiles={}",
            layer.id, meta.downloaded_tiles, meta.total_tiles
        );
        Ok(meta)
    }

    /// One tile with capped retries and a fixed backoff. Returns whether
    /// the tile ended up cached.
    async fn fetch_one(&self, layer: &LayerDef, coord: TileCoord) -> bool {
        let url = wms_url(layer, coord);
        let key = tile_key::normalize(&url, &self.config.mirror_groups);
        let attempts = self.config.tile_retries + 1;

        for attempt in 1..=attempts {
            match self.fetcher.fetch(&url, self.config.direct_timeout).await {
                Ok(tile) if tile.is_image() => {
                    if let Err(e) = self.store.put(&key, &tile.bytes, &layer.id).await {
                        debug!("bulk tile cache write failed — key={} err={}", key, e);
                        return false;
                    }
                    return true;
                }
                Ok(_) => {
                    debug!(
                        "non-image payload — z={} x={} y={} attempt={}",
                        coord.z, coord.x, coord.y, attempt
                    );
                }
                Err(e) => {
                    debug!(
                        "tile fetch failed — z={} x={} y={} attempt={} err={}",
                        coord.z, coord.x, coord.y, attempt, e
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.tile_retry_backoff).await;
            }
        }

        debug!(
            "tile skipped after {} attempts — layer_id={} z={} x={} y={}",
            attempts, layer.id, coord.z, coord.x, coord.y
        );
        false
    }
}

fn percent(processed: u64, total: u64) -> u8 {
    ((processed as f64 / total as f64) * 100.0).round() as u8
}
