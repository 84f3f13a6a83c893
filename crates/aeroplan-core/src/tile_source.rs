//! Cache-first tile serving with multi-endpoint failover.
//!
//! `TileSource::resolve` never fails: a map-rendering pipeline must keep
//! functioning with visibly missing tiles rather than halting, so every
//! failure path resolves to a transparent placeholder instead.

use crate::geo::TileCoord;
use crate::store::TileStore;
use crate::tile_key;
use crate::{EngineConfig, LayerDef, OfflineError};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 1×1 transparent PNG served whenever a tile cannot be produced.
pub const BLANK_TILE_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x60,
    0x00, 0x02, 0x00, 0x00, 0x05, 0x00, 0x01, 0xe9, 0xfa, 0xdc, 0xd8, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

#[derive(Debug, Clone)]
pub struct FetchedTile {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl FetchedTile {
    /// A payload only counts as a tile if it is non-empty image data.
    pub fn is_image(&self) -> bool {
        !self.bytes.is_empty() && self.content_type.starts_with("image/")
    }
}

#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedTile, OfflineError>;
}

/// Injectable replacement for a platform online/offline signal, so the
/// offline branch is deterministically testable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedTile, OfflineError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedTile { bytes, content_type })
    }
}

/// Reports online unless a lightweight HEAD against the probe endpoint
/// fails within its timeout.
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    probe_url: String,
    timeout: Duration,
}

impl HttpConnectivityProbe {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_url: config.probe_url.clone(),
            timeout: config.direct_timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        if self.probe_url.is_empty() {
            return true;
        }
        self.client
            .head(&self.probe_url)
            .timeout(self.timeout)
            .send()
            .await
            .is_ok()
    }
}

/// Builds the WMS GetMap URL for one tile of a layer.
pub fn wms_url(layer: &LayerDef, coord: TileCoord) -> String {
    let bbox = coord.bounds();
    format!(
        "{}?service=WMS&request=GetMap&layers={}&format=image/png&transparent=true&version=1.1.1&width=256&height=256&srs=EPSG:4326&bbox={}",
        layer.endpoint,
        layer.wms_layer,
        bbox.to_wms_param()
    )
}

fn proxy_url(proxy_base: &str, target: &str) -> String {
    format!("{}{}", proxy_base, tile_key::encode_component(target))
}

/// Cache-then-network-then-proxy tile source for one layer.
///
/// The preferred proxy index is a learned, session-only preference owned by
/// the instance; independent sources do not interfere with each other.
pub struct TileSource {
    layer: LayerDef,
    store: Option<Arc<TileStore>>,
    fetcher: Arc<dyn TileFetcher>,
    probe: Arc<dyn ConnectivityProbe>,
    config: Arc<EngineConfig>,
    preferred_proxy: AtomicUsize,
}

impl TileSource {
    pub fn new(
        layer: LayerDef,
        store: Option<Arc<TileStore>>,
        fetcher: Arc<dyn TileFetcher>,
        probe: Arc<dyn ConnectivityProbe>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            layer,
            store,
            fetcher,
            probe,
            config,
            preferred_proxy: AtomicUsize::new(0),
        }
    }

    pub fn layer_id(&self) -> &str {
        &self.layer.id
    }

    /// Resolve a tile to renderable bytes. Never fails; every failure path
    /// returns the transparent placeholder.
    pub async fn resolve(&self, coord: TileCoord) -> Vec<u8> {
        let url = wms_url(&self.layer, coord);
        let key = tile_key::normalize(&url, &self.config.mirror_groups);

        if self.layer.cache_enabled {
            if let Some(store) = &self.store {
                if let Some(blob) = store.get(&key).await {
                    if !blob.is_empty() {
                        return blob;
                    }
                }
            }
        }

        if !self.probe.is_online().await {
            debug!(
                "offline, serving placeholder — layer_id={} z={} x={} y={}",
                self.layer.id, coord.z, coord.x, coord.y
            );
            return BLANK_TILE_PNG.to_vec();
        }

        // Direct endpoint first, short timeout
        match self.fetcher.fetch(&url, self.config.direct_timeout).await {
            Ok(tile) if tile.is_image() => {
                self.cache(&key, &tile.bytes).await;
                return tile.bytes;
            }
            Ok(_) => debug!("direct fetch returned non-image payload — url={}", url),
            Err(e) => debug!("direct fetch failed — url={} err={}", url, e),
        }

        // Fallback proxies, starting from the last one that worked this
        // session and wrapping around.
        let proxies = &self.config.proxy_endpoints;
        if !proxies.is_empty() {
            let start = self.preferred_proxy.load(Ordering::Relaxed) % proxies.len();
            for offset in 0..proxies.len() {
                let idx = (start + offset) % proxies.len();
                let relay = proxy_url(&proxies[idx], &url);
                match self.fetcher.fetch(&relay, self.config.proxy_timeout).await {
                    Ok(tile) if tile.is_image() => {
                        self.preferred_proxy.store(idx, Ordering::Relaxed);
                        self.cache(&key, &tile.bytes).await;
                        return tile.bytes;
                    }
                    Ok(_) => debug!("proxy returned non-image payload — proxy_index={}", idx),
                    Err(e) => debug!("proxy fetch failed — proxy_index={} err={}", idx, e),
                }
            }
        }

        warn!(
            "all endpoints exhausted, serving placeholder — layer_id={} z={} x={} y={}",
            self.layer.id, coord.z, coord.x, coord.y
        );
        BLANK_TILE_PNG.to_vec()
    }

    async fn cache(&self, key: &str, bytes: &[u8]) {
        if !self.layer.cache_enabled {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.put(key, bytes, &self.layer.id).await {
                debug!("tile cache write failed — key={} err={}", key, e);
            }
        }
    }
}
