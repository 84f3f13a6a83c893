// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Web Mercator clips latitude at this parallel; anything beyond is snapped
/// to the edge tile row.
const MAX_MERCATOR_LAT: f64 = 85.05112878;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn is_valid(&self) -> bool {
        self.min_lat < self.max_lat
            && self.min_lon < self.max_lon
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
            && self.min_lon >= -180.0
            && self.max_lon <= 180.0
            && self.min_lat.is_finite()
            && self.max_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lon.is_finite()
    }

    /// `minLng,minLat,maxLng,maxLat` — the ordering WMS 1.1.1 expects.
    pub fn to_wms_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Slippy-map tile address: the `(x, y, z)` scheme used by web tile servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Inverse projection: the geographic extent this tile covers.
    /// Used to derive the `bbox` parameter of a WMS GetMap request.
    pub fn bounds(&self) -> BoundingBox {
        let n = (1u32 << self.z) as f64;
        let min_lon = self.x as f64 / n * 360.0 - 180.0;
        let max_lon = (self.x + 1) as f64 / n * 360.0 - 180.0;
        let max_lat = tile_row_to_lat(self.y as f64, n);
        let min_lat = tile_row_to_lat((self.y + 1) as f64, n);
        BoundingBox::new(min_lat, max_lat, min_lon, max_lon)
    }
}

fn tile_row_to_lat(y: f64, n: f64) -> f64 {
    let t = PI * (1.0 - 2.0 * y / n);
    t.sinh().atan().to_degrees()
}

/// Forward projection: the tile containing a geographic point at `zoom`.
pub fn tile_for(lat: f64, lon: f64, zoom: u8) -> TileCoord {
    let n = 1u32 << zoom;
    let nf = n as f64;
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let lat_rad = lat.to_radians();

    let x = ((lon + 180.0) / 360.0 * nf).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * nf).floor();

    TileCoord::new(
        (x.max(0.0) as u32).min(n - 1),
        (y.max(0.0) as u32).min(n - 1),
        zoom,
    )
}

/// Every tile in the rectangle spanned by the bbox corners at `zoom`.
pub fn tiles_in_bbox(bbox: &BoundingBox, zoom: u8) -> Vec<TileCoord> {
    let nw = tile_for(bbox.max_lat, bbox.min_lon, zoom);
    let se = tile_for(bbox.min_lat, bbox.max_lon, zoom);

    let mut tiles = Vec::with_capacity(
        ((se.x - nw.x + 1) as usize).saturating_mul((se.y - nw.y + 1) as usize),
    );
    for x in nw.x..=se.x {
        for y in nw.y..=se.y {
            tiles.push(TileCoord::new(x, y, zoom));
        }
    }
    tiles
}
