//! Persistent keyed blob store for map tiles, plus per-layer download
//! metadata. One SQLite database backs both this module and the nav-point
//! collections in `navdata::store`.
//!
//! Read paths degrade rather than fail: a storage error on `get`/`count`
//! logs a warning and behaves like a cache miss, so the tile-serving path
//! keeps working when the database is broken or missing.

use log::warn;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStatus {
    Pending,
    Downloading,
    Complete,
    Error,
}

impl LayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerStatus::Pending => "pending",
            LayerStatus::Downloading => "downloading",
            LayerStatus::Complete => "complete",
            LayerStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => LayerStatus::Downloading,
            "complete" => LayerStatus::Complete,
            "error" => LayerStatus::Error,
            _ => LayerStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerMetadata {
    pub layer_id: String,
    pub total_tiles: u64,
    pub downloaded_tiles: u64,
    pub last_updated: i64,
    pub status: LayerStatus,
}

/// Shared handle to the engine's SQLite database. Creates the schema on
/// open; `TileStore` and `NavStore` each borrow the pool.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // More than one pooled connection would each get a private
        // in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tiles (
                key TEXT PRIMARY KEY,
                layer_id TEXT NOT NULL,
                blob BLOB NOT NULL,
                timestamp INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tiles_layer ON tiles(layer_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS layer_metadata (
                layer_id TEXT PRIMARY KEY,
                total_tiles INTEGER NOT NULL,
                downloaded_tiles INTEGER NOT NULL,
                last_updated INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nav_points (
                category TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                icao_code TEXT,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                kind TEXT,
                cached_at INTEGER NOT NULL,
                search_key TEXT NOT NULL,
                PRIMARY KEY (category, id)
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nav_icao ON nav_points(icao_code)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nav_name ON nav_points(name)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nav_search ON nav_points(search_key)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nav_category ON nav_points(category)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_sync INTEGER NOT NULL,
                total_points INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct TileStore {
    pool: SqlitePool,
}

impl TileStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool() }
    }

    /// Read a cached blob. Storage errors are treated as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let row = sqlx::query("SELECT blob FROM tiles WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(row)) => Some(row.get::<Vec<u8>, _>(0)),
            Ok(None) => None,
            Err(e) => {
                warn!("tile cache read failed, treating as miss — key={} err={}", key, e);
                None
            }
        }
    }

    /// Idempotent upsert; also bumps the layer's `last_updated`.
    pub async fn put(&self, key: &str, blob: &[u8], layer_id: &str) -> Result<(), sqlx::Error> {
        let now = now_ms();
        sqlx::query(
            "INSERT INTO tiles (key, layer_id, blob, timestamp) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 layer_id = excluded.layer_id,
                 blob = excluded.blob,
                 timestamp = excluded.timestamp",
        )
        .bind(key)
        .bind(layer_id)
        .bind(blob)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE layer_metadata SET last_updated = ?1 WHERE layer_id = ?2")
            .bind(now)
            .bind(layer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self, layer_id: &str) -> u64 {
        let row = sqlx::query("SELECT COUNT(*) FROM tiles WHERE layer_id = ?1")
            .bind(layer_id)
            .fetch_one(&self.pool)
            .await;
        match row {
            Ok(row) => row.get::<i64, _>(0) as u64,
            Err(e) => {
                warn!("tile count failed — layer_id={} err={}", layer_id, e);
                0
            }
        }
    }

    /// Deletes every blob tagged with the layer and its metadata row.
    /// Afterwards the layer is indistinguishable from one never downloaded.
    pub async fn clear_layer(&self, layer_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tiles WHERE layer_id = ?1")
            .bind(layer_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM layer_metadata WHERE layer_id = ?1")
            .bind(layer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Layer ids whose metadata says `Complete`; ground truth for the
    /// "what have I downloaded" list shown at startup.
    pub async fn list_complete_layer_ids(&self) -> Vec<String> {
        let rows = sqlx::query("SELECT layer_id FROM layer_metadata WHERE status = ?1")
            .bind(LayerStatus::Complete.as_str())
            .fetch_all(&self.pool)
            .await;
        match rows {
            Ok(rows) => rows.iter().map(|r| r.get::<String, _>(0)).collect(),
            Err(e) => {
                warn!("listing complete layers failed — err={}", e);
                Vec::new()
            }
        }
    }

    pub async fn layer_metadata(&self, layer_id: &str) -> Option<LayerMetadata> {
        let row = sqlx::query(
            "SELECT layer_id, total_tiles, downloaded_tiles, last_updated, status
             FROM layer_metadata WHERE layer_id = ?1",
        )
        .bind(layer_id)
        .fetch_optional(&self.pool)
        .await;
        match row {
            Ok(Some(row)) => Some(LayerMetadata {
                layer_id: row.get(0),
                total_tiles: row.get::<i64, _>(1) as u64,
                downloaded_tiles: row.get::<i64, _>(2) as u64,
                last_updated: row.get(3),
                status: LayerStatus::parse(row.get::<String, _>(4).as_str()),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("layer metadata read failed — layer_id={} err={}", layer_id, e);
                None
            }
        }
    }

    pub async fn put_layer_metadata(&self, meta: &LayerMetadata) -> Result<(), sqlx::Error> {
        // downloaded may never exceed total
        let downloaded = meta.downloaded_tiles.min(meta.total_tiles);
        sqlx::query(
            "INSERT INTO layer_metadata (layer_id, total_tiles, downloaded_tiles, last_updated, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(layer_id) DO UPDATE SET
                 total_tiles = excluded.total_tiles,
                 downloaded_tiles = excluded.downloaded_tiles,
                 last_updated = excluded.last_updated,
                 status = excluded.status",
        )
        .bind(&meta.layer_id)
        .bind(meta.total_tiles as i64)
        .bind(downloaded as i64)
        .bind(meta.last_updated)
        .bind(meta.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Total bytes of cached tile imagery, for the status readout.
    pub async fn total_size_bytes(&self) -> u64 {
        let row = sqlx::query("SELECT COALESCE(SUM(LENGTH(blob)), 0) FROM tiles")
            .fetch_one(&self.pool)
            .await;
        match row {
            Ok(row) => row.get::<i64, _>(0) as u64,
            Err(e) => {
                warn!("cache size query failed — err={}", e);
                0
            }
        }
    }
}
