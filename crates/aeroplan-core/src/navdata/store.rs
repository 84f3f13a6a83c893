//! Local nav-point collections and the sync-metadata row.
//!
//! Same degradation policy as the tile store: reads swallow storage errors
//! (empty results, missing metadata), writes report them to the caller.

use super::{NavCategory, NavPoint, SyncMetadata, SyncStatus};
use crate::store::Database;
use log::warn;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct NavStore {
    pool: SqlitePool,
}

impl NavStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool() }
    }

    /// Upserts a batch of points inside one transaction.
    pub async fn put_points(&self, points: &[NavPoint]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            sqlx::query(
                "INSERT INTO nav_points
                     (category, id, name, icao_code, lat, lng, kind, cached_at, search_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(category, id) DO UPDATE SET
                     name = excluded.name,
                     icao_code = excluded.icao_code,
                     lat = excluded.lat,
                     lng = excluded.lng,
                     kind = excluded.kind,
                     cached_at = excluded.cached_at,
                     search_key = excluded.search_key",
            )
            .bind(point.category.as_str())
            .bind(&point.id)
            .bind(&point.name)
            .bind(&point.icao_code)
            .bind(point.lat)
            .bind(point.lng)
            .bind(&point.kind)
            .bind(point.cached_at)
            .bind(&point.search_key)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn count_points(&self) -> u64 {
        let row = sqlx::query("SELECT COUNT(*) FROM nav_points")
            .fetch_one(&self.pool)
            .await;
        match row {
            Ok(row) => row.get::<i64, _>(0) as u64,
            Err(e) => {
                warn!("nav point count failed — err={}", e);
                0
            }
        }
    }

    pub async fn count_category(&self, category: NavCategory) -> u64 {
        let row = sqlx::query("SELECT COUNT(*) FROM nav_points WHERE category = ?1")
            .bind(category.as_str())
            .fetch_one(&self.pool)
            .await;
        match row {
            Ok(row) => row.get::<i64, _>(0) as u64,
            Err(e) => {
                warn!(
                    "nav point count failed — category={} err={}",
                    category.as_str(),
                    e
                );
                0
            }
        }
    }

    /// Case-insensitive substring scan over `search_key`, all categories.
    /// Rows are unique by (category, id), so results need no further
    /// deduplication.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<NavPoint> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let pattern = format!("%{}%", escape_like(&needle));
        let rows = sqlx::query(
            "SELECT category, id, name, icao_code, lat, lng, kind, cached_at, search_key
             FROM nav_points
             WHERE search_key LIKE ?1 ESCAPE '\\'
             ORDER BY name
             LIMIT ?2",
        )
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows.iter().filter_map(row_to_point).collect(),
            Err(e) => {
                warn!("offline search failed — query={} err={}", query, e);
                Vec::new()
            }
        }
    }

    pub async fn sync_metadata(&self) -> Option<SyncMetadata> {
        let row = sqlx::query("SELECT last_sync, total_points, status FROM sync_metadata WHERE id = 1")
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(row)) => Some(SyncMetadata {
                last_sync: row.get(0),
                total_points: row.get::<i64, _>(1) as u64,
                status: SyncStatus::parse(row.get::<String, _>(2).as_str()),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("sync metadata read failed — err={}", e);
                None
            }
        }
    }

    pub async fn put_sync_metadata(&self, meta: &SyncMetadata) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sync_metadata (id, last_sync, total_points, status)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 last_sync = excluded.last_sync,
                 total_points = excluded.total_points,
                 status = excluded.status",
        )
        .bind(meta.last_sync)
        .bind(meta.total_points as i64)
        .bind(meta.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// User fixes have independent CRUD; the category is forced so a caller
    /// cannot overwrite synced data through this path.
    pub async fn put_user_fix(&self, point: &NavPoint) -> Result<(), sqlx::Error> {
        let mut fix = point.clone();
        fix.category = NavCategory::UserFix;
        self.put_points(std::slice::from_ref(&fix)).await
    }

    pub async fn delete_user_fix(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM nav_points WHERE category = ?1 AND id = ?2")
            .bind(NavCategory::UserFix.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_user_fixes(&self) -> Vec<NavPoint> {
        let rows = sqlx::query(
            "SELECT category, id, name, icao_code, lat, lng, kind, cached_at, search_key
             FROM nav_points WHERE category = ?1 ORDER BY name",
        )
        .bind(NavCategory::UserFix.as_str())
        .fetch_all(&self.pool)
        .await;
        match rows {
            Ok(rows) => rows.iter().filter_map(row_to_point).collect(),
            Err(e) => {
                warn!("user fix listing failed — err={}", e);
                Vec::new()
            }
        }
    }
}

fn row_to_point(row: &sqlx::sqlite::SqliteRow) -> Option<NavPoint> {
    let category = NavCategory::parse(row.get::<String, _>(0).as_str())?;
    Some(NavPoint {
        category,
        id: row.get(1),
        name: row.get(2),
        icao_code: row.get(3),
        lat: row.get(4),
        lng: row.get(5),
        kind: row.get(6),
        cached_at: row.get(7),
        search_key: row.get(8),
    })
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
