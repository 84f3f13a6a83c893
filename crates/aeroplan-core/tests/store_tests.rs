use aeroplan_core::store::{Database, LayerMetadata, LayerStatus, TileStore};

fn meta(layer_id: &str, total: u64, downloaded: u64, status: LayerStatus) -> LayerMetadata {
    LayerMetadata {
        layer_id: layer_id.to_string(),
        total_tiles: total,
        downloaded_tiles: downloaded,
        last_updated: 0,
        status,
    }
}

#[tokio::test]
async fn test_put_get_roundtrip() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    let blob: Vec<u8> = (0u16..600).map(|i| (i % 251) as u8).collect();
    store.put("k1", &blob, "wac").await.unwrap();

    assert_eq!(store.get("k1").await.as_deref(), Some(blob.as_slice()));
    assert_eq!(store.get("missing").await, None);
}

#[tokio::test]
async fn test_put_is_an_upsert() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    store.put("k1", b"old", "wac").await.unwrap();
    store.put("k1", b"new", "wac").await.unwrap();

    assert_eq!(store.get("k1").await.as_deref(), Some(b"new".as_slice()));
    assert_eq!(store.count("wac").await, 1);
}

#[tokio::test]
async fn test_clear_layer_leaves_other_layers_untouched() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    store.put("a1", b"x", "wac").await.unwrap();
    store.put("a2", b"y", "wac").await.unwrap();
    store.put("b1", b"z", "enrc-low").await.unwrap();
    store
        .put_layer_metadata(&meta("wac", 2, 2, LayerStatus::Complete))
        .await
        .unwrap();

    store.clear_layer("wac").await.unwrap();

    assert_eq!(store.count("wac").await, 0);
    assert_eq!(store.get("a1").await, None);
    assert!(store.layer_metadata("wac").await.is_none());
    // The other layer is untouched
    assert_eq!(store.count("enrc-low").await, 1);
    assert_eq!(store.get("b1").await.as_deref(), Some(b"z".as_slice()));
}

#[tokio::test]
async fn test_clearing_unknown_layer_is_a_noop() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);
    // Indistinguishable from clearing a layer that existed
    store.clear_layer("never-downloaded").await.unwrap();
    assert_eq!(store.count("never-downloaded").await, 0);
}

#[tokio::test]
async fn test_list_complete_layer_ids() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    store
        .put_layer_metadata(&meta("wac", 10, 10, LayerStatus::Complete))
        .await
        .unwrap();
    store
        .put_layer_metadata(&meta("enrc-low", 10, 3, LayerStatus::Downloading))
        .await
        .unwrap();

    let complete = store.list_complete_layer_ids().await;
    assert_eq!(complete, vec!["wac".to_string()]);
}

#[tokio::test]
async fn test_metadata_roundtrip_and_clamp() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    // downloaded above total is clamped on write
    store
        .put_layer_metadata(&meta("wac", 5, 9, LayerStatus::Downloading))
        .await
        .unwrap();

    let m = store.layer_metadata("wac").await.unwrap();
    assert_eq!(m.total_tiles, 5);
    assert_eq!(m.downloaded_tiles, 5);
    assert_eq!(m.status, LayerStatus::Downloading);
}

#[tokio::test]
async fn test_put_bumps_layer_last_updated() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    let mut m = meta("wac", 1, 0, LayerStatus::Downloading);
    m.last_updated = 1;
    store.put_layer_metadata(&m).await.unwrap();

    store.put("k1", b"tile", "wac").await.unwrap();

    let updated = store.layer_metadata("wac").await.unwrap();
    assert!(updated.last_updated > 1);
}

#[tokio::test]
async fn test_file_backed_database_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    {
        let db = Database::open(&path).await.unwrap();
        let store = TileStore::new(&db);
        store.put("k1", b"persisted", "wac").await.unwrap();
    }

    let db = Database::open(&path).await.unwrap();
    let store = TileStore::new(&db);
    assert_eq!(store.get("k1").await.as_deref(), Some(b"persisted".as_slice()));
}

#[tokio::test]
async fn test_total_size_bytes() {
    let db = Database::open_in_memory().await.unwrap();
    let store = TileStore::new(&db);

    assert_eq!(store.total_size_bytes().await, 0);
    store.put("k1", &[0u8; 100], "wac").await.unwrap();
    store.put("k2", &[0u8; 28], "enrc-low").await.unwrap();
    assert_eq!(store.total_size_bytes().await, 128);
}
