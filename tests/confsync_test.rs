// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Config-sync integration tests against the fake router: canonical
//! document, idempotent reloads, debounce coalescing, ephemeral test paths.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use outpost::config::{
    ApiConfig, AuthConfig, Config, DatabaseConfig, DetectConfig, IngestConfig, MediaConfig,
    RouterConfig, StorageConfig,
};
use outpost::confsync::{ConfSyncHandle, ConfigSyncer};
use outpost::router::fake::FakeRouter;
use outpost::router::RouterClient;
use outpost::store::Db;

fn test_config(root: &Path) -> Config {
    Config {
        storage: StorageConfig { root: root.to_path_buf(), segment_secs: 900 },
        database: DatabaseConfig::default(),
        api: ApiConfig::default(),
        auth: AuthConfig::default(),
        router: RouterConfig {
            config_path: root.join("router.yml"),
            control_url: "http://127.0.0.1:9997".into(),
            rtsp_url: "rtsp://127.0.0.1:8554".into(),
        },
        ingest: IngestConfig::default(),
        detect: DetectConfig::default(),
        media: MediaConfig::default(),
    }
}

async fn setup(dir: &TempDir) -> (Db, Config, Arc<FakeRouter>, ConfSyncHandle, CancellationToken) {
    let db = Db::open(&dir.path().join("test.db")).await.unwrap();
    let cfg = test_config(dir.path());
    let router = Arc::new(FakeRouter::new());
    let token = CancellationToken::new();
    let (handle, _join) = ConfigSyncer::spawn(
        db.clone(),
        cfg.clone(),
        router.clone(),
        "reader".into(),
        "secret".into(),
        token.clone(),
    );
    (db, cfg, router, handle, token)
}

// Debounce is 500 ms; give the syncer comfortable headroom.
async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(900)).await;
}

#[tokio::test]
async fn rewrite_reload_and_idempotence() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, router, handle, token) = setup(&dir).await;

    let user = db.create_user("a@example.com", "h").await.unwrap().id;
    let cam = db
        .create_camera(&user, "Door", "rtsp://u:p@10.0.0.2/s", None)
        .await
        .unwrap();

    handle.mark_dirty();
    settle().await;

    let yaml = std::fs::read_to_string(&cfg.router.config_path).expect("config written");
    assert!(yaml.contains(&format!("{}:", cam.path)));
    assert!(yaml.contains("source: rtsp://u:p@10.0.0.2/s"));
    assert!(yaml.contains("readUser: reader"));
    assert_eq!(router.state.lock().reload_count, 1);

    // Same effective config: no second reload.
    handle.mark_dirty();
    settle().await;
    assert_eq!(router.state.lock().reload_count, 1);

    // A real change reloads once more.
    db.create_camera(&user, "Yard", "rtsp://u:p@10.0.0.3/s", None)
        .await
        .unwrap();
    handle.mark_dirty();
    settle().await;
    assert_eq!(router.state.lock().reload_count, 2);

    token.cancel();
}

#[tokio::test]
async fn rapid_marks_coalesce_into_one_reload() {
    let dir = TempDir::new().unwrap();
    let (db, _cfg, router, handle, token) = setup(&dir).await;

    let user = db.create_user("a@example.com", "h").await.unwrap().id;
    for i in 0..4 {
        db.create_camera(&user, &format!("Cam {i}"), &format!("rtsp://h/{i}"), None)
            .await
            .unwrap();
        handle.mark_dirty();
    }
    settle().await;
    assert_eq!(router.state.lock().reload_count, 1);

    token.cancel();
}

#[tokio::test]
async fn failed_reload_keeps_previous_config_and_retries() {
    let dir = TempDir::new().unwrap();
    let (db, _cfg, router, handle, token) = setup(&dir).await;

    let user = db.create_user("a@example.com", "h").await.unwrap().id;
    db.create_camera(&user, "Door", "rtsp://h/a", None).await.unwrap();

    router.state.lock().fail_reloads = true;
    handle.mark_dirty();
    settle().await;
    assert_eq!(router.state.lock().reload_count, 0);

    // Router comes back; the scheduled retry publishes the pending config.
    router.state.lock().fail_reloads = false;
    tokio::time::sleep(StdDuration::from_secs(4)).await;
    assert_eq!(router.state.lock().reload_count, 1);

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_connection_path_expires_after_a_minute() {
    let dir = TempDir::new().unwrap();
    let (_db, _cfg, router, handle, token) = setup(&dir).await;

    let path = handle
        .create_test_path("rtsp://u:p@10.0.0.9/s")
        .await
        .unwrap();
    assert!(path.starts_with("test"));
    assert!(router.state.lock().dynamic_paths.contains_key(&path));
    assert!(router.paths_status().await.unwrap().contains_key(&path));

    // 61 virtual seconds later the path is gone from the router.
    tokio::time::sleep(StdDuration::from_secs(61)).await;
    tokio::task::yield_now().await;
    assert!(!router.state.lock().dynamic_paths.contains_key(&path));

    token.cancel();
}

#[tokio::test]
async fn rejects_non_rtsp_test_urls() {
    let dir = TempDir::new().unwrap();
    let (_db, _cfg, router, handle, token) = setup(&dir).await;

    assert!(handle.create_test_path("http://nope/s").await.is_err());
    assert!(router.state.lock().dynamic_paths.is_empty());
    token.cancel();
}

#[tokio::test]
async fn atomic_write_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("router.yml");
    outpost::confsync::write_file_atomic(&target, b"paths: {}\n").unwrap();
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "paths: {}\n");

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
