// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention reaper integration tests: horizon boundaries, file-then-row
//! ordering, low-disk reclaim, dead camera directory sweep.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use tempfile::TempDir;

use outpost::config::{
    ApiConfig, AuthConfig, Config, DatabaseConfig, DetectConfig, IngestConfig, MediaConfig,
    RouterConfig, StorageConfig,
};
use outpost::retention::{reap_cycle, DiskProbe};
use outpost::segmenter::segment_filename;
use outpost::store::events::EventRecord;
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

/// Probe with an adjustable free fraction.
struct FakeProbe {
    total: u64,
    free: AtomicU64,
}

impl FakeProbe {
    fn with_free_pct(pct: f64) -> FakeProbe {
        let total = 1_000_000u64;
        FakeProbe {
            total,
            free: AtomicU64::new((total as f64 * pct / 100.0) as u64),
        }
    }
}

impl DiskProbe for FakeProbe {
    fn usage(&self, _root: &Path) -> Option<(u64, u64)> {
        Some((self.total, self.free.load(Ordering::Relaxed)))
    }
}

async fn setup(dir: &TempDir) -> (Db, Config, String, String) {
    let db = Db::open(&dir.path().join("test.db")).await.unwrap();
    let cfg = test_config(dir.path());
    let user = db.create_user("a@example.com", "h").await.unwrap().id;
    let cam = db
        .create_camera(&user, "Door", "rtsp://h/a", None)
        .await
        .unwrap()
        .id;
    (db, cfg, user, cam)
}

async fn seed_event(db: &Db, cfg: &Config, user: &str, cam: &str, id: &str, age_hours: i64) {
    let end = Utc::now() - Duration::hours(age_hours);
    let dir = cfg.events_dir(cam);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{id}.mp4")), b"clip").unwrap();
    std::fs::write(dir.join(format!("{id}.jpg")), b"thumb").unwrap();
    db.insert_event(&EventRecord {
        id: id.into(),
        camera_id: cam.into(),
        user_id: user.into(),
        start_ts: end - Duration::seconds(10),
        end_ts: Some(end),
        reason: "motion".into(),
        video_path: Some(format!("events/{cam}/{id}.mp4")),
        thumb_path: Some(format!("events/{cam}/{id}.jpg")),
    })
    .await
    .unwrap();
}

async fn seed_segment(db: &Db, cfg: &Config, cam: &str, start_offset_secs: i64, duration: f64) -> String {
    let start = Utc::now() - Duration::seconds(start_offset_secs);
    let name = segment_filename(start);
    let dir = cfg.continuous_dir(cam);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(&name), vec![0u8; 128]).unwrap();
    db.insert_open_segment(cam, start, &name, 128).await.unwrap();
    db.close_segment(cam, &name, duration, 128).await.unwrap();
    name
}

#[tokio::test]
async fn events_past_the_horizon_lose_rows_and_files() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, user, cam) = setup(&dir).await;
    db.update_settings(1, None).await.unwrap();

    seed_event(&db, &cfg, &user, &cam, "old", 26).await;
    seed_event(&db, &cfg, &user, &cam, "fresh", 22).await;

    let probe = FakeProbe::with_free_pct(50.0);
    let stats = reap_cycle(&db, &cfg, &probe, Utc::now()).await.unwrap();
    assert_eq!(stats.events_deleted, 1);

    let events_dir = cfg.events_dir(&cam);
    assert!(!events_dir.join("old.mp4").exists());
    assert!(!events_dir.join("old.jpg").exists());
    assert!(db.event(&user, "old").await.unwrap().is_none());

    assert!(events_dir.join("fresh.mp4").exists());
    assert!(db.event(&user, "fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn missing_files_do_not_block_row_deletion() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, user, cam) = setup(&dir).await;
    db.update_settings(1, None).await.unwrap();

    seed_event(&db, &cfg, &user, &cam, "old", 26).await;
    std::fs::remove_file(cfg.events_dir(&cam).join("old.mp4")).unwrap();

    let probe = FakeProbe::with_free_pct(50.0);
    let stats = reap_cycle(&db, &cfg, &probe, Utc::now()).await.unwrap();
    assert_eq!(stats.events_deleted, 1);
    assert!(db.event(&user, "old").await.unwrap().is_none());
}

#[tokio::test]
async fn segment_horizon_boundary_is_one_second_sharp() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, _user, cam) = setup(&dir).await;
    db.update_settings(1, None).await.unwrap();

    // Ends 24h + 1s ago: reaped. Ends 23h59m59s ago: kept.
    let doomed = seed_segment(&db, &cfg, &cam, 24 * 3600 + 61, 60.0).await;
    let spared = seed_segment(&db, &cfg, &cam, 24 * 3600 + 59, 60.0).await;

    let probe = FakeProbe::with_free_pct(50.0);
    let stats = reap_cycle(&db, &cfg, &probe, Utc::now()).await.unwrap();
    assert_eq!(stats.segments_deleted, 1);

    let archive = cfg.continuous_dir(&cam);
    assert!(!archive.join(&doomed).exists());
    assert!(archive.join(&spared).exists());
    let remaining = db.segments_for_camera(&cam).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].filename, spared);
}

#[tokio::test]
async fn low_disk_reclaims_oldest_but_spares_recent_and_events() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, user, cam) = setup(&dir).await;
    // Generous retention so only the disk floor can trigger deletions.
    db.update_settings(30, None).await.unwrap();

    let oldest = seed_segment(&db, &cfg, &cam, 25 * 3600, 900.0).await;
    let middle = seed_segment(&db, &cfg, &cam, 20 * 3600, 900.0).await;
    let recent = seed_segment(&db, &cfg, &cam, 30 * 60, 900.0).await;
    seed_event(&db, &cfg, &user, &cam, "ev", 2).await;

    // 4% free, and it stays low: reclaim runs until only young segments remain.
    let probe = FakeProbe::with_free_pct(4.0);
    reap_cycle(&db, &cfg, &probe, Utc::now()).await.unwrap();

    let archive = cfg.continuous_dir(&cam);
    assert!(!archive.join(&oldest).exists());
    assert!(!archive.join(&middle).exists());
    assert!(archive.join(&recent).exists());
    // Events ride out low-disk mode.
    assert!(db.event(&user, "ev").await.unwrap().is_some());
    assert!(cfg.events_dir(&cam).join("ev.mp4").exists());
}

#[tokio::test]
async fn healthy_disk_triggers_no_reclaim() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, _user, cam) = setup(&dir).await;
    db.update_settings(30, None).await.unwrap();
    let name = seed_segment(&db, &cfg, &cam, 25 * 3600, 900.0).await;

    let probe = FakeProbe::with_free_pct(40.0);
    let stats = reap_cycle(&db, &cfg, &probe, Utc::now()).await.unwrap();
    assert_eq!(stats.segments_deleted, 0);
    assert!(cfg.continuous_dir(&cam).join(&name).exists());
}

#[tokio::test]
async fn dead_camera_directories_are_swept() {
    let dir = TempDir::new().unwrap();
    let (db, cfg, _user, cam) = setup(&dir).await;

    let ghost_cont = dir.path().join("continuous").join("ghost-cam");
    let ghost_events = dir.path().join("events").join("ghost-cam");
    std::fs::create_dir_all(&ghost_cont).unwrap();
    std::fs::create_dir_all(&ghost_events).unwrap();
    std::fs::write(ghost_cont.join("20260310_101500.mp4"), b"x").unwrap();
    std::fs::write(ghost_events.join("ev.mp4"), b"x").unwrap();

    let live_dir = cfg.continuous_dir(&cam);
    std::fs::create_dir_all(&live_dir).unwrap();

    let probe = FakeProbe::with_free_pct(50.0);
    let stats = reap_cycle(&db, &cfg, &probe, Utc::now()).await.unwrap();
    assert_eq!(stats.dirs_removed, 2);
    assert!(!ghost_cont.exists());
    assert!(!ghost_events.exists());
    assert!(live_dir.exists());
}
