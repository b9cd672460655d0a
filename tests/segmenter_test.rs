// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segmenter integration tests: directory reconciliation and timeline
//! queries over the archive index.

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use outpost::segmenter::{
    parse_segment_filename, reconcile_dir, seek, segment_filename, timeline, OpenTracker,
    STALE_AFTER,
};
use outpost::store::Db;

async fn open_db(dir: &TempDir) -> Db {
    Db::open(&dir.path().join("test.db")).await.expect("open db")
}

async fn seed_camera(db: &Db) -> String {
    let user = db.create_user("a@example.com", "h").await.unwrap().id;
    db.create_camera(&user, "Door", "rtsp://h/a", None)
        .await
        .unwrap()
        .id
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

#[tokio::test]
async fn new_files_register_then_close_when_superseded() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let cam = seed_camera(&db).await;
    let archive = dir.path().join("continuous").join(&cam);
    std::fs::create_dir_all(&archive).unwrap();

    let now = Utc::now();
    let start1 = now - Duration::seconds(1000);
    let name1 = segment_filename(start1);
    std::fs::write(archive.join(&name1), vec![0u8; 512]).unwrap();

    let mut tracker = OpenTracker::default();
    reconcile_dir(&db, &cam, &archive, 900, &mut tracker, STALE_AFTER, now)
        .await
        .unwrap();

    let segs = db.segments_for_camera(&cam).await.unwrap();
    assert_eq!(segs.len(), 1);
    assert!(segs[0].is_open());

    // A second file appears: the first closes with its true duration
    // (mtime − start ≈ 1000 s, clamped to nominal + slack).
    let start2 = now - Duration::seconds(100);
    std::fs::write(archive.join(segment_filename(start2)), vec![0u8; 64]).unwrap();
    reconcile_dir(&db, &cam, &archive, 900, &mut tracker, STALE_AFTER, now)
        .await
        .unwrap();

    let segs = db.segments_for_camera(&cam).await.unwrap();
    assert_eq!(segs.len(), 2);
    assert!(!segs[0].is_open());
    assert!(segs[0].duration_secs.unwrap() <= 901.0);
    assert!(segs[1].is_open());
}

#[tokio::test]
async fn stale_open_segment_closes_after_two_minutes() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let cam = seed_camera(&db).await;
    let archive = dir.path().join("continuous").join(&cam);
    std::fs::create_dir_all(&archive).unwrap();

    let t0 = Utc::now();
    let name = segment_filename(t0 - Duration::seconds(300));
    std::fs::write(archive.join(&name), vec![0u8; 512]).unwrap();

    let mut tracker = OpenTracker::default();
    reconcile_dir(&db, &cam, &archive, 900, &mut tracker, STALE_AFTER, t0)
        .await
        .unwrap();
    assert!(db.segments_for_camera(&cam).await.unwrap()[0].is_open());

    // Same size two minutes later: closed as stale.
    reconcile_dir(
        &db,
        &cam,
        &archive,
        900,
        &mut tracker,
        STALE_AFTER,
        t0 + Duration::seconds(121),
    )
    .await
    .unwrap();
    let seg = &db.segments_for_camera(&cam).await.unwrap()[0];
    assert!(!seg.is_open());
}

#[tokio::test]
async fn growing_segment_stays_open() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let cam = seed_camera(&db).await;
    let archive = dir.path().join("continuous").join(&cam);
    std::fs::create_dir_all(&archive).unwrap();

    let t0 = Utc::now();
    let name = segment_filename(t0 - Duration::seconds(300));
    std::fs::write(archive.join(&name), vec![0u8; 512]).unwrap();

    let mut tracker = OpenTracker::default();
    reconcile_dir(&db, &cam, &archive, 900, &mut tracker, STALE_AFTER, t0)
        .await
        .unwrap();
    // File grew in the meantime.
    std::fs::write(archive.join(&name), vec![0u8; 1024]).unwrap();
    reconcile_dir(
        &db,
        &cam,
        &archive,
        900,
        &mut tracker,
        STALE_AFTER,
        t0 + Duration::seconds(121),
    )
    .await
    .unwrap();
    assert!(db.segments_for_camera(&cam).await.unwrap()[0].is_open());
}

/// Record 32 minutes starting 10:07: boundaries at :15 and :30 give three
/// entries of ~8, 15 and ~9 minutes.
#[tokio::test]
async fn timeline_matches_quarter_aligned_recording() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let cam = seed_camera(&db).await;

    let rows = [
        ("2026-03-10T10:07:00Z", 480.0),
        ("2026-03-10T10:15:00Z", 900.0),
        ("2026-03-10T10:30:00Z", 540.0),
    ];
    for (start, dur) in rows {
        let start = at(start);
        let name = segment_filename(start);
        db.insert_open_segment(&cam, start, &name, 1000).await.unwrap();
        db.close_segment(&cam, &name, dur, 1000).await.unwrap();
    }

    let now = at("2026-03-10T11:00:00Z");
    let entries = timeline(
        &db,
        &cam,
        at("2026-03-10T00:00:00Z"),
        at("2026-03-11T00:00:00Z"),
        900,
        now,
    )
    .await
    .unwrap();

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].start, at("2026-03-10T10:07:00Z"));
    assert_eq!(entries[0].end, at("2026-03-10T10:15:00Z"));
    assert_eq!(entries[1].start, at("2026-03-10T10:15:00Z"));
    assert_eq!(entries[2].end, at("2026-03-10T10:39:00Z"));

    // Non-overlap invariant with 1 s slack.
    for pair in entries.windows(2) {
        assert!(pair[0].end <= pair[1].start + Duration::seconds(1));
    }
}

#[tokio::test]
async fn timeline_clips_to_the_window() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let cam = seed_camera(&db).await;

    // Segment straddling local midnight: 23:50 – 00:05.
    let start = at("2026-03-09T23:50:00Z");
    let name = segment_filename(start);
    db.insert_open_segment(&cam, start, &name, 1000).await.unwrap();
    db.close_segment(&cam, &name, 900.0, 1000).await.unwrap();

    let entries = timeline(
        &db,
        &cam,
        at("2026-03-10T00:00:00Z"),
        at("2026-03-11T00:00:00Z"),
        900,
        at("2026-03-10T12:00:00Z"),
    )
    .await
    .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].start, at("2026-03-10T00:00:00Z"));
    assert_eq!(entries[0].end, at("2026-03-10T00:05:00Z"));

    // A fully previous-day segment does not leak into the window.
    assert!(timeline(
        &db,
        &cam,
        at("2026-03-11T00:00:00Z"),
        at("2026-03-12T00:00:00Z"),
        900,
        at("2026-03-11T12:00:00Z"),
    )
    .await
    .unwrap()
    .is_empty());
}

#[tokio::test]
async fn seek_maps_wall_clock_to_offset() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let cam = seed_camera(&db).await;

    let start = at("2026-03-10T10:15:00Z");
    let name = segment_filename(start);
    db.insert_open_segment(&cam, start, &name, 1000).await.unwrap();
    db.close_segment(&cam, &name, 900.0, 1000).await.unwrap();

    let now = at("2026-03-10T11:00:00Z");
    let (filename, offset) = seek(&db, &cam, at("2026-03-10T10:20:00Z"), 900, now)
        .await
        .unwrap();
    assert_eq!(filename, "20260310_101500.mp4");
    assert!((offset - 300.0).abs() < 0.001);

    // A gap returns NotFound.
    assert!(seek(&db, &cam, at("2026-03-10T09:00:00Z"), 900, now)
        .await
        .is_err());
}

#[test]
fn clip_boundary_helpers() {
    let t = at("2026-03-10T10:15:00Z");
    assert_eq!(parse_segment_filename(&segment_filename(t)), Some(t));
}
