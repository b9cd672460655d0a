// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Detector scenarios driven through a synthetic frame stream.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use outpost::config::{
    ApiConfig, AuthConfig, Config, DatabaseConfig, DetectConfig, IngestConfig, MediaConfig,
    RouterConfig, StorageConfig,
};
use outpost::detect::frames::Frame;
use outpost::detect::objects::{Detection, ObjectDetector};
use outpost::detect::{run_channel_stream, MotionInterval};
use outpost::store::cameras::CameraRecord;

const W: u32 = 80;
const H: u32 = 60;

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
        detect: DetectConfig { frame_width: W, frame_height: H, fps: 10 },
        media: MediaConfig::default(),
    }
}

fn camera(mode: &str, sensitivity: i64, roi: &str, classes: &str) -> CameraRecord {
    CameraRecord {
        id: "cam-1".into(),
        user_id: "user-1".into(),
        name: "Door".into(),
        rtsp_url: "rtsp://h/a".into(),
        rtsp_substream_url: None,
        path: "abcd1234".into(),
        display_order: 0,
        detection_mode: mode.into(),
        sensitivity,
        roi_mask: roi.into(),
        object_classes: classes.into(),
        continuous_recording: false,
        created_at: Utc::now(),
    }
}

fn flat(value: u8) -> Vec<u8> {
    vec![value; (W * H) as usize]
}

/// Paint ~`fraction` of a 10×10 grid cell with `value`.
fn paint_cell(frame: &mut [u8], cell: usize, value: u8, fraction: f32) {
    let (w, h) = (W as usize, H as usize);
    let (cy, cx) = (cell / 10, cell % 10);
    let (x0, x1) = (cx * w / 10, (cx + 1) * w / 10);
    let (y0, y1) = (cy * h / 10, (cy + 1) * h / 10);
    let total = (x1 - x0) * (y1 - y0);
    let mut painted = 0usize;
    'outer: for y in y0..y1 {
        for x in x0..x1 {
            if painted as f32 >= fraction * total as f32 {
                break 'outer;
            }
            frame[y * w + x] = value;
            painted += 1;
        }
    }
}

fn frame(ts: DateTime<Utc>, data: Vec<u8>) -> Frame {
    Frame { ts, width: W, height: H, data }
}

async fn recv_interval(rx: &mut mpsc::Receiver<MotionInterval>) -> MotionInterval {
    tokio::time::timeout(StdDuration::from_secs(10), rx.recv())
        .await
        .expect("interval within 10s")
        .expect("channel open")
}

/// ROI on cell 55, sensitivity 50, a burst of 60%-foreground frames in that
/// cell: one interval of roughly the burst length, reason `motion`.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn motion_burst_emits_one_interval() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let cam = camera("motion", 50, "55", "");

    let (frame_tx, frame_rx) = mpsc::channel(512);
    let (interval_tx, mut interval_rx) = mpsc::channel(16);
    tokio::spawn(run_channel_stream(cam, cfg, None, frame_rx, interval_tx));

    // Timestamps in the near past so the merge-gap flush fires on the next
    // housekeeping tick instead of waiting out real time.
    let t0 = Utc::now() - Duration::seconds(120);
    let step = Duration::milliseconds(100);
    let mut ts = t0;

    // Background seed + quiet lead-in.
    for _ in 0..5 {
        frame_tx.send(frame(ts, flat(100))).await.unwrap();
        ts += step;
    }
    // Alternating luminance keeps the painted cell ahead of the background
    // estimate, the way real motion does.
    let burst_start = ts;
    for i in 0..35 {
        let mut data = flat(100);
        paint_cell(&mut data, 55, if i % 2 == 0 { 220 } else { 30 }, 0.6);
        frame_tx.send(frame(ts, data)).await.unwrap();
        ts += step;
    }
    let burst_end = ts;
    for _ in 0..20 {
        frame_tx.send(frame(ts, flat(100))).await.unwrap();
        ts += step;
    }

    let interval = recv_interval(&mut interval_rx).await;
    assert_eq!(interval.reason, "motion");
    assert_eq!(interval.camera_id, "cam-1");
    assert!(interval.start >= burst_start && interval.start < burst_start + Duration::seconds(1));
    assert!(interval.end <= burst_end);
    let len = interval.end - interval.start;
    assert!(len >= Duration::seconds(2), "interval too short: {len}");
    assert!(len <= Duration::seconds(5), "interval too long: {len}");
}

/// Sensitivity 1 never fires on nominal sensor noise.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn minimum_sensitivity_ignores_noise() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let cam = camera("motion", 1, "", "");

    let (frame_tx, frame_rx) = mpsc::channel(512);
    let (interval_tx, mut interval_rx) = mpsc::channel(16);
    tokio::spawn(run_channel_stream(cam, cfg, None, frame_rx, interval_tx));

    let t0 = Utc::now() - Duration::seconds(60);
    let mut ts = t0;
    for i in 0..100 {
        let value = if i % 2 == 0 { 104 } else { 96 };
        frame_tx.send(frame(ts, flat(value))).await.unwrap();
        ts += Duration::milliseconds(100);
    }
    drop(frame_tx);

    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert!(interval_rx.try_recv().is_err(), "no interval expected");
}

struct FirstByteModel;

impl ObjectDetector for FirstByteModel {
    fn detect(&self, frame: &Frame) -> Vec<Detection> {
        if frame.data[0] == 255 {
            vec![
                Detection { class: "person".into(), confidence: 0.9 },
                Detection { class: "dog".into(), confidence: 0.8 },
                Detection { class: "car".into(), confidence: 0.2 },
            ]
        } else {
            Vec::new()
        }
    }
}

/// AI mode: allowed detections inside the sliding window form one interval;
/// the reason is the comma-joined allowed class set.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ai_detections_form_one_interval() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let cam = camera("ai", 50, "", "person,car");

    let (frame_tx, frame_rx) = mpsc::channel(512);
    let (interval_tx, mut interval_rx) = mpsc::channel(16);
    tokio::spawn(run_channel_stream(
        cam,
        cfg,
        Some(Arc::new(FirstByteModel) as Arc<dyn ObjectDetector>),
        frame_rx,
        interval_tx,
    ));

    // Virtual timestamps anchored at now: the window close and the merge-gap
    // flush are both driven by frame timestamps below, not wall-clock ticks.
    let t0 = Utc::now();
    let step = Duration::milliseconds(200);
    let mut ts = t0;

    // ~4 s of detections (inference hits every 5th frame).
    let mut hot = flat(100);
    hot[0] = 255;
    for _ in 0..21 {
        frame_tx.send(frame(ts, hot.clone())).await.unwrap();
        ts += step;
    }
    // Silence until the 10 s window drains and the gate flushes.
    for _ in 0..60 {
        frame_tx.send(frame(ts, flat(100))).await.unwrap();
        ts += step;
    }

    let interval = recv_interval(&mut interval_rx).await;
    assert_eq!(interval.reason, "person");
    assert!(interval.start >= t0);
    let len = interval.end - interval.start;
    assert!(len >= Duration::seconds(2), "interval too short: {len}");
    assert!(len <= Duration::seconds(6), "interval too long: {len}");
}

/// Low-confidence and disallowed classes never open an interval.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ai_disallowed_classes_stay_silent() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    // Allow-set without "person" or "dog" at usable confidence.
    let cam = camera("ai", 50, "", "bicycle");

    let (frame_tx, frame_rx) = mpsc::channel(512);
    let (interval_tx, mut interval_rx) = mpsc::channel(16);
    tokio::spawn(run_channel_stream(
        cam,
        cfg,
        Some(Arc::new(FirstByteModel) as Arc<dyn ObjectDetector>),
        frame_rx,
        interval_tx,
    ));

    let t0 = Utc::now() - Duration::seconds(60);
    let mut ts = t0;
    let mut hot = flat(100);
    hot[0] = 255;
    for _ in 0..40 {
        frame_tx.send(frame(ts, hot.clone())).await.unwrap();
        ts += Duration::milliseconds(200);
    }
    drop(frame_tx);

    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert!(interval_rx.try_recv().is_err(), "no interval expected");
}
