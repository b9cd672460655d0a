// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Motion/AI detection worker.
//!
//! Per camera with `mode ∈ {motion, ai}`: pull analysis frames, score them,
//! and emit [`MotionInterval`]s. Interval boundaries come from hysteresis
//! (two thresholds plus consecutive-frame counts) in motion mode and from a
//! sliding detection window in AI mode; both share the post rules — a hard
//! five-minute cap on open intervals, merging of intervals separated by less
//! than five seconds, and discarding of intervals shorter than two seconds.
//!
//! Detection state is single-owner: configuration changes arrive as messages
//! the worker consumes between frames.

pub mod frames;
pub mod motion;
pub mod objects;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::store::cameras::{CameraRecord, DetectionMode};
use frames::{ChannelFrameSource, FfmpegFrameSource, Frame, FrameSource};
use motion::{open_threshold, PixelMotion, RoiMask};
use objects::{AiFilter, Detection, ObjectDetector};

pub const OPEN_FRAMES: u32 = 3;
pub const CLOSE_FRAMES: u32 = 15;
pub const MAX_OPEN: Duration = Duration::minutes(5);
pub const MERGE_GAP: Duration = Duration::seconds(5);
pub const MIN_LEN: Duration = Duration::seconds(2);

/// A closed detection interval, ready for the event recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionInterval {
    pub camera_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: String,
}

/// Worker phases: `Idle → Arming → Active → Cooling → Idle`. Entering
/// `Active` fixes the interval start; leaving `Cooling` fixes its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Arming,
    Active,
    Cooling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Two-threshold hysteresis with consecutive-frame counts.
pub struct Hysteresis {
    open_t: f32,
    close_t: f32,
    open_frames: u32,
    close_frames: u32,
    phase: Phase,
    run: u32,
    pending_start: DateTime<Utc>,
    active_start: DateTime<Utc>,
    cool_start: DateTime<Utc>,
}

impl Hysteresis {
    pub fn new(open_t: f32) -> Hysteresis {
        Hysteresis {
            open_t,
            close_t: open_t * 0.5,
            open_frames: OPEN_FRAMES,
            close_frames: CLOSE_FRAMES,
            phase: Phase::Idle,
            run: 0,
            pending_start: DateTime::<Utc>::MIN_UTC,
            active_start: DateTime::<Utc>::MIN_UTC,
            cool_start: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Feed one frame's activity; returns a closed raw interval when one
    /// completes (including hard closes at the five-minute cap).
    pub fn step(&mut self, ts: DateTime<Utc>, activity: f32) -> Option<Boundary> {
        match self.phase {
            Phase::Idle => {
                if activity >= self.open_t {
                    self.phase = Phase::Arming;
                    self.run = 1;
                    self.pending_start = ts;
                    if self.run >= self.open_frames {
                        self.phase = Phase::Active;
                        self.active_start = self.pending_start;
                    }
                }
                None
            }
            Phase::Arming => {
                if activity >= self.open_t {
                    self.run += 1;
                    if self.run >= self.open_frames {
                        self.phase = Phase::Active;
                        self.active_start = self.pending_start;
                    }
                } else {
                    self.phase = Phase::Idle;
                }
                None
            }
            Phase::Active => {
                if ts - self.active_start >= MAX_OPEN {
                    let end = self.active_start + MAX_OPEN;
                    let start = self.active_start;
                    // Stay active; the overrun opens a fresh interval.
                    self.active_start = end;
                    return Some(Boundary { start, end });
                }
                if activity < self.close_t {
                    self.phase = Phase::Cooling;
                    self.run = 1;
                    self.cool_start = ts;
                }
                None
            }
            Phase::Cooling => {
                if activity >= self.open_t {
                    self.phase = Phase::Active;
                    None
                } else {
                    self.run += 1;
                    if self.run >= self.close_frames {
                        self.phase = Phase::Idle;
                        Some(Boundary {
                            start: self.active_start,
                            end: self.cool_start,
                        })
                    } else {
                        None
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    reasons: BTreeSet<String>,
}

/// Applies the common post rules. A closed interval is held back for the
/// merge gap before emission so a follow-up interval can coalesce with it.
pub struct IntervalGate {
    pending: Option<PendingInterval>,
}

impl IntervalGate {
    pub fn new() -> IntervalGate {
        IntervalGate { pending: None }
    }

    pub fn close(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: &str,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>, String)> {
        let reasons: BTreeSet<String> = reason
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        match &mut self.pending {
            Some(p) if start - p.end < MERGE_GAP => {
                p.end = p.end.max(end);
                p.reasons.extend(reasons);
                None
            }
            _ => {
                let out = self.take_valid();
                self.pending = Some(PendingInterval { start, end, reasons });
                out
            }
        }
    }

    /// Emit the held interval once the merge gap has elapsed without a new
    /// close. Intervals shorter than the minimum are dropped here.
    pub fn flush_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>, String)> {
        match &self.pending {
            Some(p) if now - p.end >= MERGE_GAP => self.take_valid(),
            _ => None,
        }
    }

    fn take_valid(&mut self) -> Option<(DateTime<Utc>, DateTime<Utc>, String)> {
        let p = self.pending.take()?;
        if p.end - p.start >= MIN_LEN {
            let reason = p.reasons.iter().cloned().collect::<Vec<_>>().join(",");
            Some((p.start, p.end, reason))
        } else {
            None
        }
    }
}

struct AiState {
    filter: AiFilter,
    active_since: Option<DateTime<Utc>>,
    last_detection: Option<DateTime<Utc>>,
}

/// Pure per-camera detection engine; the async worker drives it with frames
/// and pre-computed inference results.
pub struct DetectorEngine {
    camera_id: String,
    mode: DetectionMode,
    motion: PixelMotion,
    hysteresis: Hysteresis,
    ai: Option<AiState>,
    gate: IntervalGate,
    pub frame_idx: u64,
}

impl DetectorEngine {
    pub fn new(camera: &CameraRecord, width: u32, height: u32, has_model: bool) -> DetectorEngine {
        let mut mode = camera.mode();
        if mode == DetectionMode::Ai && !has_model {
            warn!(camera = %camera.id, "AI mode requested but no model is wired, using pixel motion");
            mode = DetectionMode::Motion;
        }
        let roi = RoiMask::parse(&camera.roi_mask);
        DetectorEngine {
            camera_id: camera.id.clone(),
            mode,
            motion: PixelMotion::new(width as usize, height as usize, camera.sensitivity, roi),
            hysteresis: Hysteresis::new(open_threshold(camera.sensitivity)),
            ai: (mode == DetectionMode::Ai).then(|| AiState {
                filter: AiFilter::new(&camera.object_classes),
                active_since: None,
                last_detection: None,
            }),
            gate: IntervalGate::new(),
            frame_idx: 0,
        }
    }

    pub fn wants_inference(&self) -> bool {
        self.mode == DetectionMode::Ai && self.frame_idx % objects::FRAME_STRIDE == 0
    }

    pub fn on_frame(&mut self, frame: &Frame, detections: Option<&[Detection]>) -> Vec<MotionInterval> {
        self.frame_idx += 1;
        let mut out = Vec::new();
        match self.mode {
            DetectionMode::Off => {}
            DetectionMode::Motion => {
                let activity = self.motion.activity(&frame.data);
                if let Some(b) = self.hysteresis.step(frame.ts, activity) {
                    if let Some(iv) = self.gate.close(b.start, b.end, "motion") {
                        out.push(iv);
                    }
                }
            }
            DetectionMode::Ai => {
                if let Some(ai) = &mut self.ai {
                    if let Some(dets) = detections {
                        if ai.filter.ingest(frame.ts, dets) > 0 {
                            ai.last_detection = Some(frame.ts);
                        }
                    }
                    let active = ai.filter.active(frame.ts);
                    match (ai.active_since, active) {
                        (None, true) => {
                            ai.active_since = ai.last_detection.or(Some(frame.ts));
                        }
                        (Some(start), true) => {
                            if frame.ts - start >= MAX_OPEN {
                                let end = start + MAX_OPEN;
                                let reason = ai.filter.reason();
                                if let Some(iv) = self.gate.close(start, end, &reason) {
                                    out.push(iv);
                                }
                                ai.active_since = Some(end);
                            }
                        }
                        (Some(start), false) => {
                            let end = ai.last_detection.unwrap_or(frame.ts);
                            let reason = ai.filter.reason();
                            if let Some(iv) = self.gate.close(start, end, &reason) {
                                out.push(iv);
                            }
                            ai.filter.clear_classes();
                            ai.active_since = None;
                        }
                        (None, false) => {}
                    }
                }
            }
        }
        out.extend(self.gate.flush_due(frame.ts));
        self.finish(out)
    }

    /// Time-driven housekeeping between frames: flushes the merge-gap hold
    /// and closes an AI interval whose window drained without new frames.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<MotionInterval> {
        let mut out = Vec::new();
        if let Some(ai) = &mut self.ai {
            if let Some(start) = ai.active_since {
                if !ai.filter.active(now) {
                    let end = ai.last_detection.unwrap_or(now);
                    let reason = ai.filter.reason();
                    if let Some(iv) = self.gate.close(start, end, &reason) {
                        out.push(iv);
                    }
                    ai.filter.clear_classes();
                    ai.active_since = None;
                }
            }
        }
        out.extend(self.gate.flush_due(now));
        self.finish(out)
    }

    fn finish(
        &self,
        raw: Vec<(DateTime<Utc>, DateTime<Utc>, String)>,
    ) -> Vec<MotionInterval> {
        raw.into_iter()
            .map(|(start, end, reason)| MotionInterval {
                camera_id: self.camera_id.clone(),
                start,
                end,
                reason,
            })
            .collect()
    }
}

const TICK: StdDuration = StdDuration::from_secs(1);
const RECONNECT_BASE: u64 = 2;

pub struct DetectorHandle {
    token: CancellationToken,
    update_tx: mpsc::Sender<CameraRecord>,
    pub join: JoinHandle<()>,
}

impl DetectorHandle {
    pub fn update(&self, camera: CameraRecord) {
        let _ = self.update_tx.try_send(camera);
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

enum StreamEnd {
    SourceClosed,
    Restart,
    Cancelled,
}

pub fn spawn_detector(
    camera: CameraRecord,
    cfg: Config,
    model: Option<Arc<dyn ObjectDetector>>,
    intervals_tx: mpsc::Sender<MotionInterval>,
    parent: &CancellationToken,
) -> DetectorHandle {
    let token = parent.child_token();
    let (update_tx, update_rx) = mpsc::channel(4);
    let worker_token = token.clone();
    let join = tokio::spawn(async move {
        run_worker(camera, cfg, model, intervals_tx, update_rx, worker_token).await;
    });
    DetectorHandle { token, update_tx, join }
}

async fn run_worker(
    mut camera: CameraRecord,
    cfg: Config,
    model: Option<Arc<dyn ObjectDetector>>,
    intervals_tx: mpsc::Sender<MotionInterval>,
    mut update_rx: mpsc::Receiver<CameraRecord>,
    token: CancellationToken,
) {
    info!(camera = %camera.id, "Detector worker started");
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            break;
        }
        if camera.mode() == DetectionMode::Off {
            tokio::select! {
                _ = token.cancelled() => break,
                update = update_rx.recv() => match update {
                    Some(cam) => camera = cam,
                    None => break,
                },
            }
            continue;
        }

        let url = camera
            .rtsp_substream_url
            .clone()
            .unwrap_or_else(|| camera.rtsp_url.clone());
        let source = FfmpegFrameSource::spawn(
            &cfg.media.ffmpeg_bin,
            &url,
            cfg.detect.frame_width,
            cfg.detect.frame_height,
            cfg.detect.fps,
        );
        let source = match source {
            Ok(s) => s,
            Err(e) => {
                attempt += 1;
                let backoff = StdDuration::from_secs(RECONNECT_BASE.pow(attempt.min(5)).min(30));
                warn!(camera = %camera.id, error = %e, ?backoff, "Frame source failed, will retry");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                continue;
            }
        };

        let end = run_stream(
            &mut camera,
            &cfg,
            model.clone(),
            source,
            &intervals_tx,
            &mut update_rx,
            &token,
        )
        .await;
        match end {
            StreamEnd::Cancelled => break,
            StreamEnd::Restart => {
                attempt = 0;
            }
            StreamEnd::SourceClosed => {
                attempt += 1;
                let backoff = StdDuration::from_secs(RECONNECT_BASE.pow(attempt.min(5)).min(30));
                debug!(camera = %camera.id, ?backoff, "Frame stream ended, reconnecting");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    info!(camera = %camera.id, "Detector worker stopped");
}

async fn run_stream<S: FrameSource>(
    camera: &mut CameraRecord,
    cfg: &Config,
    model: Option<Arc<dyn ObjectDetector>>,
    mut source: S,
    intervals_tx: &mpsc::Sender<MotionInterval>,
    update_rx: &mut mpsc::Receiver<CameraRecord>,
    token: &CancellationToken,
) -> StreamEnd {
    let mut engine = DetectorEngine::new(
        camera,
        cfg.detect.frame_width,
        cfg.detect.frame_height,
        model.is_some(),
    );
    let mut tick = tokio::time::interval(TICK);
    loop {
        let intervals = tokio::select! {
            _ = token.cancelled() => return StreamEnd::Cancelled,
            update = update_rx.recv() => {
                let Some(cam) = update else { return StreamEnd::Cancelled };
                let source_changed = cam.rtsp_url != camera.rtsp_url
                    || cam.rtsp_substream_url != camera.rtsp_substream_url
                    || cam.mode() != camera.mode();
                *camera = cam;
                if source_changed || camera.mode() == DetectionMode::Off {
                    return StreamEnd::Restart;
                }
                // Threshold/ROI changes rebuild the engine between frames.
                engine = DetectorEngine::new(
                    camera,
                    cfg.detect.frame_width,
                    cfg.detect.frame_height,
                    model.is_some(),
                );
                continue;
            }
            _ = tick.tick() => engine.tick(Utc::now()),
            frame = source.next_frame() => {
                let Some(frame) = frame else { return StreamEnd::SourceClosed };
                let detections = if engine.wants_inference() {
                    match &model {
                        Some(m) => {
                            // Inference is CPU-bound; keep it off the async executor.
                            let m = m.clone();
                            let f = frame.clone();
                            tokio::task::spawn_blocking(move || m.detect(&f))
                                .await
                                .ok()
                        }
                        None => None,
                    }
                } else {
                    None
                };
                engine.on_frame(&frame, detections.as_deref())
            }
        };
        for interval in intervals {
            debug!(
                camera = %interval.camera_id,
                start = %interval.start,
                end = %interval.end,
                reason = %interval.reason,
                "Motion interval emitted"
            );
            if intervals_tx.try_send(interval).is_err() {
                warn!(camera = %camera.id, "Interval channel full, interval dropped");
            }
        }
    }
}

/// Drive an engine over a synthetic frame stream; test entry point shared by
/// the integration suite.
pub async fn run_channel_stream(
    camera: CameraRecord,
    cfg: Config,
    model: Option<Arc<dyn ObjectDetector>>,
    rx: mpsc::Receiver<Frame>,
    intervals_tx: mpsc::Sender<MotionInterval>,
) {
    let mut cam = camera;
    let (_tx, mut update_rx) = mpsc::channel(1);
    let token = CancellationToken::new();
    let _ = run_stream(
        &mut cam,
        &cfg,
        model,
        ChannelFrameSource::new(rx),
        &intervals_tx,
        &mut update_rx,
        &token,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: f64) -> DateTime<Utc> {
        "2026-03-10T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
            + Duration::milliseconds((secs * 1000.0) as i64)
    }

    #[test]
    fn hysteresis_needs_consecutive_open_frames() {
        let mut h = Hysteresis::new(0.1);
        // Two hot frames then a cold one: never opens.
        assert!(h.step(ts(0.0), 0.5).is_none());
        assert!(h.step(ts(0.2), 0.5).is_none());
        assert!(h.step(ts(0.4), 0.0).is_none());
        assert_eq!(h.phase, Phase::Idle);
        // Three consecutive hot frames open.
        h.step(ts(1.0), 0.5);
        h.step(ts(1.2), 0.5);
        h.step(ts(1.4), 0.5);
        assert_eq!(h.phase, Phase::Active);
        assert_eq!(h.active_start, ts(1.0));
    }

    #[test]
    fn hysteresis_closes_after_cool_frames() {
        let mut h = Hysteresis::new(0.1);
        for i in 0..3 {
            h.step(ts(i as f64 * 0.2), 0.5);
        }
        // 14 cold frames: still cooling.
        for i in 0..14 {
            assert!(h.step(ts(1.0 + i as f64 * 0.2), 0.0).is_none());
        }
        // 15th cold frame closes with end at the start of cooling.
        let b = h.step(ts(1.0 + 14.0 * 0.2), 0.0).unwrap();
        assert_eq!(b.start, ts(0.0));
        assert_eq!(b.end, ts(1.0));
    }

    #[test]
    fn hysteresis_mid_band_keeps_interval_open() {
        let mut h = Hysteresis::new(0.1);
        for i in 0..3 {
            h.step(ts(i as f64 * 0.2), 0.5);
        }
        // Activity between close_T (0.05) and open_T (0.1): stays active.
        for i in 0..40 {
            assert!(h.step(ts(1.0 + i as f64 * 0.2), 0.07).is_none());
        }
        assert_eq!(h.phase, Phase::Active);
    }

    #[test]
    fn hysteresis_hard_closes_at_five_minutes() {
        let mut h = Hysteresis::new(0.1);
        h.step(ts(0.0), 0.5);
        h.step(ts(0.2), 0.5);
        h.step(ts(0.4), 0.5);
        let b = h.step(ts(301.0), 0.5).unwrap();
        assert_eq!(b.start, ts(0.0));
        assert_eq!(b.end, ts(300.0));
        // Still active, new interval starts at the cap boundary.
        assert_eq!(h.phase, Phase::Active);
        assert_eq!(h.active_start, ts(300.0));
    }

    #[test]
    fn gate_merges_close_intervals() {
        let mut g = IntervalGate::new();
        assert!(g.close(ts(0.0), ts(3.0), "motion").is_none());
        // 2 s gap: merged.
        assert!(g.close(ts(5.0), ts(8.0), "motion").is_none());
        let (start, end, reason) = g.flush_due(ts(14.0)).unwrap();
        assert_eq!(start, ts(0.0));
        assert_eq!(end, ts(8.0));
        assert_eq!(reason, "motion");
    }

    #[test]
    fn gate_separates_distant_intervals() {
        let mut g = IntervalGate::new();
        assert!(g.close(ts(0.0), ts(3.0), "motion").is_none());
        // 7 s gap: first interval flushes on the second close.
        let first = g.close(ts(10.0), ts(13.0), "motion").unwrap();
        assert_eq!(first.0, ts(0.0));
        assert_eq!(first.1, ts(3.0));
        let second = g.flush_due(ts(20.0)).unwrap();
        assert_eq!(second.0, ts(10.0));
    }

    #[test]
    fn gate_drops_short_intervals() {
        let mut g = IntervalGate::new();
        assert!(g.close(ts(0.0), ts(1.0), "motion").is_none());
        assert!(g.flush_due(ts(10.0)).is_none());
    }

    #[test]
    fn gate_merge_can_rescue_short_intervals() {
        let mut g = IntervalGate::new();
        g.close(ts(0.0), ts(1.0), "motion");
        g.close(ts(3.0), ts(4.5), "motion");
        let (start, end, _) = g.flush_due(ts(12.0)).unwrap();
        assert_eq!(start, ts(0.0));
        assert_eq!(end, ts(4.5));
    }

    #[test]
    fn gate_unions_reasons() {
        let mut g = IntervalGate::new();
        g.close(ts(0.0), ts(3.0), "person");
        g.close(ts(4.0), ts(7.0), "car,person");
        let (_, _, reason) = g.flush_due(ts(15.0)).unwrap();
        assert_eq!(reason, "car,person");
    }
}
