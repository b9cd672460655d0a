// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Continuous-archive bookkeeping.
//!
//! The router writes `YYYYMMDD_HHMMSS.mp4` files under
//! `continuous/<camera_id>/`, rolling at clock-aligned boundaries (quarter
//! hours for the default 900 s length). The bookkeeper task reconciles that
//! directory with the timeline index: new files register as open segments,
//! superseded files close with their true duration, and an open file that
//! stops growing for two minutes is closed as stale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{NvrError, Result};
use crate::store::Db;

pub const SCAN_INTERVAL: StdDuration = StdDuration::from_secs(10);
pub const STALE_AFTER: Duration = Duration::seconds(120);
/// Tolerable boundary slack between adjacent segments.
pub const BOUNDARY_SLACK: Duration = Duration::seconds(1);

const FILENAME_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn segment_filename(start: DateTime<Utc>) -> String {
    format!("{}.mp4", start.format(FILENAME_FORMAT))
}

/// Parse the UTC start time encoded in an archive filename.
pub fn parse_segment_filename(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.strip_suffix(".mp4")?;
    NaiveDateTime::parse_from_str(stem, FILENAME_FORMAT)
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// Next roll boundary strictly after `t`, aligned to multiples of
/// `segment_secs` since UTC midnight (00/15/30/45 for the default length).
pub fn next_boundary(t: DateTime<Utc>, segment_secs: u64) -> DateTime<Utc> {
    let seg = segment_secs.max(1) as i64;
    let midnight = t
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();
    let elapsed = (t - midnight).num_seconds();
    midnight + Duration::seconds((elapsed / seg + 1) * seg)
}

/// One row of the timeline the API serves, already clipped to the queried
/// window.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimelineEntry {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub filename: String,
}

/// Contiguous timeline for `[from, to)`, clipped to the window. Open
/// segments extend to `now`.
pub async fn timeline(
    db: &Db,
    camera_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    segment_secs: u64,
    now: DateTime<Utc>,
) -> Result<Vec<TimelineEntry>> {
    let max_seg = Duration::seconds(segment_secs as i64 * 2);
    let segments = db
        .segments_overlapping(camera_id, from, to, max_seg, now)
        .await?;
    Ok(segments
        .iter()
        .map(|s| TimelineEntry {
            start: s.start_ts.max(from),
            end: s.end_ts(now).min(to),
            filename: s.filename.clone(),
        })
        .filter(|e| e.end > e.start)
        .collect())
}

/// Map a wall-clock instant to `(filename, offset_seconds)` within the
/// covering segment.
pub async fn seek(
    db: &Db,
    camera_id: &str,
    t: DateTime<Utc>,
    segment_secs: u64,
    now: DateTime<Utc>,
) -> Result<(String, f64)> {
    let max_seg = Duration::seconds(segment_secs as i64 * 2);
    let covering = db
        .segments_overlapping(camera_id, t, t + Duration::seconds(1), max_seg, now)
        .await?;
    let seg = covering
        .into_iter()
        .find(|s| s.start_ts <= t && s.end_ts(now) > t)
        .ok_or(NvrError::NotFound)?;
    let offset = (t - seg.start_ts).num_milliseconds() as f64 / 1000.0;
    Ok((seg.filename, offset))
}

/// Delete every archive file and row for a camera.
pub async fn wipe_archive(db: &Db, cfg: &Config, camera_id: &str) -> Result<u64> {
    let dir = cfg.continuous_dir(camera_id);
    let segments = db.segments_for_camera(camera_id).await?;
    for seg in &segments {
        let path = dir.join(&seg.filename);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(camera = %camera_id, file = %seg.filename, error = %e, "Archive wipe unlink failed");
            }
        }
    }
    db.delete_segments_for_camera(camera_id).await
}

/// Growth tracking for the open segment, kept in the bookkeeper task.
#[derive(Default)]
pub struct OpenTracker {
    sizes: HashMap<String, (i64, DateTime<Utc>)>,
}

impl OpenTracker {
    /// Record the observed size; returns the instant the size last changed.
    fn observe(&mut self, filename: &str, size: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.sizes.get_mut(filename) {
            Some((prev, changed)) if *prev == size => *changed,
            Some(entry) => {
                *entry = (size, now);
                now
            }
            None => {
                self.sizes.insert(filename.to_string(), (size, now));
                now
            }
        }
    }

    fn forget(&mut self, filename: &str) {
        self.sizes.remove(filename);
    }
}

#[derive(Debug, Clone)]
struct DiskFile {
    filename: String,
    start: DateTime<Utc>,
    size: i64,
    mtime: DateTime<Utc>,
}

fn scan_dir(dir: &Path) -> std::io::Result<Vec<DiskFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(start) = parse_segment_filename(&name) else {
            continue;
        };
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let mtime: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or(start);
        files.push(DiskFile {
            filename: name,
            start,
            size: meta.len() as i64,
            mtime,
        });
    }
    files.sort_by_key(|f| f.start);
    Ok(files)
}

fn closed_duration(file: &DiskFile, successor: Option<&DiskFile>, segment_secs: u64) -> f64 {
    let cap = segment_secs as f64 + BOUNDARY_SLACK.num_seconds() as f64;
    let by_mtime = (file.mtime - file.start).num_milliseconds() as f64 / 1000.0;
    let duration = if by_mtime > 0.0 {
        by_mtime
    } else if let Some(next) = successor {
        (next.start - file.start).num_milliseconds() as f64 / 1000.0
    } else {
        segment_secs as f64
    };
    duration.clamp(0.1, cap)
}

/// One reconciliation pass over a camera's archive directory.
pub async fn reconcile_dir(
    db: &Db,
    camera_id: &str,
    dir: &Path,
    segment_secs: u64,
    tracker: &mut OpenTracker,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<()> {
    let files = match scan_dir(dir) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for (i, file) in files.iter().enumerate() {
        let successor = files.get(i + 1);
        let known = db.segment_by_filename(camera_id, &file.filename).await?;
        let is_newest = successor.is_none();

        match known {
            None => {
                db.insert_open_segment(camera_id, file.start, &file.filename, file.size)
                    .await?;
                debug!(camera = %camera_id, file = %file.filename, "Segment registered");
                if is_newest {
                    tracker.observe(&file.filename, file.size, now);
                } else {
                    // Already superseded on disk (e.g. after a restart).
                    let d = closed_duration(file, successor, segment_secs);
                    db.close_segment(camera_id, &file.filename, d, file.size).await?;
                    tracker.forget(&file.filename);
                }
            }
            Some(row) if row.is_open() => {
                if !is_newest {
                    let d = closed_duration(file, successor, segment_secs);
                    db.close_segment(camera_id, &file.filename, d, file.size).await?;
                    tracker.forget(&file.filename);
                    debug!(camera = %camera_id, file = %file.filename, duration = d, "Segment closed");
                } else {
                    let last_change = tracker.observe(&file.filename, file.size, now);
                    if now - last_change > stale_after {
                        let d = closed_duration(file, None, segment_secs);
                        db.close_segment(camera_id, &file.filename, d, file.size).await?;
                        tracker.forget(&file.filename);
                        info!(camera = %camera_id, file = %file.filename, "Stale open segment closed");
                    } else {
                        db.insert_open_segment(camera_id, file.start, &file.filename, file.size)
                            .await?;
                    }
                }
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub struct SegmenterHandle {
    token: CancellationToken,
    pub join: JoinHandle<()>,
}

impl SegmenterHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Spawn the per-camera bookkeeper task.
pub fn spawn_bookkeeper(
    db: Db,
    cfg: Config,
    camera_id: String,
    parent: &CancellationToken,
) -> SegmenterHandle {
    let token = parent.child_token();
    let task_token = token.clone();
    let join = tokio::spawn(async move {
        let dir: PathBuf = cfg.continuous_dir(&camera_id);
        let segment_secs = cfg.storage.segment_secs;
        let mut tracker = OpenTracker::default();
        let mut tick = tokio::time::interval(SCAN_INTERVAL);
        info!(camera = %camera_id, "Segment bookkeeper started");
        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = tick.tick() => {}
            }
            let now = Utc::now();
            if let Err(e) = reconcile_dir(
                &db,
                &camera_id,
                &dir,
                segment_secs,
                &mut tracker,
                STALE_AFTER,
                now,
            )
            .await
            {
                warn!(camera = %camera_id, error = %e, "Segment reconcile failed");
            }
        }
        info!(camera = %camera_id, "Segment bookkeeper stopped");
    });
    SegmenterHandle { token, join }
}
