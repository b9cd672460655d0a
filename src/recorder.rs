// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Event recorder.
//!
//! Detection intervals become clips + thumbnails here. A fixed pool of
//! workers drains per-shard bounded queues; jobs are routed by camera id so
//! one camera's events stay FIFO and its rows insert in start-time order. An
//! overflowing queue drops its oldest job with a log instead of ever
//! blocking the detector.
//!
//! Publication order is always bytes then metadata: clip and thumbnail are
//! fsynced and renamed into place before the event row is inserted. A failed
//! job inserts nothing; the orphan sweeper later removes files that have no
//! row.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::detect::MotionInterval;
use crate::error::{NvrError, Result};
use crate::media::{fsync_file, MediaTools};
use crate::store::events::EventRecord;
use crate::store::Db;

pub const SHARDS: usize = 4;
pub const QUEUE_CAP: usize = 64;
pub const PRE_ROLL: Duration = Duration::seconds(3);
pub const POST_ROLL: Duration = Duration::seconds(5);
const ORPHAN_MIN_AGE: Duration = Duration::hours(1);
const ORPHAN_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(3600);

struct Shard {
    queue: Mutex<VecDeque<MotionInterval>>,
    notify: Notify,
}

/// Cheap-to-clone dispatch handle given to the detector forwarders and the
/// webhook path.
#[derive(Clone)]
pub struct RecorderHandle {
    shards: Arc<Vec<Shard>>,
}

impl RecorderHandle {
    /// Enqueue an interval. Per-camera FIFO holds because a camera always
    /// hashes to the same shard.
    pub fn dispatch(&self, interval: MotionInterval) {
        let mut hasher = DefaultHasher::new();
        interval.camera_id.hash(&mut hasher);
        let shard = &self.shards[(hasher.finish() as usize) % self.shards.len()];
        {
            let mut q = shard.queue.lock();
            if q.len() >= QUEUE_CAP {
                let dropped = q.pop_front();
                if let Some(d) = dropped {
                    warn!(camera = %d.camera_id, start = %d.start, "Recorder queue full, oldest job dropped");
                }
            }
            q.push_back(interval);
        }
        shard.notify.notify_one();
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.shards.iter().map(|s| s.queue.lock().len()).sum()
    }
}

pub fn spawn_recorder_pool(
    db: Db,
    cfg: Config,
    tools: MediaTools,
    parent: &CancellationToken,
) -> (RecorderHandle, Vec<JoinHandle<()>>) {
    let shards: Arc<Vec<Shard>> = Arc::new(
        (0..SHARDS)
            .map(|_| Shard {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            })
            .collect(),
    );
    let handle = RecorderHandle { shards: shards.clone() };
    let mut joins = Vec::with_capacity(SHARDS);
    for idx in 0..SHARDS {
        let shards = shards.clone();
        let db = db.clone();
        let cfg = cfg.clone();
        let tools = tools.clone();
        let token = parent.child_token();
        joins.push(tokio::spawn(async move {
            let shard = &shards[idx];
            loop {
                let job = shard.queue.lock().pop_front();
                match job {
                    Some(interval) => {
                        if let Err(e) = record_event(&db, &cfg, &tools, &interval).await {
                            warn!(
                                camera = %interval.camera_id,
                                start = %interval.start,
                                error = %e,
                                "Event recording failed, no row inserted"
                            );
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = shard.notify.notified() => {}
                        }
                    }
                }
            }
        }));
    }
    (handle, joins)
}

/// Materialize one interval: pick a source, cut the clip, extract the
/// thumbnail, publish bytes, then insert the row.
pub async fn record_event(
    db: &Db,
    cfg: &Config,
    tools: &MediaTools,
    interval: &MotionInterval,
) -> Result<()> {
    let Some(camera) = db.camera_any(&interval.camera_id).await? else {
        // Camera deleted while the job sat in the queue.
        return Ok(());
    };

    let event_id = Uuid::new_v4().to_string();
    let dir = cfg.events_dir(&camera.id);
    tokio::fs::create_dir_all(&dir).await?;

    let clip_part = dir.join(format!("{event_id}.mp4.part"));
    let thumb_part = dir.join(format!("{event_id}.jpg.part"));
    let clip_final = dir.join(format!("{event_id}.mp4"));
    let thumb_final = dir.join(format!("{event_id}.jpg"));

    let result = produce_files(db, cfg, tools, &camera.path, interval, &clip_part, &thumb_part).await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&clip_part).await;
        let _ = tokio::fs::remove_file(&thumb_part).await;
        return Err(e);
    }

    // Bytes before metadata: rename into place, then insert the row.
    tokio::fs::rename(&clip_part, &clip_final).await?;
    tokio::fs::rename(&thumb_part, &thumb_final).await?;

    let rel = |name: &str| format!("events/{}/{name}", camera.id);
    db.insert_event(&EventRecord {
        id: event_id.clone(),
        camera_id: camera.id.clone(),
        user_id: camera.user_id.clone(),
        start_ts: interval.start,
        end_ts: Some(interval.end),
        reason: interval.reason.clone(),
        video_path: Some(rel(&format!("{event_id}.mp4"))),
        thumb_path: Some(rel(&format!("{event_id}.jpg"))),
    })
    .await?;

    info!(
        camera = %camera.id,
        event = %event_id,
        start = %interval.start,
        reason = %interval.reason,
        "Event recorded"
    );
    Ok(())
}

async fn produce_files(
    db: &Db,
    cfg: &Config,
    tools: &MediaTools,
    camera_path: &str,
    interval: &MotionInterval,
    clip_out: &PathBuf,
    thumb_out: &PathBuf,
) -> Result<()> {
    let now = Utc::now();
    let want_start = interval.start - PRE_ROLL;
    let want_end = interval.end + POST_ROLL;
    let max_seg = Duration::seconds(cfg.storage.segment_secs as i64 * 2);

    let segments = db
        .segments_overlapping(&interval.camera_id, want_start, want_end, max_seg, now)
        .await?;

    let archive_covers = segments
        .first()
        .map(|first| first.start_ts <= interval.start)
        .unwrap_or(false)
        && segments
            .last()
            .map(|last| last.end_ts(now) >= interval.end)
            .unwrap_or(false);

    let clip_start;
    if archive_covers {
        let first = segments.first().ok_or(NvrError::NotFound)?;
        let last = segments.last().ok_or(NvrError::NotFound)?;
        // Pre/post roll clipped to what the archive actually holds.
        let cut_start = want_start.max(first.start_ts);
        let cut_end = want_end.min(last.end_ts(now));
        let offset = (cut_start - first.start_ts).num_milliseconds() as f64 / 1000.0;
        let duration = (cut_end - cut_start).num_milliseconds() as f64 / 1000.0;
        let dir = cfg.continuous_dir(&interval.camera_id);
        let inputs: Vec<PathBuf> = segments.iter().map(|s| dir.join(&s.filename)).collect();
        tools.cut_clip(&inputs, offset, duration, clip_out).await?;
        clip_start = cut_start;
    } else {
        // No (full) archive coverage: dump from the router's rolling buffer
        // via its local RTSP output. Pre-roll is limited to what it holds.
        let duration = ((interval.end - interval.start) + POST_ROLL).num_milliseconds() as f64 / 1000.0;
        let url = format!("{}/{}", cfg.router.rtsp_url.trim_end_matches('/'), camera_path);
        tools.dump_live(&url, duration.max(1.0), clip_out).await?;
        clip_start = interval.start;
    }
    fsync_file(clip_out).await?;

    // Keyframe at interval start + 1 s, relative to the clip's own origin.
    let thumb_at = ((interval.start - clip_start) + Duration::seconds(1))
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;
    tools.thumbnail(clip_out, thumb_at, thumb_out).await?;
    fsync_file(thumb_out).await?;
    Ok(())
}

/// Remove event files that no row references and that are old enough to not
/// be a recording in flight. Runs at startup and hourly.
pub async fn sweep_orphans(db: &Db, cfg: &Config) -> Result<usize> {
    let events_root = cfg.storage.root.join("events");
    let mut removed = 0usize;
    let mut dirs = match tokio::fs::read_dir(&events_root).await {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let cutoff = Utc::now() - ORPHAN_MIN_AGE;
    while let Some(dir_entry) = dirs.next_entry().await? {
        if !dir_entry.file_type().await?.is_dir() {
            continue;
        }
        let camera_id = dir_entry.file_name().to_string_lossy().into_owned();
        let known: std::collections::HashSet<String> =
            db.event_ids_for_camera(&camera_id).await?.into_iter().collect();
        let mut files = tokio::fs::read_dir(dir_entry.path()).await?;
        while let Some(f) = files.next_entry().await? {
            let name = f.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.split('.').next() else { continue };
            if known.contains(stem) {
                continue;
            }
            let meta = f.metadata().await?;
            let mtime: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or(cutoff);
            if mtime < cutoff {
                if tokio::fs::remove_file(f.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
    }
    if removed > 0 {
        info!(removed, "Orphan event files swept");
    }
    Ok(removed)
}

pub fn spawn_orphan_sweeper(db: Db, cfg: Config, parent: &CancellationToken) -> JoinHandle<()> {
    let token = parent.child_token();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ORPHAN_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            if let Err(e) = sweep_orphans(&db, &cfg).await {
                warn!(error = %e, "Orphan sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_handle() -> RecorderHandle {
        RecorderHandle {
            shards: Arc::new(
                (0..SHARDS)
                    .map(|_| Shard {
                        queue: Mutex::new(VecDeque::new()),
                        notify: Notify::new(),
                    })
                    .collect(),
            ),
        }
    }

    fn interval(camera: &str, offset_secs: i64) -> MotionInterval {
        let base = Utc::now();
        MotionInterval {
            camera_id: camera.to_string(),
            start: base + Duration::seconds(offset_secs),
            end: base + Duration::seconds(offset_secs + 3),
            reason: "motion".into(),
        }
    }

    #[test]
    fn overflow_drops_oldest_never_blocks() {
        let handle = detached_handle();
        for i in 0..(QUEUE_CAP as i64 + 10) {
            handle.dispatch(interval("cam-a", i));
        }
        assert_eq!(handle.queued(), QUEUE_CAP);

        // The dropped jobs are the oldest ones.
        let mut hasher = DefaultHasher::new();
        "cam-a".hash(&mut hasher);
        let shard = &handle.shards[(hasher.finish() as usize) % SHARDS];
        let q = shard.queue.lock();
        let first = q.front().unwrap();
        let last = q.back().unwrap();
        assert!(first.start < last.start);
        assert_eq!(
            (last.start - first.start).num_seconds(),
            QUEUE_CAP as i64 - 1
        );
    }

    #[test]
    fn one_camera_lands_on_one_shard_in_order() {
        let handle = detached_handle();
        for i in 0..10 {
            handle.dispatch(interval("cam-b", i));
        }
        let occupied: Vec<usize> = handle
            .shards
            .iter()
            .map(|s| s.queue.lock().len())
            .collect();
        assert_eq!(occupied.iter().filter(|n| **n > 0).count(), 1);
        let shard = handle
            .shards
            .iter()
            .find(|s| !s.queue.lock().is_empty())
            .unwrap();
        let q = shard.queue.lock();
        let starts: Vec<_> = q.iter().map(|j| j.start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }
}
