// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention reaper.
//!
//! Every minute: delete artifacts past the retention horizon — the row
//! first, then the files, mirroring publication (bytes land before
//! metadata, metadata leaves before bytes). A crash between the two leaves
//! an unreferenced file for the sweepers to collect, never a live row
//! pointing at reclaimed space. Below the free-space floor the reaper turns
//! aggressive and eats the oldest archive segments across all cameras until
//! the volume recovers; events are never sacrificed early.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::store::Db;

pub const CYCLE: StdDuration = StdDuration::from_secs(60);
pub const DEFAULT_FLOOR_PCT: f64 = 5.0;
pub const RECOVER_PCT: f64 = 10.0;
/// Aggressive mode never deletes segments younger than this.
pub const AGGRESSIVE_MIN_AGE: Duration = Duration::hours(1);

/// Free-space source, swappable for tests.
pub trait DiskProbe: Send + Sync {
    /// `(total_bytes, free_bytes)` of the volume holding `root`.
    fn usage(&self, root: &Path) -> Option<(u64, u64)>;
}

/// Production probe over the mounted disks.
pub struct SysinfoProbe;

impl DiskProbe for SysinfoProbe {
    fn usage(&self, root: &Path) -> Option<(u64, u64)> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        disks
            .iter()
            .filter(|d| root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| (d.total_space(), d.available_space()))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub events_deleted: u64,
    pub segments_deleted: u64,
    pub dirs_removed: u64,
}

async fn unlink_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "Unlink failed");
        }
    }
}

/// One reaper pass; `now` is injectable for tests.
pub async fn reap_cycle(
    db: &Db,
    cfg: &Config,
    probe: &dyn DiskProbe,
    now: DateTime<Utc>,
) -> Result<ReapStats> {
    let mut stats = ReapStats::default();
    let settings = db.settings().await?;
    let horizon = now - Duration::days(settings.retention_days);

    // Events past the horizon: row first, then files. Missing files are
    // tolerated.
    for ev in db.events_expired(horizon).await? {
        if db.delete_event_row_any(&ev.id).await? {
            stats.events_deleted += 1;
        }
        if let Some(video) = &ev.video_path {
            unlink_quiet(&cfg.storage.root.join(video)).await;
        }
        if let Some(thumb) = &ev.thumb_path {
            unlink_quiet(&cfg.storage.root.join(thumb)).await;
        }
    }

    // Archive segments whose end predates the horizon, same order.
    for seg in db.segments_expired(horizon).await? {
        db.delete_segment_row(seg.id).await?;
        stats.segments_deleted += 1;
        unlink_quiet(&cfg.continuous_dir(&seg.camera_id).join(&seg.filename)).await;
    }

    // Directories of deleted cameras: their rows are already gone via the
    // cascade, only the files linger.
    stats.dirs_removed += sweep_dead_camera_dirs(db, cfg).await?;

    // Expired sessions are pure bookkeeping.
    let _ = db.delete_expired_sessions(now).await?;

    // Low-disk mode.
    if let Some((total, free)) = probe.usage(&cfg.storage.root) {
        if total > 0 {
            let floor = settings.disk_floor_pct.unwrap_or(DEFAULT_FLOOR_PCT);
            let free_pct = free as f64 / total as f64 * 100.0;
            if free_pct < floor {
                info!(free_pct, floor, "Low disk, reclaiming oldest archive segments");
                stats.segments_deleted += reclaim_until_free(db, cfg, probe, now).await?;
            }
        }
    }

    Ok(stats)
}

/// Delete oldest closed segments across all cameras until free space passes
/// the recovery mark or nothing older than an hour remains.
async fn reclaim_until_free(
    db: &Db,
    cfg: &Config,
    probe: &dyn DiskProbe,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut deleted = 0u64;
    loop {
        let candidates = db.oldest_segments(32).await?;
        if candidates.is_empty() {
            break;
        }
        let mut progressed = false;
        for seg in candidates {
            if now - seg.start_ts < AGGRESSIVE_MIN_AGE {
                return Ok(deleted);
            }
            db.delete_segment_row(seg.id).await?;
            unlink_quiet(&cfg.continuous_dir(&seg.camera_id).join(&seg.filename)).await;
            deleted += 1;
            progressed = true;

            if let Some((total, free)) = probe.usage(&cfg.storage.root) {
                if total > 0 && free as f64 / total as f64 * 100.0 >= RECOVER_PCT {
                    return Ok(deleted);
                }
            }
        }
        if !progressed {
            break;
        }
    }
    Ok(deleted)
}

async fn sweep_dead_camera_dirs(db: &Db, cfg: &Config) -> Result<u64> {
    let live: std::collections::HashSet<String> = db
        .all_cameras()
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let mut removed = 0u64;
    for sub in ["continuous", "events"] {
        let root = cfg.storage.root.join(sub);
        let mut dirs = match tokio::fs::read_dir(&root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let camera_id = entry.file_name().to_string_lossy().into_owned();
            if live.contains(&camera_id) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    debug!(camera = %camera_id, dir = sub, "Removed dead camera directory");
                }
                Err(e) => warn!(camera = %camera_id, error = %e, "Dead camera dir sweep failed"),
            }
        }
    }
    Ok(removed)
}

pub fn spawn_reaper(
    db: Db,
    cfg: Config,
    probe: Arc<dyn DiskProbe>,
    parent: &CancellationToken,
) -> JoinHandle<()> {
    let token = parent.child_token();
    tokio::spawn(async move {
        info!("Retention reaper started");
        let mut tick = tokio::time::interval(CYCLE);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            match reap_cycle(&db, &cfg, probe.as_ref(), Utc::now()).await {
                Ok(stats) => {
                    if stats.events_deleted > 0 || stats.segments_deleted > 0 {
                        info!(
                            events = stats.events_deleted,
                            segments = stats.segments_deleted,
                            "Retention pass complete"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Retention pass failed"),
            }
        }
        info!("Retention reaper stopped");
    })
}
