// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! ffmpeg invocations for clip cutting and thumbnails.
//!
//! Every call carries an explicit timeout; an overrunning child is killed by
//! dropping its handle (`kill_on_drop`). Clips are remuxed (`-c copy`), never
//! re-encoded.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{NvrError, Result};

pub const CLIP_TIMEOUT: Duration = Duration::from_secs(60);
pub const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(15);
/// Live dumps get the recording duration plus connection headroom.
pub const DUMP_HEADROOM: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct MediaTools {
    ffmpeg: String,
}

impl MediaTools {
    pub fn new(ffmpeg_bin: &str) -> MediaTools {
        MediaTools { ffmpeg: ffmpeg_bin.to_string() }
    }

    /// Cut `[offset, offset+duration)` out of one or more archive files by
    /// remuxing them through the concat demuxer.
    pub async fn cut_clip(
        &self,
        inputs: &[PathBuf],
        offset_secs: f64,
        duration_secs: f64,
        out: &Path,
    ) -> Result<()> {
        if inputs.is_empty() {
            return Err(NvrError::Validation("no input files for clip".into()));
        }
        let list_path = out.with_extension("inputs.txt");
        let list: String = inputs
            .iter()
            .map(|p| format!("file '{}'\n", p.display()))
            .collect();
        tokio::fs::write(&list_path, list).await?;

        let result = self
            .run(
                &[
                    "-y",
                    "-f",
                    "concat",
                    "-safe",
                    "0",
                    "-i",
                    &list_path.display().to_string(),
                    "-ss",
                    &format!("{offset_secs:.3}"),
                    "-t",
                    &format!("{duration_secs:.3}"),
                    "-c",
                    "copy",
                    "-movflags",
                    "+faststart",
                    &out.display().to_string(),
                ],
                CLIP_TIMEOUT,
            )
            .await;
        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    /// Record a clip of `duration_secs` straight from the router's RTSP
    /// output; fallback when the archive does not cover an interval.
    pub async fn dump_live(&self, rtsp_url: &str, duration_secs: f64, out: &Path) -> Result<()> {
        let timeout = Duration::from_secs_f64(duration_secs) + DUMP_HEADROOM;
        self.run(
            &[
                "-y",
                "-rtsp_transport",
                "tcp",
                "-i",
                rtsp_url,
                "-t",
                &format!("{duration_secs:.3}"),
                "-c",
                "copy",
                "-movflags",
                "+faststart",
                &out.display().to_string(),
            ],
            timeout,
        )
        .await
    }

    /// Extract one keyframe at `at_secs` as a JPEG no wider than 640 px.
    pub async fn thumbnail(&self, video: &Path, at_secs: f64, out: &Path) -> Result<()> {
        self.run(
            &[
                "-y",
                "-ss",
                &format!("{at_secs:.3}"),
                "-i",
                &video.display().to_string(),
                "-frames:v",
                "1",
                "-vf",
                "scale='min(640,iw)':-2",
                &out.display().to_string(),
            ],
            THUMBNAIL_TIMEOUT,
        )
        .await
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<()> {
        debug!(bin = %self.ffmpeg, ?args, "Running media tool");
        let child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NvrError::Transient(format!("spawn {}: {e}", self.ffmpeg)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| NvrError::Transient(format!("{} timed out after {timeout:?}", self.ffmpeg)))?
            .map_err(|e| NvrError::Transient(format!("{} failed: {e}", self.ffmpeg)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(NvrError::Transient(format!(
                "{} exited with {}: {tail}",
                self.ffmpeg, output.status
            )));
        }
        Ok(())
    }
}

/// Flush file contents to disk before publishing its metadata.
pub async fn fsync_file(path: &Path) -> Result<()> {
    let f = tokio::fs::File::open(path).await?;
    f.sync_all().await?;
    Ok(())
}
