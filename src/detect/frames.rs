// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Analysis frame acquisition.
//!
//! The detector consumes decoded grayscale frames through [`FrameSource`].
//! Production uses an ffmpeg child process that pulls the substream (or the
//! downscaled primary stream) and emits raw `gray8` frames on stdout; tests
//! feed synthetic frames through [`ChannelFrameSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{NvrError, Result};

/// One decoded grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub ts: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// `width * height` bytes, row-major gray8.
    pub data: Vec<u8>,
}

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` when the source ended.
    async fn next_frame(&mut self) -> Option<Frame>;
}

/// ffmpeg child decoding an RTSP stream into raw grayscale frames.
pub struct FfmpegFrameSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FfmpegFrameSource {
    pub fn spawn(
        ffmpeg_bin: &str,
        rtsp_url: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<FfmpegFrameSource> {
        let mut child = Command::new(ffmpeg_bin)
            .args([
                "-nostdin",
                "-loglevel",
                "error",
                "-rtsp_transport",
                "tcp",
                "-i",
                rtsp_url,
                "-vf",
                &format!("scale={width}:{height},fps={fps}"),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "gray",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NvrError::Transient(format!("spawn frame decoder: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NvrError::Transient("frame decoder has no stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                use tokio::io::AsyncBufReadExt;
                let mut lines = tokio::io::BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(stream = "decoder", "{line}");
                }
            });
        }
        Ok(FfmpegFrameSource { child, stdout, width, height })
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let len = (self.width * self.height) as usize;
        let mut data = vec![0u8; len];
        match self.stdout.read_exact(&mut data).await {
            Ok(_) => Some(Frame {
                ts: Utc::now(),
                width: self.width,
                height: self.height,
                data,
            }),
            Err(e) => {
                debug!(error = %e, "Frame decoder stream ended");
                None
            }
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(error = %e, "Failed to kill frame decoder");
        }
    }
}

/// Frame source backed by a channel; the test double.
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    pub fn new(rx: mpsc::Receiver<Frame>) -> ChannelFrameSource {
        ChannelFrameSource { rx }
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}
