// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Router configuration sync.
//!
//! Translates the camera table into the router's canonical YAML document and
//! hot-reloads it. Change marks arriving within 500 ms coalesce into one
//! rewrite; writing an unchanged document triggers no reload; rewrites and
//! reloads are serialized by running in a single task.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{NvrError, Result};
use crate::router::{EphemeralPath, RouterClient};
use crate::store::cameras::CameraRecord;
use crate::store::Db;

pub const DEBOUNCE: Duration = Duration::from_millis(500);
pub const TEST_PATH_TTL: Duration = Duration::from_secs(60);

/// One path block of the router document. Field names are fixed for
/// compatibility; unknown router-specific fields pass through `extra`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub source: String,
    pub source_on_demand: bool,
    pub record: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_segment_duration: Option<String>,
    pub read_user: String,
    pub read_pass: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouterDocument {
    pub paths: BTreeMap<String, PathEntry>,
}

/// Build the canonical document for the current camera set. BTreeMap keys
/// make the serialization deterministic, which the idempotence check relies
/// on.
pub fn build_document(
    cameras: &[CameraRecord],
    cfg: &Config,
    read_user: &str,
    read_pass: &str,
) -> RouterDocument {
    let mut paths = BTreeMap::new();
    for cam in cameras {
        let record = cam.continuous_recording;
        let entry = PathEntry {
            source: cam.rtsp_url.clone(),
            source_on_demand: !record,
            record,
            record_path: record.then(|| {
                format!(
                    "{}/continuous/{}/%Y%m%d_%H%M%S",
                    cfg.storage.root.display(),
                    cam.id
                )
            }),
            record_segment_duration: record.then(|| format!("{}s", cfg.storage.segment_secs)),
            read_user: read_user.to_string(),
            read_pass: read_pass.to_string(),
            extra: BTreeMap::new(),
        };
        paths.insert(cam.path.clone(), entry);
    }
    RouterDocument { paths }
}

/// Write `data` to `path` via a sibling temp file, fsync, rename.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("yml.tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Cloneable handle the API and manager use to poke the syncer.
#[derive(Clone)]
pub struct ConfSyncHandle {
    dirty_tx: mpsc::Sender<()>,
    router: Arc<dyn RouterClient>,
    token: CancellationToken,
}

impl ConfSyncHandle {
    /// Mark the camera set changed. Cheap; coalesces with pending marks.
    pub fn mark_dirty(&self) {
        let _ = self.dirty_tx.try_send(());
    }

    /// Register an ephemeral path for a connection test. The path lives for
    /// 60 s, then is removed from the router whether or not it was used.
    pub async fn create_test_path(&self, rtsp_url: &str) -> Result<String> {
        crate::store::cameras::validate_rtsp_url(rtsp_url)?;
        let name = format!("test{}", gen_suffix());
        self.router
            .add_path(
                &name,
                &EphemeralPath {
                    source: rtsp_url.to_string(),
                    source_on_demand: true,
                },
            )
            .await?;
        info!(path = %name, "Test path registered");

        let router = self.router.clone();
        let token = self.token.clone();
        let cleanup_name = name.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(TEST_PATH_TTL) => {}
            }
            match router.remove_path(&cleanup_name).await {
                Ok(()) => debug!(path = %cleanup_name, "Test path expired"),
                Err(e) => warn!(path = %cleanup_name, error = %e, "Test path cleanup failed"),
            }
        });
        Ok(name)
    }
}

fn gen_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

pub struct ConfigSyncer {
    db: Db,
    cfg: Config,
    router: Arc<dyn RouterClient>,
    read_user: String,
    read_pass: String,
    last_written: Option<String>,
}

impl ConfigSyncer {
    /// Spawn the singleton sync task. `read_user`/`read_pass` is the stable
    /// binding pair the credential bridge registered for path reads.
    pub fn spawn(
        db: Db,
        cfg: Config,
        router: Arc<dyn RouterClient>,
        read_user: String,
        read_pass: String,
        token: CancellationToken,
    ) -> (ConfSyncHandle, JoinHandle<()>) {
        let (dirty_tx, dirty_rx) = mpsc::channel(8);
        let handle = ConfSyncHandle {
            dirty_tx: dirty_tx.clone(),
            router: router.clone(),
            token: token.clone(),
        };
        let mut syncer = ConfigSyncer {
            db,
            cfg,
            router,
            read_user,
            read_pass,
            last_written: None,
        };
        let join = tokio::spawn(async move {
            syncer.run(dirty_rx, dirty_tx, token).await;
        });
        (handle, join)
    }

    async fn run(
        &mut self,
        mut dirty_rx: mpsc::Receiver<()>,
        dirty_tx: mpsc::Sender<()>,
        token: CancellationToken,
    ) {
        info!("Router config syncer started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                mark = dirty_rx.recv() => {
                    if mark.is_none() {
                        break;
                    }
                }
            }

            // Debounce window: coalesce marks arriving close together.
            let deadline = tokio::time::Instant::now() + DEBOUNCE;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => break,
                    mark = dirty_rx.recv() => {
                        if mark.is_none() {
                            return;
                        }
                    }
                }
            }

            if let Err(e) = self.sync_once().await {
                warn!(error = %e, "Config sync failed, previous config stays effective");
                // Retry through a delayed dirty mark.
                let tx = dirty_tx.clone();
                let retry_token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = retry_token.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {
                            let _ = tx.try_send(());
                        }
                    }
                });
            }
        }
        info!("Router config syncer stopped");
    }

    /// One rewrite + reload cycle. Skips both when the document is
    /// byte-identical to the last successfully reloaded one.
    pub async fn sync_once(&mut self) -> Result<()> {
        let cameras = self.db.all_cameras().await?;
        let doc = build_document(&cameras, &self.cfg, &self.read_user, &self.read_pass);
        let yaml = serde_yaml::to_string(&doc)
            .map_err(|e| NvrError::Fatal(format!("router config serialization: {e}")))?;

        if self.last_written.as_deref() == Some(yaml.as_str()) {
            debug!("Router config unchanged, no reload");
            return Ok(());
        }

        write_file_atomic(&self.cfg.router.config_path, yaml.as_bytes())?;
        self.router.reload().await?;
        info!(paths = doc.paths.len(), "Router config rewritten and reloaded");
        self.last_written = Some(yaml);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(path: &str, url: &str, record: bool) -> CameraRecord {
        CameraRecord {
            id: format!("cam-{path}"),
            user_id: "u1".into(),
            name: "Door".into(),
            rtsp_url: url.into(),
            rtsp_substream_url: None,
            path: path.into(),
            display_order: 0,
            detection_mode: "off".into(),
            sensitivity: 50,
            roi_mask: String::new(),
            object_classes: String::new(),
            continuous_recording: record,
            created_at: chrono::Utc::now(),
        }
    }

    fn test_config() -> Config {
        let toml = r#"
            [storage]
            root = "/tank/nvr"
            [router]
            config_path = "/tmp/router.yml"
        "#;
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn document_is_deterministic_and_canonical() {
        let cfg = test_config();
        let cams = vec![
            camera("zzz99999", "rtsp://cam-b/s", false),
            camera("aaa11111", "rtsp://cam-a/s", true),
        ];
        let doc = build_document(&cams, &cfg, "reader", "secret");
        let yaml = serde_yaml::to_string(&doc).unwrap();
        // BTreeMap ordering: aaa11111 before zzz99999 regardless of input order.
        let a = yaml.find("aaa11111").unwrap();
        let z = yaml.find("zzz99999").unwrap();
        assert!(a < z);
        assert!(yaml.contains("source: rtsp://cam-a/s"));
        assert!(yaml.contains("sourceOnDemand: true"));
        assert!(yaml.contains("recordPath: /tank/nvr/continuous/cam-aaa11111/%Y%m%d_%H%M%S"));
        assert!(yaml.contains("recordSegmentDuration: 900s"));
        assert!(yaml.contains("readUser: reader"));
    }

    #[test]
    fn recording_disabled_paths_have_no_record_keys() {
        let cfg = test_config();
        let doc = build_document(&[camera("abcd1234", "rtsp://c/s", false)], &cfg, "u", "p");
        let entry = &doc.paths["abcd1234"];
        assert!(!entry.record);
        assert!(entry.record_path.is_none());
        assert!(entry.record_segment_duration.is_none());
    }
}
