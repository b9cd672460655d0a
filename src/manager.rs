// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Top-level orchestration: owns the per-camera workers (ingest supervisor,
//! detector, segment bookkeeper), the recorder pool, the retention reaper,
//! the credential bridge and the router config syncer.
//!
//! Camera CRUD from the API lands here and reconciles the worker set; every
//! mutation also marks the router config dirty so the syncer republishes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::confsync::{ConfSyncHandle, ConfigSyncer};
use crate::creds::CredPool;
use crate::detect::objects::ObjectDetector;
use crate::detect::{spawn_detector, DetectorHandle, MotionInterval};
use crate::error::{NvrError, Result};
use crate::media::MediaTools;
use crate::recorder::{spawn_orphan_sweeper, spawn_recorder_pool, RecorderHandle};
use crate::retention::{spawn_reaper, DiskProbe};
use crate::router::{PathHealthMap, RouterClient};
use crate::segmenter::{spawn_bookkeeper, SegmenterHandle};
use crate::store::cameras::CameraRecord;
use crate::store::Db;
use crate::supervisor::{spawn_supervisor, SupervisorHandle, SupervisorStatus};

const HEALTH_POLL: StdDuration = StdDuration::from_secs(2);
const WEBHOOK_HOLD: Duration = Duration::seconds(10);

struct CameraWorkers {
    supervisor: SupervisorHandle,
    detector: DetectorHandle,
    segmenter: SegmenterHandle,
}

#[derive(Clone)]
struct WebhookWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

pub struct NvrManager {
    db: Db,
    cfg: Config,
    router: Arc<dyn RouterClient>,
    confsync: ConfSyncHandle,
    creds: Arc<CredPool>,
    recorder: RecorderHandle,
    health_rx: watch::Receiver<PathHealthMap>,
    workers: HashMap<String, CameraWorkers>,
    webhooks: Arc<Mutex<HashMap<String, WebhookWindow>>>,
    model: Option<Arc<dyn ObjectDetector>>,
    intervals_tx: mpsc::Sender<MotionInterval>,
    root: CancellationToken,
}

impl NvrManager {
    /// Build the full worker tree and spawn workers for every stored camera.
    /// Fail-stop on an unusable storage root.
    pub async fn start(
        db: Db,
        cfg: Config,
        router: Arc<dyn RouterClient>,
        probe: Arc<dyn DiskProbe>,
        model: Option<Arc<dyn ObjectDetector>>,
    ) -> Result<NvrManager> {
        for dir in [
            cfg.storage.root.clone(),
            cfg.storage.root.join("continuous"),
            cfg.storage.root.join("events"),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                NvrError::Fatal(format!("storage root unusable at {}: {e}", dir.display()))
            })?;
        }

        let root = CancellationToken::new();
        let creds = Arc::new(CredPool::new());

        // Health poller: one snapshot task feeding every supervisor.
        let (health_tx, health_rx) = watch::channel(PathHealthMap::new());
        spawn_health_poller(router.clone(), health_tx, &root);

        let (binding_user, binding_pass) = creds.binding();
        let (confsync, _join) = ConfigSyncer::spawn(
            db.clone(),
            cfg.clone(),
            router.clone(),
            binding_user,
            binding_pass,
            root.child_token(),
        );

        if let Err(e) = router.sync_read_credentials(&creds.active(Utc::now())).await {
            warn!(error = %e, "Initial credential registration failed, will retry on next mint");
        }

        let tools = MediaTools::new(&cfg.media.ffmpeg_bin);
        let (recorder, _joins) = spawn_recorder_pool(db.clone(), cfg.clone(), tools, &root);

        // Detector intervals funnel through one forwarder so per-camera
        // ordering survives into the recorder queue.
        let (intervals_tx, mut intervals_rx) = mpsc::channel::<MotionInterval>(64);
        {
            let recorder = recorder.clone();
            let token = root.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        interval = intervals_rx.recv() => {
                            match interval {
                                Some(iv) => recorder.dispatch(iv),
                                None => break,
                            }
                        }
                    }
                }
            });
        }

        spawn_reaper(db.clone(), cfg.clone(), probe, &root);
        spawn_orphan_sweeper(db.clone(), cfg.clone(), &root);

        let mut mgr = NvrManager {
            db: db.clone(),
            cfg,
            router,
            confsync,
            creds,
            recorder,
            health_rx,
            workers: HashMap::new(),
            webhooks: Arc::new(Mutex::new(HashMap::new())),
            model,
            intervals_tx,
            root,
        };

        for cam in db.all_cameras().await? {
            mgr.spawn_workers(cam);
        }
        mgr.confsync.mark_dirty();
        info!(cameras = mgr.workers.len(), "Manager started");
        Ok(mgr)
    }

    pub fn confsync(&self) -> ConfSyncHandle {
        self.confsync.clone()
    }

    pub fn creds(&self) -> Arc<CredPool> {
        self.creds.clone()
    }

    pub fn router(&self) -> Arc<dyn RouterClient> {
        self.router.clone()
    }

    pub fn health(&self) -> watch::Receiver<PathHealthMap> {
        self.health_rx.clone()
    }

    pub fn recorder(&self) -> RecorderHandle {
        self.recorder.clone()
    }

    pub fn supervisor_status(&self, camera_id: &str) -> Option<SupervisorStatus> {
        self.workers.get(camera_id).map(|w| w.supervisor.status())
    }

    fn spawn_workers(&mut self, camera: CameraRecord) {
        let id = camera.id.clone();
        let supervisor = spawn_supervisor(
            camera.clone(),
            self.cfg.clone(),
            self.health_rx.clone(),
            &self.root,
        );
        let detector = spawn_detector(
            camera.clone(),
            self.cfg.clone(),
            self.model.clone(),
            self.intervals_tx.clone(),
            &self.root,
        );
        let segmenter = spawn_bookkeeper(self.db.clone(), self.cfg.clone(), id.clone(), &self.root);
        self.workers.insert(
            id,
            CameraWorkers { supervisor, detector, segmenter },
        );
    }

    /// A camera was created: spawn its workers and republish the config.
    pub fn camera_created(&mut self, camera: CameraRecord) {
        info!(camera = %camera.id, path = %camera.path, "Camera registered");
        self.spawn_workers(camera);
        self.confsync.mark_dirty();
    }

    /// A camera changed: deliver the new record to its workers (they restart
    /// ingest/detection themselves when source or mode changed) and
    /// republish the config.
    pub fn camera_updated(&mut self, camera: CameraRecord) {
        match self.workers.get(&camera.id) {
            Some(w) => {
                w.supervisor.update(camera.clone());
                w.detector.update(camera);
            }
            None => self.spawn_workers(camera),
        }
        self.confsync.mark_dirty();
    }

    /// A camera was deleted: stop every worker and republish the config. The
    /// rows are already gone; files are swept by the reaper.
    pub fn camera_deleted(&mut self, camera_id: &str) {
        if let Some(w) = self.workers.remove(camera_id) {
            w.supervisor.stop();
            w.detector.stop();
            w.segmenter.stop();
            info!(camera = %camera_id, "Camera workers stopped");
        }
        self.webhooks.lock().remove(camera_id);
        self.confsync.mark_dirty();
    }

    /// External motion trigger: synthesize a 10 s interval, extended by
    /// repeat calls arriving while it is still open.
    pub fn webhook_trigger(&self, camera_id: &str) {
        let now = Utc::now();
        let mut hooks = self.webhooks.lock();
        match hooks.get_mut(camera_id) {
            Some(window) if window.end > now => {
                window.end = now + WEBHOOK_HOLD;
                debug!(camera = %camera_id, "Webhook window extended");
            }
            _ => {
                hooks.insert(
                    camera_id.to_string(),
                    WebhookWindow { start: now, end: now + WEBHOOK_HOLD },
                );
                drop(hooks);
                self.spawn_webhook_finalizer(camera_id.to_string());
                debug!(camera = %camera_id, "Webhook window opened");
            }
        }
    }

    /// Waits out the (possibly extended) window, then emits the interval.
    fn spawn_webhook_finalizer(&self, camera_id: String) {
        let webhooks = self.webhooks.clone();
        let recorder = self.recorder.clone();
        let token = self.root.child_token();
        tokio::spawn(async move {
            loop {
                let end = match webhooks.lock().get(&camera_id) {
                    Some(w) => w.end,
                    None => return,
                };
                let now = Utc::now();
                if end <= now {
                    break;
                }
                let wait = (end - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            let Some(window) = webhooks.lock().remove(&camera_id) else {
                return;
            };
            recorder.dispatch(MotionInterval {
                camera_id,
                start: window.start,
                end: window.end,
                reason: "webhook".into(),
            });
        });
    }

    /// Cancel the whole worker tree. Called once on shutdown.
    pub fn shutdown(&self) {
        info!("NVR shutting down…");
        self.root.cancel();
    }
}

fn spawn_health_poller(
    router: Arc<dyn RouterClient>,
    tx: watch::Sender<PathHealthMap>,
    parent: &CancellationToken,
) {
    let token = parent.child_token();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEALTH_POLL);
        let mut last_err: Option<String> = None;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            match router.paths_status().await {
                Ok(map) => {
                    last_err = None;
                    let _ = tx.send(map);
                }
                Err(e) => {
                    // Keep the previous snapshot; log state changes only.
                    let msg = e.to_string();
                    if last_err.as_deref() != Some(msg.as_str()) {
                        warn!(error = %msg, "Router health poll failed");
                        last_err = Some(msg);
                    }
                }
            }
        }
    });
}
