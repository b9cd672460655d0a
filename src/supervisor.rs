// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-camera ingest supervision.
//!
//! The router pulls RTSP itself in most deployments, so the worker's job is
//! watching per-path liveness and, where configured, keeping a side-car
//! ingest child process alive. Restarts follow an exponential backoff that
//! resets after a minute of healthy runtime.
//!
//! Worker states: `Idle → Starting → Healthy → Unhealthy → Backoff →
//! Starting`, terminal `Stopped`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::router::PathHealthMap;
use crate::store::cameras::CameraRecord;

const BACKOFF_SECS: [u64; 6] = [1, 2, 4, 8, 16, 30];
const UNHEALTHY_AFTER: Duration = Duration::from_secs(10);
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(60);
const HEALTH_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Starting,
    Healthy,
    Unhealthy,
    Backoff,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub state: WorkerState,
    /// The router's last error string for the path, for the API to display.
    pub last_error: Option<String>,
    pub restarts: u64,
}

/// Handle owned by the manager; dropping it does not stop the worker, call
/// [`SupervisorHandle::stop`].
pub struct SupervisorHandle {
    token: CancellationToken,
    status: Arc<Mutex<SupervisorStatus>>,
    update_tx: mpsc::Sender<CameraRecord>,
    pub join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn status(&self) -> SupervisorStatus {
        self.status.lock().clone()
    }

    /// Deliver a config change; the worker restarts ingest if the source URL
    /// changed and applies everything else in place.
    pub fn update(&self, camera: CameraRecord) {
        let _ = self.update_tx.try_send(camera);
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

pub fn spawn_supervisor(
    camera: CameraRecord,
    cfg: Config,
    health_rx: watch::Receiver<PathHealthMap>,
    parent: &CancellationToken,
) -> SupervisorHandle {
    let token = parent.child_token();
    let status = Arc::new(Mutex::new(SupervisorStatus {
        state: WorkerState::Idle,
        last_error: None,
        restarts: 0,
    }));
    let (update_tx, update_rx) = mpsc::channel(4);
    let worker = Worker {
        camera,
        cfg,
        health_rx,
        status: status.clone(),
        token: token.clone(),
        update_rx,
        child: None,
    };
    let join = tokio::spawn(worker.run());
    SupervisorHandle {
        token,
        status,
        update_tx,
        join,
    }
}

struct Worker {
    camera: CameraRecord,
    cfg: Config,
    health_rx: watch::Receiver<PathHealthMap>,
    status: Arc<Mutex<SupervisorStatus>>,
    token: CancellationToken,
    update_rx: mpsc::Receiver<CameraRecord>,
    child: Option<Child>,
}

enum RunOutcome {
    /// Path went down; restart through backoff.
    Failed,
    /// Source URL changed; restart immediately without backoff.
    Restart,
    /// Camera no longer needs a worker.
    Deactivated,
    Cancelled,
}

impl Worker {
    fn set_state(&self, state: WorkerState) {
        self.status.lock().state = state;
    }

    fn viewers(&self) -> usize {
        self.health_rx
            .borrow()
            .get(&self.camera.path)
            .map(|s| s.readers)
            .unwrap_or(0)
    }

    fn is_active(&self) -> bool {
        self.camera.wants_worker() || self.viewers() > 0
    }

    async fn run(mut self) {
        info!(camera = %self.camera.id, path = %self.camera.path, "Ingest supervisor started");
        let mut backoff_idx = 0usize;
        loop {
            if self.token.is_cancelled() {
                break;
            }
            if !self.is_active() {
                self.set_state(WorkerState::Idle);
                if !self.wait_while_idle().await {
                    break;
                }
                continue;
            }

            self.set_state(WorkerState::Starting);
            self.start_sidecar();

            match self.watch_health(&mut backoff_idx).await {
                RunOutcome::Cancelled => break,
                RunOutcome::Deactivated => {
                    self.kill_sidecar().await;
                    continue;
                }
                RunOutcome::Restart => {
                    self.kill_sidecar().await;
                    self.status.lock().restarts += 1;
                    continue;
                }
                RunOutcome::Failed => {
                    self.kill_sidecar().await;
                    self.status.lock().restarts += 1;
                    self.set_state(WorkerState::Backoff);
                    let delay = Duration::from_secs(BACKOFF_SECS[backoff_idx]);
                    backoff_idx = (backoff_idx + 1).min(BACKOFF_SECS.len() - 1);
                    debug!(camera = %self.camera.id, ?delay, "Backing off before restart");
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.kill_sidecar().await;
        self.set_state(WorkerState::Stopped);
        info!(camera = %self.camera.id, "Ingest supervisor stopped");
    }

    /// Returns false when cancelled.
    async fn wait_while_idle(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return false,
                update = self.update_rx.recv() => {
                    match update {
                        Some(cam) => self.camera = cam,
                        None => return false,
                    }
                }
                _ = self.health_rx.changed() => {}
            }
            if self.is_active() {
                return true;
            }
        }
    }

    async fn watch_health(&mut self, backoff_idx: &mut usize) -> RunOutcome {
        let mut healthy_since: Option<tokio::time::Instant> = None;
        let mut not_ready_since: Option<tokio::time::Instant> = None;
        let mut tick = tokio::time::interval(HEALTH_TICK);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return RunOutcome::Cancelled,
                update = self.update_rx.recv() => {
                    let Some(cam) = update else { return RunOutcome::Cancelled };
                    let url_changed = cam.rtsp_url != self.camera.rtsp_url;
                    self.camera = cam;
                    if !self.is_active() {
                        return RunOutcome::Deactivated;
                    }
                    if url_changed {
                        info!(camera = %self.camera.id, "Source URL changed, restarting ingest");
                        return RunOutcome::Restart;
                    }
                }
                status = async {
                    match &mut self.child {
                        Some(child) => child.wait().await,
                        // Never resolves; keeps the select arm inert without a sidecar.
                        None => std::future::pending().await,
                    }
                } => {
                    self.child = None;
                    warn!(camera = %self.camera.id, ?status, "Ingest side-car exited");
                    return RunOutcome::Failed;
                }
                _ = tick.tick() => {}
            }

            let snapshot = self.health_rx.borrow().get(&self.camera.path).cloned();
            let now = tokio::time::Instant::now();
            match snapshot {
                Some(st) if st.ready => {
                    not_ready_since = None;
                    self.status.lock().last_error = None;
                    let since = *healthy_since.get_or_insert(now);
                    self.set_state(WorkerState::Healthy);
                    if now.duration_since(since) >= BACKOFF_RESET_AFTER {
                        *backoff_idx = 0;
                    }
                }
                other => {
                    healthy_since = None;
                    let since = *not_ready_since.get_or_insert(now);
                    if let Some(st) = other {
                        if st.last_error.is_some() {
                            self.status.lock().last_error = st.last_error;
                        }
                    }
                    if now.duration_since(since) > UNHEALTHY_AFTER {
                        self.set_state(WorkerState::Unhealthy);
                        warn!(
                            camera = %self.camera.id,
                            path = %self.camera.path,
                            "Path not ready for >10s, treating as down"
                        );
                        return RunOutcome::Failed;
                    }
                }
            }
        }
    }

    fn start_sidecar(&mut self) {
        let template = self.cfg.ingest.sidecar_command.trim();
        if template.is_empty() {
            return;
        }
        let rendered = template
            .replace("{url}", &self.camera.rtsp_url)
            .replace("{path}", &self.camera.path);
        let mut parts = rendered.split_whitespace();
        let Some(bin) = parts.next() else { return };
        let mut cmd = Command::new(bin);
        cmd.args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match cmd.spawn() {
            Ok(mut child) => {
                if let Some(out) = child.stdout.take() {
                    spawn_line_logger(self.camera.id.clone(), "stdout", out);
                }
                if let Some(err) = child.stderr.take() {
                    spawn_line_logger(self.camera.id.clone(), "stderr", err);
                }
                info!(camera = %self.camera.id, "Ingest side-car spawned");
                self.child = Some(child);
            }
            Err(e) => {
                warn!(camera = %self.camera.id, error = %e, "Failed to spawn ingest side-car");
                self.status.lock().last_error = Some(format!("spawn failed: {e}"));
            }
        }
    }

    async fn kill_sidecar(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

fn spawn_line_logger<R>(camera_id: String, stream: &'static str, reader: R)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(camera = %camera_id, stream, "{line}");
        }
    });
}
