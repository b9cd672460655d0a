// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::{Component, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::NvrError;

use super::{ApiResult, AppState, AuthUser};

#[derive(Deserialize)]
pub struct DownloadParams {
    pub path: String,
}

#[derive(Deserialize)]
pub struct SettingsBody {
    pub retention_days: i64,
    #[serde(default)]
    pub disk_floor_pct: Option<f64>,
}

/// Short-lived WHEP credentials for the browser. Registration with the
/// router is best-effort here; the router also verifies through the auth
/// callback.
pub async fn handle_webrtc_creds(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let now = Utc::now();
    let cred = state.creds.mint(now);
    if let Err(e) = state
        .router
        .sync_read_credentials(&state.creds.active(now))
        .await
    {
        warn!(error = %e, "Credential registration with router failed");
    }
    Ok(Json(serde_json::json!({
        "user": cred.user,
        "pass": cred.pass,
        "expires_at": cred.expires_at,
    })))
}

/// `path` must be a relative `continuous/<camera_id>/<file>` or
/// `events/<camera_id>/<file>` under the storage root, and the camera must
/// belong to the caller.
fn parse_download_path(raw: &str) -> Result<(String, PathBuf), NvrError> {
    let rel = PathBuf::from(raw);
    let components: Vec<_> = rel.components().collect();
    let all_normal = components
        .iter()
        .all(|c| matches!(c, Component::Normal(_)));
    if components.len() != 3 || !all_normal {
        return Err(NvrError::Validation("invalid download path".into()));
    }
    let kind = components[0].as_os_str().to_string_lossy();
    if kind != "continuous" && kind != "events" {
        return Err(NvrError::Validation("invalid download path".into()));
    }
    let camera_id = components[1].as_os_str().to_string_lossy().into_owned();
    Ok((camera_id, rel))
}

pub async fn handle_download(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let (camera_id, rel) = parse_download_path(&params.path)?;
    state
        .db
        .camera(&auth.user.id, &camera_id)
        .await?
        .ok_or(NvrError::NotFound)?;

    let full = state.config.storage.root.join(&rel);
    let file = match tokio::fs::File::open(&full).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(NvrError::NotFound.into())
        }
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();

    let filename = rel
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".into());
    let content_type = if filename.ends_with(".jpg") {
        "image/jpeg"
    } else {
        "video/mp4"
    };

    // Streamed body: an aborted request drops the stream and the file handle
    // with it.
    let stream = ReaderStream::new(file);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| NvrError::Fatal(format!("response build: {e}")))?;
    Ok(response)
}

pub async fn handle_health(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let storage_root = state.config.storage.root.clone();
    let metrics = tokio::task::spawn_blocking(move || {
        use sysinfo::System;
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let cpu_pct = sys.global_cpu_info().cpu_usage();

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let root = std::fs::canonicalize(&storage_root).unwrap_or(storage_root);
        let disk = disks
            .iter()
            .filter(|d| root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| (d.total_space(), d.available_space()));
        (
            cpu_pct,
            sys.total_memory(),
            sys.used_memory(),
            disk.map(|d| d.0).unwrap_or(0),
            disk.map(|d| d.1).unwrap_or(0),
        )
    })
    .await
    .map_err(|e| NvrError::Fatal(format!("metrics task: {e}")))?;

    let (cpu_pct, mem_total, mem_used, disk_total, disk_free) = metrics;
    Ok(Json(serde_json::json!({
        "cpu_pct": cpu_pct,
        "memory_total_bytes": mem_total,
        "memory_used_bytes": mem_used,
        "disk_total_bytes": disk_total,
        "disk_free_bytes": disk_free,
        "uptime_secs": state.started.elapsed().as_secs(),
    })))
}

pub async fn handle_get_settings(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.db.settings().await?))
}

pub async fn handle_put_settings(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(body): Json<SettingsBody>,
) -> ApiResult<impl IntoResponse> {
    let settings = state
        .db
        .update_settings(body.retention_days, body.disk_floor_pct)
        .await?;
    Ok(Json(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_path_validation() {
        assert!(parse_download_path("continuous/cam1/20260310_101500.mp4").is_ok());
        assert!(parse_download_path("events/cam1/ev1.jpg").is_ok());
        assert!(parse_download_path("/etc/passwd").is_err());
        assert!(parse_download_path("continuous/../secrets").is_err());
        assert!(parse_download_path("continuous/cam1/deep/file.mp4").is_err());
        assert!(parse_download_path("other/cam1/file.mp4").is_err());
        assert!(parse_download_path("").is_err());
    }

    #[test]
    fn download_path_extracts_camera() {
        let (cam, rel) = parse_download_path("events/cam-42/e.mp4").unwrap();
        assert_eq!(cam, "cam-42");
        assert_eq!(rel, PathBuf::from("events/cam-42/e.mp4"));
    }
}
