// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::cameras::{CameraPatch, CameraRecord};
use crate::supervisor::WorkerState;

use super::{ApiResult, AppState, AuthUser};

#[derive(Deserialize)]
pub struct CreateCameraBody {
    pub name: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub rtsp_substream_url: Option<String>,
}

#[derive(Deserialize)]
pub struct ReorderBody {
    pub camera_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct TestConnectionBody {
    pub rtsp_url: String,
}

#[derive(Serialize)]
pub struct CameraOut {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    pub rtsp_substream_url: Option<String>,
    pub path: String,
    pub display_order: i64,
    pub detection_mode: String,
    pub sensitivity: i64,
    pub roi_mask: String,
    pub object_classes: String,
    pub continuous_recording: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn camera_out(cam: &CameraRecord, state: &AppState) -> CameraOut {
    let status = state.manager.lock().supervisor_status(&cam.id);
    CameraOut {
        id: cam.id.clone(),
        name: cam.name.clone(),
        rtsp_url: cam.rtsp_url.clone(),
        rtsp_substream_url: cam.rtsp_substream_url.clone(),
        path: cam.path.clone(),
        display_order: cam.display_order,
        detection_mode: cam.detection_mode.clone(),
        sensitivity: cam.sensitivity,
        roi_mask: cam.roi_mask.clone(),
        object_classes: cam.object_classes.clone(),
        continuous_recording: cam.continuous_recording,
        created_at: cam.created_at,
        state: status.as_ref().map(|s| s.state),
        last_error: status.and_then(|s| s.last_error),
    }
}

pub async fn handle_list(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<CameraOut>>> {
    let cams = state.db.cameras_for_user(&auth.user.id).await?;
    Ok(Json(cams.iter().map(|c| camera_out(c, &state)).collect()))
}

pub async fn handle_create(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateCameraBody>,
) -> ApiResult<impl IntoResponse> {
    let cam = state
        .db
        .create_camera(
            &auth.user.id,
            body.name.trim(),
            body.rtsp_url.trim(),
            body.rtsp_substream_url.as_deref().map(str::trim),
        )
        .await?;
    state.manager.lock().camera_created(cam.clone());
    Ok((StatusCode::CREATED, Json(camera_out(&cam, &state))))
}

pub async fn handle_patch(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(camera_id): Path<String>,
    Json(patch): Json<CameraPatch>,
) -> ApiResult<Json<CameraOut>> {
    let cam = state
        .db
        .update_camera(&auth.user.id, &camera_id, &patch)
        .await?;
    // Workers reconcile themselves from the new record; an unchanged config
    // document produces no router reload downstream.
    state.manager.lock().camera_updated(cam.clone());
    Ok(Json(camera_out(&cam, &state)))
}

pub async fn handle_delete(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(camera_id): Path<String>,
) -> ApiResult<StatusCode> {
    let cam = state.db.delete_camera(&auth.user.id, &camera_id).await?;
    state.manager.lock().camera_deleted(&cam.id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_reorder(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ReorderBody>,
) -> ApiResult<StatusCode> {
    state
        .db
        .reorder_cameras(&auth.user.id, &body.camera_ids)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Register an ephemeral router path for the given URL so the browser can
/// try a WHEP view before saving the camera.
pub async fn handle_test_connection(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(body): Json<TestConnectionBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let path = state.confsync.create_test_path(body.rtsp_url.trim()).await?;
    Ok(Json(serde_json::json!({ "path": path })))
}
