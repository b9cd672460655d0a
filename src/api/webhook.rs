// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::error::NvrError;

use super::{ApiResult, AppState};

/// External motion trigger, keyed by stream path. Behaves like a detector
/// interval of ten seconds, extended by repeat calls while it is open.
pub async fn handle_motion(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<StatusCode> {
    let camera = state
        .db
        .camera_by_path(&path)
        .await?
        .ok_or(NvrError::NotFound)?;
    state.manager.lock().webhook_trigger(&camera.id);
    Ok(StatusCode::NO_CONTENT)
}

/// The router's auth callback: it posts every credential presented for a
/// path read and we answer against the WHEP credential pool.
#[derive(Deserialize)]
pub struct RouterAuthBody {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub action: String,
}

pub async fn handle_router_auth(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RouterAuthBody>,
) -> ApiResult<StatusCode> {
    if !body.action.is_empty() && body.action != "read" && body.action != "playback" {
        return Err(NvrError::Unauthorized.into());
    }
    if state.creds.verify(&body.user, &body.password, Utc::now()) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(NvrError::Unauthorized.into())
    }
}
