// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::NvrError;
use crate::segmenter::{self, TimelineEntry};
use crate::timeutil::{local_day_utc_range_lenient, TzSpec};

use super::{ApiResult, AppState, AuthUser};

#[derive(Deserialize)]
pub struct DayParams {
    pub date_str: String,
    /// IANA zone name or `±HHMM`; defaults to the server's local zone.
    #[serde(default)]
    pub tz: Option<String>,
}

#[derive(Serialize)]
pub struct RecordingOut {
    pub filename: String,
    pub url: String,
    pub time: chrono::DateTime<Utc>,
}

fn parse_tz(tz: &Option<String>) -> ApiResult<TzSpec> {
    match tz {
        None => Ok(TzSpec::server_local()),
        Some(s) => TzSpec::parse(s)
            .ok_or_else(|| NvrError::Validation(format!("invalid tz '{s}'")).into()),
    }
}

async fn day_entries(
    state: &AppState,
    user_id: &str,
    camera_id: &str,
    params: &DayParams,
) -> ApiResult<Vec<TimelineEntry>> {
    // Ownership first; a foreign camera is indistinguishable from a missing one.
    state
        .db
        .camera(user_id, camera_id)
        .await?
        .ok_or(NvrError::NotFound)?;
    let tz = parse_tz(&params.tz)?;
    let (from, to) = local_day_utc_range_lenient(&params.date_str, &tz)?;
    Ok(segmenter::timeline(
        &state.db,
        camera_id,
        from,
        to,
        state.config.storage.segment_secs,
        Utc::now(),
    )
    .await?)
}

/// Archive files covering the requested local day.
pub async fn handle_list(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(camera_id): Path<String>,
    Query(params): Query<DayParams>,
) -> ApiResult<Json<Vec<RecordingOut>>> {
    let entries = day_entries(&state, &auth.user.id, &camera_id, &params).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| RecordingOut {
                url: format!(
                    "/api/download?path=continuous/{camera_id}/{}",
                    e.filename
                ),
                time: e.start,
                filename: e.filename,
            })
            .collect(),
    ))
}

/// Timeline variant: `{start, end, filename}` clipped to the day window.
pub async fn handle_timeline(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(camera_id): Path<String>,
    Query(params): Query<DayParams>,
) -> ApiResult<Json<Vec<TimelineEntry>>> {
    let entries = day_entries(&state, &auth.user.id, &camera_id, &params).await?;
    Ok(Json(entries))
}

/// Wipe the camera's whole archive, files and rows.
pub async fn handle_wipe(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(camera_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .db
        .camera(&auth.user.id, &camera_id)
        .await?
        .ok_or(NvrError::NotFound)?;
    segmenter::wipe_archive(&state.db, &state.config, &camera_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
