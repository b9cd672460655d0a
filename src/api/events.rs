// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::NvrError;
use crate::store::events::{EventFilter, EventRecord};

use super::{ApiResult, AppState, AuthUser};

#[derive(Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub start_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct BatchDeleteBody {
    pub event_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct EventOut {
    pub id: String,
    pub camera_id: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub reason: String,
    pub video_url: Option<String>,
    pub thumb_url: Option<String>,
}

#[derive(Serialize)]
pub struct EventSummaryOut {
    pub id: String,
    pub camera_id: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub reason: String,
}

fn download_url(path: &Option<String>) -> Option<String> {
    path.as_ref().map(|p| format!("/api/download?path={p}"))
}

impl From<&EventRecord> for EventOut {
    fn from(e: &EventRecord) -> EventOut {
        EventOut {
            id: e.id.clone(),
            camera_id: e.camera_id.clone(),
            start_ts: e.start_ts,
            end_ts: e.end_ts,
            reason: e.reason.clone(),
            video_url: download_url(&e.video_path),
            thumb_url: download_url(&e.thumb_path),
        }
    }
}

fn filter_from(query: EventQuery) -> EventFilter {
    EventFilter {
        camera_id: query.camera_id,
        start_ts: query.start_ts,
        end_ts: query.end_ts,
        limit: query.limit,
    }
}

pub async fn handle_list(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<Vec<EventOut>>> {
    let events = state
        .db
        .events_filtered(&auth.user.id, &filter_from(query))
        .await?;
    Ok(Json(events.iter().map(EventOut::from).collect()))
}

pub async fn handle_summary(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<Vec<EventSummaryOut>>> {
    let events = state
        .db
        .events_filtered(&auth.user.id, &filter_from(query))
        .await?;
    Ok(Json(
        events
            .iter()
            .map(|e| EventSummaryOut {
                id: e.id.clone(),
                camera_id: e.camera_id.clone(),
                start_ts: e.start_ts,
                end_ts: e.end_ts,
                reason: e.reason.clone(),
            })
            .collect(),
    ))
}

async fn delete_one(state: &AppState, user_id: &str, event_id: &str) -> ApiResult<bool> {
    // Row first, then bytes: a file with no row is recoverable by the
    // sweeper, the reverse would leak a dead row.
    let Some(event) = state.db.event(user_id, event_id).await? else {
        return Ok(false);
    };
    if !state.db.delete_event_row(user_id, event_id).await? {
        return Ok(false);
    }
    for rel in [&event.video_path, &event.thumb_path] {
        if let Some(rel) = rel {
            let path = state.config.storage.root.join(rel);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(event = %event_id, error = %e, "Event file unlink failed");
                }
            }
        }
    }
    Ok(true)
}

pub async fn handle_delete(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(event_id): Path<String>,
) -> ApiResult<StatusCode> {
    if delete_one(&state, &auth.user.id, &event_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(NvrError::NotFound.into())
    }
}

/// Idempotent bulk delete: unknown ids are skipped, not errors.
pub async fn handle_batch_delete(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<BatchDeleteBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut deleted = 0usize;
    for id in &body.event_ids {
        if delete_one(&state, &auth.user.id, id).await? {
            deleted += 1;
        }
    }
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
