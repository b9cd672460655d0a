// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP/JSON control plane.
//!
//! All error responses carry `{detail: string}`: 400 validation, 401 auth,
//! 403/404 folded together for ownership, 409 conflict, 500 internal.

pub mod auth;
pub mod cameras;
pub mod events;
pub mod recordings;
pub mod system;
pub mod webhook;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::auth::{TokenKind, TokenSigner};
use crate::config::Config;
use crate::confsync::ConfSyncHandle;
use crate::creds::CredPool;
use crate::error::NvrError;
use crate::manager::NvrManager;
use crate::recorder::RecorderHandle;
use crate::router::RouterClient;
use crate::store::users::User;
use crate::store::Db;

/// Shared state passed to all handlers.
pub struct AppState {
    pub db: Db,
    pub config: Config,
    pub signer: TokenSigner,
    pub manager: Arc<Mutex<NvrManager>>,
    pub confsync: ConfSyncHandle,
    pub creds: Arc<CredPool>,
    pub router: Arc<dyn RouterClient>,
    pub recorder: RecorderHandle,
    pub started: Instant,
}

// ──────────────── error mapping ───────────────────────────────────────────

pub struct ApiError(NvrError);

impl<E: Into<NvrError>> From<E> for ApiError {
    fn from(e: E) -> ApiError {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            NvrError::Validation(msg) | NvrError::Config(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            NvrError::Unauthorized => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            NvrError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            NvrError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            NvrError::Transient(msg) => {
                error!(error = %msg, "Transient failure surfaced to API");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            other => {
                error!(error = %other, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ──────────────── auth extractor ──────────────────────────────────────────

/// Authenticated request context: a valid, unrevoked access token plus its
/// user row. One database read per request, never more.
pub struct AuthUser {
    pub user: User,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(NvrError::Unauthorized)?;
        let claims = state.signer.verify(&token)?;
        if claims.kind != TokenKind::Access {
            return Err(NvrError::Unauthorized.into());
        }
        let user = state
            .db
            .user_by_id(&claims.sub)
            .await?
            .ok_or(NvrError::Unauthorized)?;
        // Tokens issued at or before the revocation cutoff are dead, second
        // granularity (the claim carries whole seconds).
        if claims.iat <= user.tokens_valid_from.timestamp() {
            return Err(NvrError::Unauthorized.into());
        }
        Ok(AuthUser { user })
    }
}

/// Raw bearer token without validation; the refresh endpoint verifies it
/// itself against the session store.
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .map(BearerToken)
            .ok_or_else(|| NvrError::Unauthorized.into())
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

// ──────────────── router ──────────────────────────────────────────────────

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let frontend = state.config.api.frontend_dir.clone();
    Router::new()
        // Account & tokens
        .route("/register", post(auth::handle_register))
        .route("/token", post(auth::handle_token))
        .route("/token/refresh", post(auth::handle_refresh))
        .route("/users/me", get(auth::handle_me))
        .route("/api/users/me", put(auth::handle_update_me).delete(auth::handle_delete_me))
        .route("/api/users/change-password", post(auth::handle_change_password))
        .route("/api/users/logout-all", post(auth::handle_logout_all))
        // Cameras
        .route(
            "/api/cameras",
            get(cameras::handle_list).post(cameras::handle_create),
        )
        .route(
            "/api/cameras/{camera_id}",
            axum::routing::patch(cameras::handle_patch).delete(cameras::handle_delete),
        )
        .route("/api/cameras/reorder", post(cameras::handle_reorder))
        .route("/api/cameras/test-connection", post(cameras::handle_test_connection))
        // Recordings
        .route(
            "/api/cameras/{camera_id}/recordings",
            get(recordings::handle_list).delete(recordings::handle_wipe),
        )
        .route(
            "/api/cameras/{camera_id}/recordings/timeline",
            get(recordings::handle_timeline),
        )
        // Events
        .route("/api/events", get(events::handle_list))
        .route("/api/events/summary", get(events::handle_summary))
        .route("/api/events/batch-delete", post(events::handle_batch_delete))
        .route("/api/events/{event_id}", delete(events::handle_delete))
        // Live view & files
        .route("/api/webrtc-creds", get(system::handle_webrtc_creds))
        .route("/api/download", get(system::handle_download))
        // System
        .route("/api/system/health", get(system::handle_health))
        .route(
            "/api/system/settings",
            get(system::handle_get_settings).put(system::handle_put_settings),
        )
        // Webhooks
        .route("/api/webhook/motion/{path}", post(webhook::handle_motion))
        .route("/api/webhook/router-auth", post(webhook::handle_router_auth))
        // Serve static frontend files
        .fallback_service(ServeDir::new(frontend))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    info!(port, "HTTP API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}
