// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Form, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{hash_password, verify_password, TokenKind};
use crate::error::NvrError;
use crate::store::sessions::Session;
use crate::store::users::User;

use super::{ApiResult, AppState, AuthUser, BearerToken};

#[derive(Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateMeBody {
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordBody {
    pub current: String,
    pub new: String,
}

#[derive(Serialize)]
pub struct UserOut {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserOut {
    fn from(u: &User) -> UserOut {
        UserOut {
            id: u.id.clone(),
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            created_at: u.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<impl IntoResponse> {
    let email = body.email.trim().to_ascii_lowercase();
    if !email.contains('@') || email.len() < 3 {
        return Err(NvrError::Validation("invalid email".into()).into());
    }
    let hash = hash_password(&body.password)?;
    let user = state.db.create_user(&email, &hash).await?;
    info!(user = %user.id, "User registered");
    Ok((StatusCode::CREATED, Json(UserOut::from(&user))))
}

async fn issue_tokens(
    state: &AppState,
    user: &User,
    headers: &HeaderMap,
) -> ApiResult<TokenPair> {
    let now = Utc::now();
    let (access_token, _) = state.signer.mint(&user.id, TokenKind::Access, now)?;
    let (refresh_token, refresh_claims) = state.signer.mint(&user.id, TokenKind::Refresh, now)?;

    // The session row mirrors the refresh claims at whole-second precision.
    state
        .db
        .insert_session(&Session {
            jti: refresh_claims.jti.clone(),
            user_id: user.id.clone(),
            created_at: DateTime::from_timestamp(refresh_claims.iat, 0).unwrap_or(now),
            expires_at: DateTime::from_timestamp(refresh_claims.exp, 0).unwrap_or(now),
            ip: headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.split(',').next().unwrap_or(s).trim().to_string()),
            user_agent: headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
        .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "bearer",
    })
}

pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> ApiResult<Json<TokenPair>> {
    let email = form.username.trim().to_ascii_lowercase();
    let user = state
        .db
        .user_by_email(&email)
        .await?
        .ok_or(NvrError::Unauthorized)?;
    if !verify_password(&form.password, &user.password_hash) {
        return Err(NvrError::Unauthorized.into());
    }
    let pair = issue_tokens(&state, &user, &headers).await?;
    Ok(Json(pair))
}

/// Rotate a refresh token: the old session dies, a new pair is issued.
pub async fn handle_refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    BearerToken(token): BearerToken,
) -> ApiResult<Json<TokenPair>> {
    let claims = state.signer.verify(&token)?;
    if claims.kind != TokenKind::Refresh {
        return Err(NvrError::Unauthorized.into());
    }
    let now = Utc::now();
    let session = state
        .db
        .valid_session(&claims.jti, now)
        .await?
        .ok_or(NvrError::Unauthorized)?;
    let user = state
        .db
        .user_by_id(&session.user_id)
        .await?
        .ok_or(NvrError::Unauthorized)?;

    state.db.delete_session(&claims.jti).await?;
    let pair = issue_tokens(&state, &user, &headers).await?;
    Ok(Json(pair))
}

pub async fn handle_me(auth: AuthUser) -> Json<UserOut> {
    Json(UserOut::from(&auth.user))
}

pub async fn handle_update_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<UpdateMeBody>,
) -> ApiResult<Json<UserOut>> {
    let name = body.display_name.trim();
    if name.is_empty() {
        return Err(NvrError::Validation("display_name must not be empty".into()).into());
    }
    let user = state.db.update_display_name(&auth.user.id, name).await?;
    Ok(Json(UserOut::from(&user)))
}

pub async fn handle_change_password(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ChangePasswordBody>,
) -> ApiResult<StatusCode> {
    if !verify_password(&body.current, &auth.user.password_hash) {
        return Err(NvrError::Unauthorized.into());
    }
    let hash = hash_password(&body.new)?;
    state.db.update_password(&auth.user.id, &hash).await?;
    // A password change revokes every other device.
    state
        .db
        .bump_tokens_valid_from(&auth.user.id, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke everything issued up to now, sessions included.
pub async fn handle_logout_all(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<StatusCode> {
    state
        .db
        .bump_tokens_valid_from(&auth.user.id, Utc::now())
        .await?;
    info!(user = %auth.user.id, "All sessions revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// Delete the account; cameras and artifacts cascade, files follow through
/// the reaper.
pub async fn handle_delete_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<StatusCode> {
    let cameras = state.db.cameras_for_user(&auth.user.id).await?;
    state.db.delete_user(&auth.user.id).await?;
    {
        let mut mgr = state.manager.lock();
        for cam in &cameras {
            mgr.camera_deleted(&cam.id);
        }
    }
    info!(user = %auth.user.id, "Account deleted");
    Ok(StatusCode::NO_CONTENT)
}
