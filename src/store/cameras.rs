// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{map_unique, Db};
use crate::error::{NvrError, Result};

/// How motion events are produced for a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Off,
    Motion,
    Ai,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Off => "off",
            DetectionMode::Motion => "motion",
            DetectionMode::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Option<DetectionMode> {
        match s {
            "off" => Some(DetectionMode::Off),
            "motion" => Some(DetectionMode::Motion),
            "ai" => Some(DetectionMode::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CameraRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub rtsp_url: String,
    pub rtsp_substream_url: Option<String>,
    /// Opaque slug identifying the camera to the media router. Assigned once
    /// at creation, never changed afterwards.
    pub path: String,
    pub display_order: i64,
    pub detection_mode: String,
    pub sensitivity: i64,
    /// Comma-separated enabled cell indices on the 10×10 grid; empty means
    /// every cell is enabled.
    pub roi_mask: String,
    /// Comma-separated allowed object classes for AI mode.
    pub object_classes: String,
    pub continuous_recording: bool,
    pub created_at: DateTime<Utc>,
}

impl CameraRecord {
    pub fn mode(&self) -> DetectionMode {
        DetectionMode::parse(&self.detection_mode).unwrap_or(DetectionMode::Off)
    }

    /// True when the camera needs a live worker at all.
    pub fn wants_worker(&self) -> bool {
        self.continuous_recording || self.mode() != DetectionMode::Off
    }
}

/// Partial update; absent fields stay untouched. `rtsp_substream_url` uses a
/// double option so an explicit JSON `null` clears the substream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraPatch {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub rtsp_substream_url: Option<Option<String>>,
    pub detection_mode: Option<DetectionMode>,
    pub sensitivity: Option<i64>,
    pub roi_mask: Option<String>,
    pub object_classes: Option<String>,
    pub continuous_recording: Option<bool>,
}

fn double_option<'de, D>(de: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(de)?))
}

impl CameraPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(NvrError::Validation("name must not be empty".into()));
            }
        }
        if let Some(url) = &self.rtsp_url {
            validate_rtsp_url(url)?;
        }
        if let Some(Some(url)) = &self.rtsp_substream_url {
            validate_rtsp_url(url)?;
        }
        if let Some(s) = self.sensitivity {
            if !(1..=100).contains(&s) {
                return Err(NvrError::Validation("sensitivity must be 1–100".into()));
            }
        }
        if let Some(mask) = &self.roi_mask {
            validate_roi_mask(mask)?;
        }
        Ok(())
    }
}

pub fn validate_rtsp_url(url: &str) -> Result<()> {
    if !(url.starts_with("rtsp://") || url.starts_with("rtsps://")) {
        return Err(NvrError::Validation(format!("not an RTSP URL: {url}")));
    }
    Ok(())
}

fn validate_roi_mask(mask: &str) -> Result<()> {
    if mask.is_empty() {
        return Ok(());
    }
    for part in mask.split(',') {
        match part.trim().parse::<u32>() {
            Ok(cell) if cell < 100 => {}
            _ => {
                return Err(NvrError::Validation(format!(
                    "roi_mask cells must be integers 0–99, got '{part}'"
                )))
            }
        }
    }
    Ok(())
}

/// 8-character lowercase-alphanumeric stream path slug.
fn gen_path_slug() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

const SLUG_ATTEMPTS: usize = 5;

impl Db {
    /// Create a camera with a freshly assigned unique path. On slug
    /// collision the insert is retried with a new slug up to 5 times.
    pub async fn create_camera(
        &self,
        user_id: &str,
        name: &str,
        rtsp_url: &str,
        rtsp_substream_url: Option<&str>,
    ) -> Result<CameraRecord> {
        if name.trim().is_empty() {
            return Err(NvrError::Validation("name must not be empty".into()));
        }
        validate_rtsp_url(rtsp_url)?;
        if let Some(sub) = rtsp_substream_url {
            validate_rtsp_url(sub)?;
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let order: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(display_order) + 1, 0) FROM cameras WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        for attempt in 0..SLUG_ATTEMPTS {
            let path = gen_path_slug();
            let res = sqlx::query(
                "INSERT INTO cameras
                   (id, user_id, name, rtsp_url, rtsp_substream_url, path, display_order, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(name)
            .bind(rtsp_url)
            .bind(rtsp_substream_url)
            .bind(&path)
            .bind(order)
            .bind(now)
            .execute(&self.pool)
            .await;
            match res {
                Ok(_) => return self.camera_any(&id).await?.ok_or(NvrError::NotFound),
                Err(sqlx::Error::Database(db))
                    if db.is_unique_violation() && attempt + 1 < SLUG_ATTEMPTS =>
                {
                    continue;
                }
                Err(e) => return Err(map_unique(e, "stream path collision")),
            }
        }
        Err(NvrError::Conflict("stream path collision".into()))
    }

    /// Ownership-checked lookup; a foreign camera reads as absent.
    pub async fn camera(&self, user_id: &str, id: &str) -> Result<Option<CameraRecord>> {
        Ok(
            sqlx::query_as::<_, CameraRecord>("SELECT * FROM cameras WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Unchecked lookup for internal workers.
    pub async fn camera_any(&self, id: &str) -> Result<Option<CameraRecord>> {
        Ok(sqlx::query_as::<_, CameraRecord>("SELECT * FROM cameras WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn camera_by_path(&self, path: &str) -> Result<Option<CameraRecord>> {
        Ok(sqlx::query_as::<_, CameraRecord>("SELECT * FROM cameras WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn cameras_for_user(&self, user_id: &str) -> Result<Vec<CameraRecord>> {
        Ok(sqlx::query_as::<_, CameraRecord>(
            "SELECT * FROM cameras WHERE user_id = ? ORDER BY display_order, created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn all_cameras(&self) -> Result<Vec<CameraRecord>> {
        Ok(
            sqlx::query_as::<_, CameraRecord>("SELECT * FROM cameras ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Apply a partial update and return the new record. The stream path is
    /// immutable by construction: no patch field maps to it.
    pub async fn update_camera(
        &self,
        user_id: &str,
        id: &str,
        patch: &CameraPatch,
    ) -> Result<CameraRecord> {
        patch.validate()?;
        let current = self.camera(user_id, id).await?.ok_or(NvrError::NotFound)?;

        let name = patch.name.clone().unwrap_or(current.name);
        let rtsp_url = patch.rtsp_url.clone().unwrap_or(current.rtsp_url);
        let rtsp_substream_url = match &patch.rtsp_substream_url {
            Some(v) => v.clone(),
            None => current.rtsp_substream_url,
        };
        let mode = patch
            .detection_mode
            .map(|m| m.as_str().to_string())
            .unwrap_or(current.detection_mode);
        let sensitivity = patch.sensitivity.unwrap_or(current.sensitivity);
        let roi_mask = patch.roi_mask.clone().unwrap_or(current.roi_mask);
        let object_classes = patch.object_classes.clone().unwrap_or(current.object_classes);
        let continuous = patch.continuous_recording.unwrap_or(current.continuous_recording);

        sqlx::query(
            "UPDATE cameras SET name = ?, rtsp_url = ?, rtsp_substream_url = ?,
                detection_mode = ?, sensitivity = ?, roi_mask = ?, object_classes = ?,
                continuous_recording = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&name)
        .bind(&rtsp_url)
        .bind(&rtsp_substream_url)
        .bind(&mode)
        .bind(sensitivity)
        .bind(&roi_mask)
        .bind(&object_classes)
        .bind(continuous)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.camera(user_id, id).await?.ok_or(NvrError::NotFound)
    }

    /// Cascades to events and segments via foreign keys; files are swept by
    /// the reaper afterwards.
    pub async fn delete_camera(&self, user_id: &str, id: &str) -> Result<CameraRecord> {
        let cam = self.camera(user_id, id).await?.ok_or(NvrError::NotFound)?;
        sqlx::query("DELETE FROM cameras WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(cam)
    }

    /// Assign `display_order` by list position, all-or-nothing. An id that is
    /// missing or owned by someone else aborts the transaction.
    pub async fn reorder_cameras(&self, user_id: &str, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (pos, id) in ids.iter().enumerate() {
            let n = sqlx::query("UPDATE cameras SET display_order = ? WHERE id = ? AND user_id = ?")
                .bind(pos as i64)
                .bind(id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if n != 1 {
                tx.rollback().await?;
                return Err(NvrError::NotFound);
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
