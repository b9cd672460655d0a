// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use chrono::{DateTime, Utc};

use super::Db;
use crate::error::{NvrError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    pub id: String,
    pub camera_id: String,
    pub user_id: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub reason: String,
    pub video_path: Option<String>,
    pub thumb_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub camera_id: Option<String>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl Db {
    /// Insert a completed event. The recorder only calls this after the clip
    /// and thumbnail are fsynced and renamed into place; a failed recording
    /// inserts nothing.
    pub async fn insert_event(&self, ev: &EventRecord) -> Result<()> {
        if let Some(end) = ev.end_ts {
            if end < ev.start_ts {
                return Err(NvrError::Validation("event end precedes start".into()));
            }
        }
        sqlx::query(
            "INSERT INTO events (id, camera_id, user_id, start_ts, end_ts, reason, video_path, thumb_path)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ev.id)
        .bind(&ev.camera_id)
        .bind(&ev.user_id)
        .bind(ev.start_ts)
        .bind(ev.end_ts)
        .bind(&ev.reason)
        .bind(&ev.video_path)
        .bind(&ev.thumb_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn event(&self, user_id: &str, id: &str) -> Result<Option<EventRecord>> {
        Ok(
            sqlx::query_as::<_, EventRecord>("SELECT * FROM events WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn events_filtered(
        &self,
        user_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>> {
        let mut sql = String::from("SELECT * FROM events WHERE user_id = ?");
        if filter.camera_id.is_some() {
            sql.push_str(" AND camera_id = ?");
        }
        if filter.start_ts.is_some() {
            sql.push_str(" AND start_ts >= ?");
        }
        if filter.end_ts.is_some() {
            sql.push_str(" AND start_ts < ?");
        }
        sql.push_str(" ORDER BY start_ts DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, EventRecord>(&sql).bind(user_id);
        if let Some(cam) = &filter.camera_id {
            q = q.bind(cam);
        }
        if let Some(start) = filter.start_ts {
            q = q.bind(start);
        }
        if let Some(end) = filter.end_ts {
            q = q.bind(end);
        }
        q = q.bind(filter.limit.unwrap_or(500));
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Events whose end predates the retention horizon.
    pub async fn events_expired(&self, horizon: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        Ok(sqlx::query_as::<_, EventRecord>(
            "SELECT * FROM events WHERE end_ts IS NOT NULL AND end_ts < ? ORDER BY start_ts",
        )
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn delete_event_row(&self, user_id: &str, id: &str) -> Result<bool> {
        let n = sqlx::query("DELETE FROM events WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(n > 0)
    }

    pub async fn delete_event_row_any(&self, id: &str) -> Result<bool> {
        let n = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(n > 0)
    }

    /// All event ids referenced for one camera; used by the orphan sweeper.
    pub async fn event_ids_for_camera(&self, camera_id: &str) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar("SELECT id FROM events WHERE camera_id = ?")
            .bind(camera_id)
            .fetch_all(&self.pool)
            .await?)
    }
}
