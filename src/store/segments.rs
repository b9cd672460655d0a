// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Timeline index over the 24/7 archive. One row per file under
//! `continuous/<camera_id>/`; `duration_secs` is NULL while the file is
//! still being written.

use chrono::{DateTime, Duration, Utc};

use super::Db;
use crate::error::Result;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SegmentRecord {
    pub id: i64,
    pub camera_id: String,
    pub start_ts: DateTime<Utc>,
    pub duration_secs: Option<f64>,
    pub filename: String,
    pub size_bytes: i64,
}

impl SegmentRecord {
    /// End of the segment; an open segment is treated as reaching `now`.
    pub fn end_ts(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.duration_secs {
            Some(d) => self.start_ts + Duration::milliseconds((d * 1000.0) as i64),
            None => now.max(self.start_ts),
        }
    }

    pub fn is_open(&self) -> bool {
        self.duration_secs.is_none()
    }
}

impl Db {
    /// Register a newly observed (still growing) file.
    pub async fn insert_open_segment(
        &self,
        camera_id: &str,
        start_ts: DateTime<Utc>,
        filename: &str,
        size_bytes: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO archive_segments (camera_id, start_ts, duration_secs, filename, size_bytes)
             VALUES (?, ?, NULL, ?, ?)
             ON CONFLICT(camera_id, filename) DO UPDATE SET size_bytes = excluded.size_bytes",
        )
        .bind(camera_id)
        .bind(start_ts)
        .bind(filename)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seal a segment with its true duration, which may be well under the
    /// nominal length after a restart.
    pub async fn close_segment(
        &self,
        camera_id: &str,
        filename: &str,
        duration_secs: f64,
        size_bytes: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE archive_segments SET duration_secs = ?, size_bytes = ?
             WHERE camera_id = ? AND filename = ?",
        )
        .bind(duration_secs)
        .bind(size_bytes)
        .bind(camera_id)
        .bind(filename)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn segment_by_filename(
        &self,
        camera_id: &str,
        filename: &str,
    ) -> Result<Option<SegmentRecord>> {
        Ok(sqlx::query_as::<_, SegmentRecord>(
            "SELECT * FROM archive_segments WHERE camera_id = ? AND filename = ?",
        )
        .bind(camera_id)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn segments_for_camera(&self, camera_id: &str) -> Result<Vec<SegmentRecord>> {
        Ok(sqlx::query_as::<_, SegmentRecord>(
            "SELECT * FROM archive_segments WHERE camera_id = ? ORDER BY start_ts",
        )
        .bind(camera_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Segments overlapping the half-open UTC window `[from, to)`, in start
    /// order. The window bound keeps the scan off the whole table: no
    /// segment outruns the nominal length by more than the boundary slack.
    pub async fn segments_overlapping(
        &self,
        camera_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_segment: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SegmentRecord>> {
        let scan_from = from - max_segment;
        let rows = sqlx::query_as::<_, SegmentRecord>(
            "SELECT * FROM archive_segments
             WHERE camera_id = ? AND start_ts >= ? AND start_ts < ?
             ORDER BY start_ts",
        )
        .bind(camera_id)
        .bind(scan_from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter(|s| s.end_ts(now) > from && s.start_ts < to)
            .collect())
    }

    /// Closed segments whose end predates `horizon`, oldest first. A closed
    /// segment's end never precedes its start, so `start < horizon` bounds
    /// the scan.
    pub async fn segments_expired(&self, horizon: DateTime<Utc>) -> Result<Vec<SegmentRecord>> {
        let rows = sqlx::query_as::<_, SegmentRecord>(
            "SELECT * FROM archive_segments
             WHERE duration_secs IS NOT NULL AND start_ts < ?
             ORDER BY start_ts",
        )
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter(|s| s.end_ts(horizon) < horizon)
            .collect())
    }

    /// Oldest closed segments across all cameras, for low-disk reclaim.
    pub async fn oldest_segments(&self, limit: i64) -> Result<Vec<SegmentRecord>> {
        Ok(sqlx::query_as::<_, SegmentRecord>(
            "SELECT * FROM archive_segments
             WHERE duration_secs IS NOT NULL ORDER BY start_ts LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn delete_segment_row(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM archive_segments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_segments_for_camera(&self, camera_id: &str) -> Result<u64> {
        Ok(sqlx::query("DELETE FROM archive_segments WHERE camera_id = ?")
            .bind(camera_id)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }
}
