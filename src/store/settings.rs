use serde::Serialize;

use super::Db;
use crate::error::{NvrError, Result};

/// Singleton system settings row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Settings {
    pub retention_days: i64,
    /// Free-space floor as a fraction of the volume (e.g. 5.0 for 5%).
    /// NULL falls back to the built-in 5% floor.
    pub disk_floor_pct: Option<f64>,
}

impl Db {
    pub async fn settings(&self) -> Result<Settings> {
        Ok(sqlx::query_as::<_, Settings>(
            "SELECT retention_days, disk_floor_pct FROM settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn update_settings(
        &self,
        retention_days: i64,
        disk_floor_pct: Option<f64>,
    ) -> Result<Settings> {
        if retention_days < 1 {
            return Err(NvrError::Validation("retention_days must be ≥ 1".into()));
        }
        if let Some(pct) = disk_floor_pct {
            if !(0.0..=50.0).contains(&pct) {
                return Err(NvrError::Validation("disk_floor_pct must be 0–50".into()));
            }
        }
        sqlx::query("UPDATE settings SET retention_days = ?, disk_floor_pct = ? WHERE id = 1")
            .bind(retention_days)
            .bind(disk_floor_pct)
            .execute(&self.pool)
            .await?;
        self.settings().await
    }
}
