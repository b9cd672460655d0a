// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{map_unique, Db};
use crate::error::{NvrError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    /// Sessions and tokens issued at or before this instant are revoked en
    /// masse.
    pub tokens_valid_from: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Whole-second truncation keeps the revocation cutoff comparable with JWT
/// `iat` claims, which only carry seconds.
fn now_secs() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now)
}

impl Db {
    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let id = Uuid::new_v4().to_string();
        let now = now_secs();
        // Strictly before any token this account can mint: issuance in the
        // creation second must not read as revoked.
        let valid_from = now - chrono::Duration::seconds(1);
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, tokens_valid_from, created_at)
             VALUES (?, ?, ?, '', ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(valid_from)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "email already registered"))?;
        self.user_by_id(&id).await?.ok_or(NvrError::NotFound)
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn update_display_name(&self, id: &str, display_name: &str) -> Result<User> {
        let n = sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(NvrError::NotFound);
        }
        self.user_by_id(id).await?.ok_or(NvrError::NotFound)
    }

    pub async fn update_password(&self, id: &str, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Revoke every session and token issued at or before `now` by moving
    /// the cutoff there (truncated to the second, matching JWT `iat`
    /// precision). Token validation compares issue time against this column.
    pub async fn bump_tokens_valid_from(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let now = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        sqlx::query("UPDATE users SET tokens_valid_from = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cascades to cameras, sessions, events and segments via foreign keys.
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let n = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(NvrError::NotFound);
        }
        Ok(())
    }
}
