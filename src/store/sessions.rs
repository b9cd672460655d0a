use chrono::{DateTime, Utc};

use super::Db;
use crate::error::Result;

/// One row per refresh token (an authenticated device).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub jti: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Db {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (jti, user_id, created_at, expires_at, ip, user_agent)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.jti)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A session is valid iff its row exists, it has not expired, and it was
    /// created strictly after the owner's `tokens_valid_from`; a session
    /// created in the same second as the revocation cutoff is revoked too.
    /// One query; callers must not consult the row again within the same
    /// request.
    pub async fn valid_session(&self, jti: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT s.* FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.jti = ? AND s.expires_at > ? AND u.tokens_valid_from < s.created_at",
        )
        .bind(jti)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn delete_session(&self, jti: &str) -> Result<bool> {
        let n = sqlx::query("DELETE FROM sessions WHERE jti = ?")
            .bind(jti)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(n > 0)
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }
}
