// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Relational persistence: users, sessions, cameras, archive segments,
//! events, settings. One SQLite file; foreign keys enforce the cascade
//! rules, so deleting a user removes its cameras and deleting a camera
//! removes its events and segments in one transaction.

pub mod cameras;
pub mod events;
pub mod segments;
pub mod sessions;
pub mod settings;
pub mod users;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{NvrError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                TEXT PRIMARY KEY,
    email             TEXT NOT NULL UNIQUE,
    password_hash     TEXT NOT NULL,
    display_name      TEXT NOT NULL DEFAULT '',
    tokens_valid_from TEXT NOT NULL,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    jti        TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    ip         TEXT,
    user_agent TEXT
);

CREATE TABLE IF NOT EXISTS cameras (
    id                   TEXT PRIMARY KEY,
    user_id              TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name                 TEXT NOT NULL,
    rtsp_url             TEXT NOT NULL,
    rtsp_substream_url   TEXT,
    path                 TEXT NOT NULL UNIQUE,
    display_order        INTEGER NOT NULL DEFAULT 0,
    detection_mode       TEXT NOT NULL DEFAULT 'off',
    sensitivity          INTEGER NOT NULL DEFAULT 50,
    roi_mask             TEXT NOT NULL DEFAULT '',
    object_classes       TEXT NOT NULL DEFAULT '',
    continuous_recording INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archive_segments (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id     TEXT NOT NULL REFERENCES cameras(id) ON DELETE CASCADE,
    start_ts      TEXT NOT NULL,
    duration_secs REAL,
    filename      TEXT NOT NULL,
    size_bytes    INTEGER NOT NULL DEFAULT 0,
    UNIQUE(camera_id, filename)
);
CREATE INDEX IF NOT EXISTS idx_segments_camera_start
    ON archive_segments(camera_id, start_ts);

CREATE TABLE IF NOT EXISTS events (
    id         TEXT PRIMARY KEY,
    camera_id  TEXT NOT NULL REFERENCES cameras(id) ON DELETE CASCADE,
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    start_ts   TEXT NOT NULL,
    end_ts     TEXT,
    reason     TEXT NOT NULL,
    video_path TEXT,
    thumb_path TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_camera_start
    ON events(camera_id, start_ts);

CREATE TABLE IF NOT EXISTS settings (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    retention_days INTEGER NOT NULL DEFAULT 7,
    disk_floor_pct REAL
);
INSERT OR IGNORE INTO settings (id) VALUES (1);
"#;

/// Handle to the store. Cheap to clone; all methods take `&self`.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (or create) the database file and apply the schema. Fails fast
    /// on a corrupt database rather than masking data loss.
    pub async fn open(path: &Path) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| NvrError::Fatal(format!("bad database path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| NvrError::Fatal(format!("cannot open database: {e}")))?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| NvrError::Fatal(format!("cannot apply schema: {e}")))?;
        Ok(Db { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Translate a unique-constraint violation into `Conflict`, everything else
/// into the generic database error.
fn map_unique(e: sqlx::Error, conflict_msg: &str) -> NvrError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return NvrError::Conflict(conflict_msg.to_string());
        }
    }
    NvrError::Db(e)
}
