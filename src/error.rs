// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NvrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("Not authenticated")]
    Unauthorized,

    /// Missing resources and ownership failures share one variant so the API
    /// cannot leak whether a foreign resource exists.
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    /// Router unreachable, subprocess timeout, disk pressure. Retried
    /// internally; surfaced only when a user-initiated action depends on it.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Corrupt database, unreadable storage root. Fail-stop at startup.
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, NvrError>;
