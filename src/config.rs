use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{NvrError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// HTTP API configuration.
    #[serde(default)]
    pub api: ApiConfig,
    /// Token signing and lifetimes.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Media-router coupling.
    pub router: RouterConfig,
    /// Side-car ingest (optional; the router pulls RTSP itself by default).
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Detection pipeline tuning.
    #[serde(default)]
    pub detect: DetectConfig,
    /// External tool paths.
    #[serde(default)]
    pub media: MediaConfig,
}

/// Storage parameters. All recorded artifacts live under `root`, which is
/// also the mount point used for free-space accounting.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Base directory: `continuous/<camera_id>/` and `events/<camera_id>/`.
    pub root: PathBuf,
    /// Nominal archive segment length in seconds.
    #[serde(default = "default_segment_secs")]
    pub segment_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file. Kept outside `storage.root` so archive sweeps
    /// never touch it.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Directory served at `/` for the browser UI, if present.
    #[serde(default = "default_frontend_dir")]
    pub frontend_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
            frontend_dir: default_frontend_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret. When empty a random secret is generated at
    /// startup, which invalidates all tokens on restart.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
        }
    }
}

/// Declarative surface of the embedded media router. Swapping the router
/// means changing these knobs plus `confsync`, nothing else.
#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    /// Path of the YAML configuration file the router watches.
    pub config_path: PathBuf,
    /// Base URL of the router control API, e.g. `http://127.0.0.1:9997`.
    #[serde(default = "default_control_url")]
    pub control_url: String,
    /// Base RTSP URL the router re-serves paths on, e.g. `rtsp://127.0.0.1:8554`.
    #[serde(default = "default_rtsp_url")]
    pub rtsp_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Command template spawned per camera when the router cannot pull RTSP
    /// itself. `{url}` and `{path}` are substituted. Empty disables side-cars.
    #[serde(default)]
    pub sidecar_command: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectConfig {
    /// Width of the downscaled analysis frame.
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    /// Height of the downscaled analysis frame.
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    /// Analysis frame rate pulled from the substream.
    #[serde(default = "default_detect_fps")]
    pub fps: u32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            fps: default_detect_fps(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// ffmpeg binary used for clip cuts, live dumps and thumbnails.
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self { ffmpeg_bin: default_ffmpeg_bin() }
    }
}

fn default_segment_secs() -> u64 { 900 }
fn default_db_path() -> PathBuf { PathBuf::from("outpost.db") }
fn default_api_enabled() -> bool { true }
fn default_api_port() -> u16 { 8080 }
fn default_frontend_dir() -> PathBuf { PathBuf::from("frontend") }
fn default_access_ttl() -> u64 { 15 * 60 }
fn default_refresh_ttl() -> u64 { 30 * 24 * 3600 }
fn default_control_url() -> String { "http://127.0.0.1:9997".into() }
fn default_rtsp_url() -> String { "rtsp://127.0.0.1:8554".into() }
fn default_frame_width() -> u32 { 160 }
fn default_frame_height() -> u32 { 120 }
fn default_detect_fps() -> u32 { 5 }
fn default_ffmpeg_bin() -> String { "ffmpeg".into() }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NvrError::Config(format!("Cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| NvrError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.segment_secs == 0 {
            return Err(NvrError::Config("storage.segment_secs must be > 0".into()));
        }
        if self.detect.fps == 0 || self.detect.frame_width == 0 || self.detect.frame_height == 0 {
            return Err(NvrError::Config("detect dimensions and fps must be > 0".into()));
        }
        if self.router.config_path.as_os_str().is_empty() {
            return Err(NvrError::Config("router.config_path is required".into()));
        }
        Ok(())
    }

    pub fn continuous_dir(&self, camera_id: &str) -> PathBuf {
        self.storage.root.join("continuous").join(camera_id)
    }

    pub fn events_dir(&self, camera_id: &str) -> PathBuf {
        self.storage.root.join("events").join(camera_id)
    }
}
