// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Control-plane client for the embedded media router.
//!
//! The router is a black box: it terminates RTSP and serves WHEP/HLS. We talk
//! to it through a declarative YAML file (written by `confsync`) and the
//! small HTTP surface wrapped here. Swapping the router means reimplementing
//! this module and `confsync`, nothing else.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{NvrError, Result};

/// Liveness snapshot for one path, as reported by `GET /v3/paths/list`.
#[derive(Debug, Clone, Default)]
pub struct PathStatus {
    pub ready: bool,
    pub readers: usize,
    pub last_error: Option<String>,
}

pub type PathHealthMap = HashMap<String, PathStatus>;

/// Payload for dynamically added (ephemeral) paths.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralPath {
    pub source: String,
    pub source_on_demand: bool,
}

#[async_trait]
pub trait RouterClient: Send + Sync {
    /// `POST /v3/config/reload` — re-read the configuration file.
    async fn reload(&self) -> Result<()>;
    /// `POST /v3/config/paths/add/{name}` — register a dynamic path.
    async fn add_path(&self, name: &str, conf: &EphemeralPath) -> Result<()>;
    /// `POST /v3/config/paths/remove/{name}` — drop a dynamic path.
    async fn remove_path(&self, name: &str) -> Result<()>;
    /// `GET /v3/paths/list` — per-path liveness and reader counts.
    async fn paths_status(&self) -> Result<PathHealthMap>;
    /// Push the current set of read credentials (the bridge's active pool)
    /// into the router's credential registry. Idempotent.
    async fn sync_read_credentials(&self, creds: &[(String, String)]) -> Result<()>;
}

const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Production client speaking to the router's control port.
pub struct HttpRouterClient {
    base: String,
    http: reqwest::Client,
}

impl HttpRouterClient {
    pub fn new(control_url: &str) -> HttpRouterClient {
        HttpRouterClient {
            base: control_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

fn transient(context: &str, e: reqwest::Error) -> NvrError {
    NvrError::Transient(format!("{context}: {e}"))
}

#[derive(Debug, Deserialize)]
struct PathsListResponse {
    #[serde(default)]
    items: Vec<PathsListItem>,
}

#[derive(Debug, Deserialize)]
struct PathsListItem {
    name: String,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    readers: Vec<serde_json::Value>,
    #[serde(rename = "readyErr", default)]
    ready_err: Option<String>,
}

#[async_trait]
impl RouterClient for HttpRouterClient {
    async fn reload(&self) -> Result<()> {
        self.http
            .post(self.url("/v3/config/reload"))
            .timeout(RELOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| transient("router reload", e))?
            .error_for_status()
            .map_err(|e| transient("router reload", e))?;
        Ok(())
    }

    async fn add_path(&self, name: &str, conf: &EphemeralPath) -> Result<()> {
        self.http
            .post(self.url(&format!("/v3/config/paths/add/{name}")))
            .timeout(CONTROL_TIMEOUT)
            .json(conf)
            .send()
            .await
            .map_err(|e| transient("router add path", e))?
            .error_for_status()
            .map_err(|e| transient("router add path", e))?;
        Ok(())
    }

    async fn remove_path(&self, name: &str) -> Result<()> {
        self.http
            .post(self.url(&format!("/v3/config/paths/remove/{name}")))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| transient("router remove path", e))?
            .error_for_status()
            .map_err(|e| transient("router remove path", e))?;
        Ok(())
    }

    async fn paths_status(&self) -> Result<PathHealthMap> {
        let resp: PathsListResponse = self
            .http
            .get(self.url("/v3/paths/list"))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| transient("router paths list", e))?
            .error_for_status()
            .map_err(|e| transient("router paths list", e))?
            .json()
            .await
            .map_err(|e| transient("router paths list", e))?;
        Ok(resp
            .items
            .into_iter()
            .map(|item| {
                (
                    item.name,
                    PathStatus {
                        ready: item.ready,
                        readers: item.readers.len(),
                        last_error: item.ready_err,
                    },
                )
            })
            .collect())
    }

    async fn sync_read_credentials(&self, creds: &[(String, String)]) -> Result<()> {
        let users: Vec<serde_json::Value> = creds
            .iter()
            .map(|(user, pass)| {
                serde_json::json!({
                    "user": user,
                    "pass": pass,
                    "permissions": [{"action": "read"}],
                })
            })
            .collect();
        self.http
            .patch(self.url("/v3/config/global/patch"))
            .timeout(CONTROL_TIMEOUT)
            .json(&serde_json::json!({ "authInternalUsers": users }))
            .send()
            .await
            .map_err(|e| transient("router credential sync", e))?
            .error_for_status()
            .map_err(|e| transient("router credential sync", e))?;
        Ok(())
    }
}

pub mod fake {
    //! In-process router double. Records what it was told and reports any
    //! path healthy on demand; used by the test suites and by `confsync`'s
    //! own tests.

    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct FakeRouterState {
        pub reload_count: usize,
        pub dynamic_paths: HashMap<String, EphemeralPath>,
        pub health: PathHealthMap,
        pub fail_reloads: bool,
        pub read_credentials: Vec<(String, String)>,
    }

    #[derive(Default)]
    pub struct FakeRouter {
        pub state: Mutex<FakeRouterState>,
    }

    impl FakeRouter {
        pub fn new() -> FakeRouter {
            FakeRouter::default()
        }

        pub fn set_ready(&self, path: &str, ready: bool) {
            let mut st = self.state.lock();
            let entry = st.health.entry(path.to_string()).or_default();
            entry.ready = ready;
        }

        pub fn set_readers(&self, path: &str, readers: usize) {
            let mut st = self.state.lock();
            let entry = st.health.entry(path.to_string()).or_default();
            entry.readers = readers;
        }

        pub fn set_error(&self, path: &str, err: &str) {
            let mut st = self.state.lock();
            let entry = st.health.entry(path.to_string()).or_default();
            entry.ready = false;
            entry.last_error = Some(err.to_string());
        }
    }

    #[async_trait]
    impl RouterClient for FakeRouter {
        async fn reload(&self) -> Result<()> {
            let mut st = self.state.lock();
            if st.fail_reloads {
                return Err(NvrError::Transient("router unreachable".into()));
            }
            st.reload_count += 1;
            Ok(())
        }

        async fn add_path(&self, name: &str, conf: &EphemeralPath) -> Result<()> {
            self.state
                .lock()
                .dynamic_paths
                .insert(name.to_string(), conf.clone());
            Ok(())
        }

        async fn remove_path(&self, name: &str) -> Result<()> {
            self.state.lock().dynamic_paths.remove(name);
            Ok(())
        }

        async fn paths_status(&self) -> Result<PathHealthMap> {
            let st = self.state.lock();
            let mut map = st.health.clone();
            for name in st.dynamic_paths.keys() {
                map.entry(name.clone()).or_insert_with(|| PathStatus {
                    ready: true,
                    readers: 0,
                    last_error: None,
                });
            }
            Ok(map)
        }

        async fn sync_read_credentials(&self, creds: &[(String, String)]) -> Result<()> {
            self.state.lock().read_credentials = creds.to_vec();
            Ok(())
        }
    }
}
