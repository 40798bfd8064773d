//! Configuration for Photon.
//!
//! Two kinds of settings exist:
//!
//! - [`NetConfig`]: endpoints, the pinned host and key, timeouts. Read once
//!   at startup.
//! - [`RemoteConfig`]: the capture interval and the uploads kill switch.
//!   Delivered through a [`ConfigProvider`] and re-read every cycle.
//!
//! Both are read-only to the core.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default seconds between capture cycles.
pub const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 30;

/// Shortest allowed capture interval; smaller values are clamped up.
pub const MIN_CAPTURE_INTERVAL_SECS: u64 = 5;

/// Minimum time between two remote-config fetches.
pub const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Network endpoints and transport hardening settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Broker endpoint for phase 1 of an upload. Blank disables uploads.
    pub broker_url: String,
    /// Device registration endpoint. Blank skips registration.
    pub register_url: String,
    /// Host whose leaf key is pinned.
    pub pinned_host: String,
    /// SHA-256 of the pinned leaf's SubjectPublicKeyInfo (base64 or hex).
    pub pinned_cert_sha256: String,
    /// Environment label sent at registration.
    pub environment: String,
    /// TCP + TLS connect timeout, seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout, seconds.
    pub request_timeout_secs: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            broker_url: String::new(),
            register_url: String::new(),
            pinned_host: String::new(),
            pinned_cert_sha256: String::new(),
            environment: "dev".to_string(),
            connect_timeout_secs: 15,
            request_timeout_secs: 30,
        }
    }
}

impl NetConfig {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether a pin is configured.
    pub fn has_pin(&self) -> bool {
        !self.pinned_host.trim().is_empty() && !self.pinned_cert_sha256.trim().is_empty()
    }
}

/// Remotely controlled capture settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Seconds between capture cycles.
    pub capture_interval_seconds: u64,
    /// Kill switch for uploads.
    pub uploads_enabled: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            capture_interval_seconds: DEFAULT_CAPTURE_INTERVAL_SECS,
            uploads_enabled: true,
        }
    }
}

impl RemoteConfig {
    /// Capture interval, never shorter than [`MIN_CAPTURE_INTERVAL_SECS`].
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_seconds.max(MIN_CAPTURE_INTERVAL_SECS))
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotonConfig {
    /// Network settings.
    pub net: NetConfig,
    /// Initial remote settings.
    pub remote: RemoteConfig,
    /// Advertiser identifier attached to metadata.
    pub advertiser_id: Option<String>,
}

impl PhotonConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            Error::ConfigurationMissing(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Encoding(format!("invalid config {}: {}", path.display(), e)))
    }
}

/// Source of [`RemoteConfig`] snapshots.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Current snapshot. Never blocks on I/O.
    fn snapshot(&self) -> RemoteConfig;

    /// Fetch newer values if the provider has any. Failures keep the last
    /// good snapshot.
    async fn refresh(&self);
}

/// Provider with fixed values.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: RemoteConfig,
}

impl StaticConfigProvider {
    /// Wrap fixed values.
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    fn snapshot(&self) -> RemoteConfig {
        self.config
    }

    async fn refresh(&self) {}
}

struct FileState {
    snapshot: RemoteConfig,
    last_fetch: Option<Instant>,
}

/// Provider that re-reads the `remote` section of a config file.
///
/// Fetches at most once per [`MIN_FETCH_INTERVAL`].
pub struct FileConfigProvider {
    path: PathBuf,
    min_fetch_interval: Duration,
    state: Mutex<FileState>,
}

impl FileConfigProvider {
    /// Start from `initial` and refresh from `path`.
    pub fn new(path: impl Into<PathBuf>, initial: RemoteConfig) -> Self {
        Self {
            path: path.into(),
            min_fetch_interval: MIN_FETCH_INTERVAL,
            state: Mutex::new(FileState {
                snapshot: initial,
                last_fetch: None,
            }),
        }
    }

    /// Override the minimum fetch interval.
    pub fn with_min_fetch_interval(mut self, interval: Duration) -> Self {
        self.min_fetch_interval = interval;
        self
    }

    fn due(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state
                .last_fetch
                .map_or(true, |at| at.elapsed() >= self.min_fetch_interval),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    fn snapshot(&self) -> RemoteConfig {
        self.state
            .lock()
            .map(|state| state.snapshot)
            .unwrap_or_default()
    }

    async fn refresh(&self) {
        if !self.due() {
            return;
        }

        let fetched = match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice::<PhotonConfig>(&raw)
                .map(|c| c.remote)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Ok(mut state) = self.state.lock() {
            state.last_fetch = Some(Instant::now());
            match fetched {
                Ok(remote) => {
                    if remote != state.snapshot {
                        debug!(
                            interval = remote.capture_interval_seconds,
                            uploads_enabled = remote.uploads_enabled,
                            "Remote config updated"
                        );
                    }
                    state.snapshot = remote;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Remote config refresh failed");
                }
            }
        }
    }
}
