//! # Core Configuration Module
//!
//! Provides configuration management for the setlist core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings for the core
//! crates. It enforces fail-fast validation so that every required bridge is
//! present before the service starts.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - REST calls to the repertoire API
//! - `SecureStore` - Holds the access token
//! - `SettingsStore` - Persists the offline snapshot and pending queue
//! - `RealtimeConnector` - Opens the audience-request channel
//!
//! ## Optional Dependencies
//!
//! - `NetworkMonitor` - Connectivity detection; without one the core assumes
//!   it is online until a request fails
//! - `Clock` - Defaults to [`SystemClock`]
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults from
//! `bridge-desktop` are injected for every required bridge that was not
//! provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .api_root("https://setlive.example.com/api")
//!     .settings_db_path("/path/to/settings.db")
//!     .build()
//!     .expect("Failed to build config");
//!
//! assert_eq!(config.realtime_root, "wss://setlive.example.com");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .api_root("ftp://example.com/api")
//!     .build()
//!     .expect("Should fail - invalid api root");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    time::SystemClock, Clock, HttpClient, NetworkMonitor, RealtimeConnector, SecureStore,
    SettingsStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// API root used when none is configured.
pub const DEFAULT_API_ROOT: &str = "http://localhost:8000/api";

/// Delay before reopening a dropped realtime channel.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Interval of the fallback refresh while the realtime channel is down.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Delay before retrying a flush that stopped because the server was unreachable.
pub const FLUSH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Page size used when re-downloading the song library after a flush.
pub const DEFAULT_SONG_PAGE_SIZE: u32 = 100;

/// Core configuration for the setlist core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// REST root, e.g. `https://host/api` (no trailing slash)
    pub api_root: String,

    /// WebSocket root, e.g. `wss://host` (no trailing slash)
    pub realtime_root: String,

    /// Location of the desktop settings database, if one was configured
    pub settings_db_path: Option<PathBuf>,

    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub realtime_connector: Arc<dyn RealtimeConnector>,
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub clock: Arc<dyn Clock>,

    pub sync: SyncSettings,
    pub realtime: RealtimeSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_root", &self.api_root)
            .field("realtime_root", &self.realtime_root)
            .field("settings_db_path", &self.settings_db_path)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("realtime_connector", &"RealtimeConnector { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field("sync", &self.sync)
            .field("realtime", &self.realtime)
            .finish()
    }
}

/// Settings for the offline sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Page size for the post-flush song refresh
    pub song_page_size: u32,
    /// Wait before retrying a flush halted by a connectivity failure
    pub retry_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            song_page_size: DEFAULT_SONG_PAGE_SIZE,
            retry_delay: FLUSH_RETRY_DELAY,
        }
    }
}

/// Timing for the realtime queue client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeSettings {
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - `api_root` is an http(s) URL
    /// - `realtime_root` is a ws(s) URL
    /// - Page size, flush retry delay and realtime intervals are non-zero
    pub fn validate(&self) -> Result<()> {
        let api = parse_root("API root", &self.api_root)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API root must use http or https, got '{}'",
                api.scheme()
            )));
        }

        let realtime = parse_root("Realtime root", &self.realtime_root)?;
        if !matches!(realtime.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "Realtime root must use ws or wss, got '{}'",
                realtime.scheme()
            )));
        }

        if self.sync.song_page_size == 0 {
            return Err(Error::Config(
                "Song page size must be greater than 0".to_string(),
            ));
        }

        if self.sync.retry_delay.is_zero() {
            return Err(Error::Config(
                "Flush retry delay must be greater than 0".to_string(),
            ));
        }

        if self.realtime.reconnect_delay.is_zero() {
            return Err(Error::Config(
                "Realtime reconnect delay must be greater than 0".to_string(),
            ));
        }

        if self.realtime.poll_interval.is_zero() {
            return Err(Error::Config(
                "Realtime poll interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_root(name: &str, value: &str) -> Result<Url> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{} cannot be empty", name)));
    }
    Url::parse(value).map_err(|e| Error::Config(format!("{} '{}' is invalid: {}", name, value, e)))
}

/// Derives the WebSocket root from the REST root.
///
/// `http` maps to `ws`, `https` to `wss`, and a trailing `/api` path segment
/// is removed.
///
/// ```
/// use core_runtime::config::derive_realtime_root;
///
/// assert_eq!(
///     derive_realtime_root("https://setlive.example.com/api").unwrap(),
///     "wss://setlive.example.com"
/// );
/// ```
pub fn derive_realtime_root(api_root: &str) -> Result<String> {
    let mut url = parse_root("API root", api_root)?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::Config(format!(
                "Cannot derive realtime root from '{}' scheme",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot switch '{}' to {}", api_root, scheme)))?;

    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix("/api").unwrap_or(path).to_string();
    url.set_path(&path);
    url.set_query(None);

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(feature = "desktop-shims")]
mod defaults {
    use super::*;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    pub fn http_client() -> Result<Arc<dyn HttpClient>> {
        let client = bridge_desktop::ReqwestHttpClient::new().map_err(|e| {
            Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
        })?;
        Ok(Arc::new(client))
    }

    pub fn secure_store() -> Result<Arc<dyn SecureStore>> {
        Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
    }

    pub fn realtime_connector() -> Result<Arc<dyn RealtimeConnector>> {
        Ok(Arc::new(bridge_desktop::TungsteniteConnector::new()))
    }

    pub fn settings_store(path: Option<&PathBuf>) -> Result<Arc<dyn SettingsStore>> {
        use bridge_desktop::SqliteSettingsStore;

        let path = path.cloned().ok_or_else(|| {
            Error::Config(
                "Settings database path is required for the default SettingsStore. \
                 Use .settings_db_path() to set it."
                    .to_string(),
            )
        })?;

        let init_store = |path: PathBuf| -> Result<_> {
            let runtime = Runtime::new().map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

            runtime
                .block_on(SqliteSettingsStore::new(path))
                .map_err(|e| {
                    Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
                })
        };

        // block_on panics inside a running runtime
        let store = match Handle::try_current() {
            Ok(_) => thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Worker thread panicked while creating default SettingsStore".to_string(),
                    )
                })??,
            Err(_) => init_store(path)?,
        };

        Ok(Arc::new(store))
    }
}

#[cfg(not(feature = "desktop-shims"))]
mod defaults {
    use super::*;

fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required {}. \
             Desktop: enable the 'desktop-shims' feature to use the bridge-desktop default. \
             Mobile/Web: inject a platform-native implementation.",
            capability, purpose
        ),
    }
}

    pub fn http_client() -> Result<Arc<dyn HttpClient>> {
        Err(capability_missing("HttpClient", "for repertoire API calls"))
    }

    pub fn secure_store() -> Result<Arc<dyn SecureStore>> {
        Err(capability_missing("SecureStore", "to read the access token"))
    }

    pub fn realtime_connector() -> Result<Arc<dyn RealtimeConnector>> {
        Err(capability_missing(
            "RealtimeConnector",
            "for the live audience-request channel",
        ))
    }

    pub fn settings_store(_path: Option<&PathBuf>) -> Result<Arc<dyn SettingsStore>> {
        Err(capability_missing(
            "SettingsStore",
            "to persist the offline snapshot and pending changes",
        ))
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_root: Option<String>,
    realtime_root: Option<String>,
    settings_db_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    realtime_connector: Option<Arc<dyn RealtimeConnector>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    sync: SyncSettings,
    realtime: RealtimeSettings,
}

impl CoreConfigBuilder {
    /// Sets the REST root. Default: [`DEFAULT_API_ROOT`].
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().api_root("https://setlive.example.com/api");
    /// ```
    pub fn api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = Some(root.into());
        self
    }

    /// Overrides the WebSocket root instead of deriving it from the API root.
    pub fn realtime_root(mut self, root: impl Into<String>) -> Self {
        self.realtime_root = Some(root.into());
        self
    }

    /// Sets the path of the desktop settings database.
    pub fn settings_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings_db_path = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the secure store holding the `access_token` secret.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the store that persists the offline snapshot and pending queue.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn realtime_connector(mut self, connector: Arc<dyn RealtimeConnector>) -> Self {
        self.realtime_connector = Some(connector);
        self
    }

    /// Sets the network monitor (optional).
    ///
    /// When present, the service flushes the queue on every offline→online
    /// transition and pauses the realtime channel while offline.
    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Page size used when refreshing the song library after a flush.
    pub fn song_page_size(mut self, size: u32) -> Self {
        self.sync.song_page_size = size;
        self
    }

    pub fn flush_retry_delay(mut self, delay: Duration) -> Self {
        self.sync.retry_delay = delay;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.realtime.reconnect_delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.realtime.poll_interval = interval;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - A required bridge is missing and no desktop default is available
    /// - A root URL is malformed or uses the wrong scheme
    /// - An interval or page size is zero
    pub fn build(self) -> Result<CoreConfig> {
        let api_root = self
            .api_root
            .unwrap_or_else(|| DEFAULT_API_ROOT.to_string())
            .trim_end_matches('/')
            .to_string();

        let realtime_root = match self.realtime_root {
            Some(root) => root.trim_end_matches('/').to_string(),
            None => derive_realtime_root(&api_root)?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => defaults::http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => defaults::secure_store()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => defaults::settings_store(self.settings_db_path.as_ref())?,
        };

        let realtime_connector = match self.realtime_connector {
            Some(connector) => connector,
            None => defaults::realtime_connector()?,
        };

        let config = CoreConfig {
            api_root,
            realtime_root,
            settings_db_path: self.settings_db_path,
            http_client,
            secure_store,
            settings_store,
            realtime_connector,
            network_monitor: self.network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync,
            realtime: self.realtime,
        };

        config.validate()?;

        Ok(config)
    }
}
