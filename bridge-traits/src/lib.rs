//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the setlist core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per platform
//! (desktop, iOS, Android, web).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry and TLS
//! - [`RealtimeConnector`](realtime::RealtimeConnector) - Persistent server-push channel
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity detection
//!
//! ### Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value storage for the offline snapshot and queue
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). The HTTP bridge
//! reports transport failures as [`BridgeError::Network`] so callers can tell
//! "the server could not be reached" apart from "the server said no" without
//! inspecting message text.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support sharing across
//! async tasks.

pub mod error;
pub mod http;
pub mod network;
pub mod realtime;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use realtime::{RealtimeChannel, RealtimeConnector};
pub use storage::{SecureStore, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
