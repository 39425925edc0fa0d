use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use core_realtime::RealtimeError;
use core_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{operation} is not available offline")]
    OfflineUnsupported { operation: &'static str },
}

impl ServiceError {
    pub fn offline(operation: &'static str) -> Self {
        ServiceError::OfflineUnsupported { operation }
    }

    /// True when the remote service could not be reached.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ServiceError::Library(e) => e.is_connectivity(),
            ServiceError::Sync(e) => e.is_connectivity(),
            _ => false,
        }
    }

    /// Message suitable for showing to the performer.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Library(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
