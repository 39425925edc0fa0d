use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl SyncError {
    /// True when the remote service could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Library(e) if e.is_connectivity())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
