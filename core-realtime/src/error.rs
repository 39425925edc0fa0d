use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Channel error: {0}")]
    Channel(#[from] BridgeError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    #[error("Realtime client has shut down")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
