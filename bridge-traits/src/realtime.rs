//! Realtime Channel Abstraction
//!
//! A persistent, server-push channel (WebSocket on every current platform).
//! The core never writes to it after the handshake; it only reads text
//! frames and closes it.

use async_trait::async_trait;

use crate::error::Result;

/// Opens realtime channels.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Open a channel to `url`. Authentication travels in the URL query.
    async fn connect(&self, url: &str) -> Result<Box<dyn RealtimeChannel>>;
}

/// An open realtime channel.
#[async_trait]
pub trait RealtimeChannel: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `None` once the peer closed the channel and `Some(Err(_))` on a
    /// transport error. Control frames are handled internally and never
    /// surface here. Must be cancel-safe: dropping the future loses no frame.
    async fn next_text(&mut self) -> Option<Result<String>>;

    /// Close the channel from our side.
    async fn close(&mut self) -> Result<()>;
}
