//! # Realtime Audience Requests
//!
//! Keeps the audience request list of the active setlist current over a
//! persistent server-push channel, with polling as a fallback.
//!
//! ## Components
//!
//! - **Machine** (`machine`): Pure connection state machine with a fixed
//!   reconnect delay and no retry cap
//! - **Client** (`client`): Background task that owns the channel, the
//!   reconnect timer and the poll interval

pub mod client;
pub mod error;
pub mod machine;

pub use client::{channel_url, RealtimeQueueClient};
pub use error::{RealtimeError, Result};
pub use machine::{
    ConnectionState, RealtimeAction, RealtimeInput, RealtimeMachine, RealtimeTarget,
    REFRESH_MESSAGE_TYPES,
};
