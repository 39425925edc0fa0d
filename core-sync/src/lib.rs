//! # Offline Sync Module
//!
//! Keeps edits made without connectivity and replays them once the server is
//! reachable again.
//!
//! ## Overview
//!
//! This module manages:
//! - Persisting the last confirmed server view and the pending edits
//! - Queueing offline edits in the order they were made
//! - Resolving temporary identifiers to server ones during a flush
//! - Draining the queue and refreshing the snapshot afterwards
//!
//! ## Components
//!
//! - **Mutations** (`mutation`): The closed set of offline edit kinds
//! - **Snapshot Store** (`snapshot`): Offline snapshot and queue records
//! - **Mutation Queue** (`queue`): Write-through FIFO of pending edits
//! - **Id Remapper** (`remap`): Temporary → server id table for one flush
//! - **Sync Engine** (`engine`): Sequential flush with connectivity halting

pub mod engine;
pub mod error;
pub mod mutation;
pub mod queue;
pub mod remap;
pub mod snapshot;

pub use engine::{FlushOutcome, FlushReport, SyncEngine, SYNCED_MESSAGE};
pub use error::{Result, SyncError};
pub use mutation::{
    AddSetlistItemPayload, CreateSetlistPayload, CreateSongPayload, DeleteSetlistItemPayload,
    Mutation, PendingMutation, RenameSetlistPayload, ReorderSetlistPayload,
};
pub use queue::MutationQueue;
pub use remap::{IdRemapper, ResourceKind};
pub use snapshot::{OfflineSnapshot, SnapshotStore, PENDING_MUTATIONS_KEY, SNAPSHOT_KEY};
