//! # Repertoire Domain Module
//!
//! Songs, setlists and audience requests, plus the client for the remote
//! repertoire service.
//!
//! ## Overview
//!
//! This module manages:
//! - Domain models with typed, possibly temporary, identifiers
//! - Allocation of temporary ids for offline creates
//! - The in-memory repertoire view used for optimistic edits
//! - The `RepertoireApi` trait and its HTTP implementation
//! - Selection helpers for adding songs to a setlist

pub mod api;
pub mod error;
pub mod http_api;
pub mod models;
pub mod selection;
pub mod state;
pub mod temp_id;

pub use api::{fetch_all_songs, RepertoireApi};
pub use error::{LibraryError, Result};
pub use http_api::{HttpRepertoireApi, ACCESS_TOKEN_KEY};
pub use models::{
    AudienceLink, AudienceQueue, AudienceRequest, ItemId, MoveDirection, PublicSetlist,
    SetlistDetail, SetlistId, Setlist, SetlistItem, Song, SongId, SongPage, SongPatch, SongQuery,
};
pub use state::RepertoireState;
pub use temp_id::TempIdAllocator;
