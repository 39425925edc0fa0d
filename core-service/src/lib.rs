//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, secure
//! storage, settings, realtime channels, connectivity) into the shared Rust
//! core. Desktop apps typically enable the `desktop-shims` feature, which
//! fills in any bridge left unset on the [`CoreConfig`] builder with the
//! adapters from `bridge-desktop`.
//!
//! ```no_run
//! # async fn example() -> core_service::Result<()> {
//! use core_service::{CoreConfig, SetlistService};
//!
//! let config = CoreConfig::builder()
//!     .api_root("https://setlists.example.com/api")
//!     .build()?;
//! let service = SetlistService::bootstrap(config).await?;
//! let song = service.create_song("Wonderwall", "Oasis").await?;
//! println!("{} songs, {} pending", service.songs().await.len(), service.pending_count().await);
//! # let _ = song;
//! # Ok(())
//! # }
//! ```

mod confirmed;
pub mod error;
pub mod service;

pub use error::{Result, ServiceError};
pub use service::SetlistService;

pub use core_library::{
    AudienceLink, AudienceRequest, ItemId, MoveDirection, SetlistDetail, SetlistId, Setlist,
    SetlistItem, Song, SongId, SongPage, SongPatch, SongQuery,
};
pub use core_realtime::ConnectionState;
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus};
pub use core_sync::{FlushOutcome, FlushReport, PendingMutation};
