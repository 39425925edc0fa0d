//! Workspace placeholder crate.
//!
//! This crate exposes the shared `desktop-shims` feature that maps to
//! `core-service`. Host applications can depend on `setlive-workspace` and get
//! the offline queue, sync engine and realtime request client wired together.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
