//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the setlist core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It establishes the logging
//! conventions, the validated configuration that wires host bridges in, and
//! the broadcast channel used to report sync and realtime activity to hosts.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
