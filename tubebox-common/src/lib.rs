//! # Tubebox Common Library
//!
//! Shared code for the tubebox workspace including:
//! - Track identifiers and references
//! - Player snapshot types pushed to observers
//! - Configuration loading
//! - Server-Sent Events helpers
//! - Utility functions

pub mod config;
pub mod error;
pub mod sse;
pub mod time;
pub mod track;

pub use error::{Error, Result};
pub use track::{PlayerSnapshot, TrackId, TrackRef};
