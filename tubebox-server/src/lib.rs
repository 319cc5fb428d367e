//! # tubebox server library
//!
//! Shared-listening music service backed by a public video platform.
//!
//! **Purpose:** Resolve searches and tracks through an official API with an
//! extraction-tool fallback, cache audio on disk, and coordinate a single
//! shared player (current track, queue, history, sleep timer) observed by
//! many clients over HTTP and SSE.
//!
//! **Architecture:** `resolver` → `cache` → `playback`, with `history` and
//! `sse` fan-out, all wired together in [`state::SharedState`] and exposed
//! through the axum router in [`api`].

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod inflight;
pub mod playback;
pub mod resolver;
pub mod sse;
pub mod state;
pub mod store;

pub use error::{Error, Result};
pub use state::SharedState;
