//! HTTP API
//!
//! Thin axum layer over the services in [`crate::state::SharedState`].

pub mod audio;
pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run};
