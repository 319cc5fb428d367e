//! Playback: state machine, sleep timer and the coordinating service

pub mod service;
pub mod sleep;
pub mod state;

pub use service::{PlaybackService, PlaybackSettings};
pub use sleep::SleepTimer;
pub use state::{PlaybackState, QUEUE_CAPACITY};
