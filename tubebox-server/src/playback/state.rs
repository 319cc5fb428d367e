//! Playback state machine
//!
//! Pure transitions over the current track, the playing flag and the
//! bounded queue. Locking, persistence and fan-out live in
//! [`super::service`].

use std::collections::VecDeque;
use tubebox_common::{PlayerSnapshot, TrackId, TrackRef};

use crate::error::{Error, Result};

/// Maximum number of queued tracks
pub const QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    current_track: Option<TrackRef>,
    is_playing: bool,
    queue: VecDeque<TrackRef>,
}

impl PlaybackState {
    /// Start idle with a restored queue (truncated to capacity)
    pub fn with_queue(queue: Vec<TrackRef>) -> Self {
        Self {
            current_track: None,
            is_playing: false,
            queue: queue.into_iter().take(QUEUE_CAPACITY).collect(),
        }
    }

    pub fn current_track(&self) -> Option<&TrackRef> {
        self.current_track.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn queue(&self) -> &VecDeque<TrackRef> {
        &self.queue
    }

    /// Whether the track is current or queued
    pub fn references(&self, id: &TrackId) -> bool {
        self.current_track.as_ref().is_some_and(|t| &t.id == id)
            || self.queue.iter().any(|t| &t.id == id)
    }

    /// Play a track immediately; the queue is untouched
    pub fn play(&mut self, track: TrackRef) {
        self.current_track = Some(track);
        self.is_playing = true;
    }

    pub fn pause(&mut self) {
        self.is_playing = false;
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.current_track.is_none() {
            return Err(Error::InvalidArgument(
                "nothing to resume: no current track".to_string(),
            ));
        }
        self.is_playing = true;
        Ok(())
    }

    pub fn enqueue(&mut self, track: TrackRef, at_front: bool) -> Result<()> {
        if self.queue.len() >= QUEUE_CAPACITY {
            return Err(Error::QueueFull(QUEUE_CAPACITY));
        }
        if at_front {
            self.queue.push_front(track);
        } else {
            self.queue.push_back(track);
        }
        Ok(())
    }

    /// Pop the queue head into current
    ///
    /// With an empty queue playback stops and nothing is current, so a
    /// repeated call (a skip racing an end-of-track signal) changes nothing.
    /// Returns the new current track if one was popped.
    pub fn advance(&mut self) -> Option<&TrackRef> {
        match self.queue.pop_front() {
            Some(next) => {
                self.current_track = Some(next);
                self.is_playing = true;
            }
            None => {
                self.current_track = None;
                self.is_playing = false;
            }
        }
        self.current_track.as_ref()
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Sleep-timer expiry: clear the queue and stop
    pub fn stop(&mut self) {
        self.queue.clear();
        self.current_track = None;
        self.is_playing = false;
    }

    pub fn snapshot(&self, sleep_armed: bool, revision: u64) -> PlayerSnapshot {
        PlayerSnapshot {
            current_track: self.current_track.clone(),
            is_playing: self.is_playing,
            queue: self.queue.iter().cloned().collect(),
            sleep_armed,
            revision,
        }
    }
}
