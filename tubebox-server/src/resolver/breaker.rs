//! Quota circuit breaker for the metered API strategy
//!
//! Once tripped, the metered strategy is skipped until the cooldown has
//! elapsed. Reset is lazy: the first check after the cooldown clears it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default cooldown: provider quotas reset daily, six hours is a safe retry point
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Trip {
    at: Instant,
    at_utc: DateTime<Utc>,
}

/// Tripped/untripped state shared by all resolver calls
#[derive(Debug)]
pub struct QuotaBreaker {
    cooldown: Duration,
    trip: Mutex<Option<Trip>>,
}

/// Breaker state as reported by `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub tripped: bool,
    pub tripped_at: Option<DateTime<Utc>>,
    pub cooldown_secs: u64,
}

impl Default for QuotaBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl QuotaBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            trip: Mutex::new(None),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether the metered strategy must be skipped right now
    pub fn is_tripped(&self) -> bool {
        let mut trip = self.trip.lock();
        match *trip {
            Some(t) if t.at.elapsed() >= self.cooldown => {
                info!(
                    "Quota cooldown of {:?} elapsed, re-enabling API strategy",
                    self.cooldown
                );
                *trip = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Record a quota signal; repeated trips keep the original trip time
    pub fn trip(&self) {
        let mut trip = self.trip.lock();
        if trip.is_none() {
            warn!(
                "API quota exceeded, falling back to extraction for {:?}",
                self.cooldown
            );
            *trip = Some(Trip {
                at: Instant::now(),
                at_utc: tubebox_common::time::now(),
            });
        }
    }

    pub fn reset(&self) {
        *self.trip.lock() = None;
    }

    pub fn status(&self) -> BreakerStatus {
        let tripped = self.is_tripped();
        BreakerStatus {
            tripped,
            tripped_at: self.trip.lock().map(|t| t.at_utc),
            cooldown_secs: self.cooldown.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_trip_then_lazy_reset_after_cooldown() {
        let breaker = QuotaBreaker::new(Duration::from_secs(60));
        assert!(!breaker.is_tripped());

        breaker.trip();
        assert!(breaker.is_tripped());
        assert!(breaker.status().tripped_at.is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.is_tripped());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!breaker.is_tripped());
        assert!(breaker.status().tripped_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trip_keeps_original_deadline() {
        let breaker = QuotaBreaker::new(Duration::from_secs(60));
        breaker.trip();
        tokio::time::advance(Duration::from_secs(40)).await;
        breaker.trip();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!breaker.is_tripped());
    }
}
