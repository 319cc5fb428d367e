//! One-shot sleep timer
//!
//! At most one timer is armed. Arming again replaces the previous timer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

struct Armed {
    generation: u64,
    deadline: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    armed: Option<Armed>,
    generation: u64,
}

#[derive(Clone, Default)]
pub struct SleepTimer {
    slot: Arc<Mutex<Slot>>,
}

impl SleepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer; `on_expire` runs once the duration elapses
    ///
    /// The timer reads as disarmed before `on_expire` starts. A duration whose
    /// deadline is not representable is rejected and leaves the timer untouched.
    pub fn arm<F>(&self, duration: Duration, on_expire: F) -> Result<DateTime<Utc>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| tubebox_common::time::now().checked_add_signed(d))
            .ok_or_else(|| Error::InvalidArgument("sleep duration out of range".to_string()))?;

        let mut slot = self.slot.lock();
        slot.generation += 1;
        let generation = slot.generation;

        let timer = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if timer.disarm_if(generation) {
                info!("Sleep timer expired");
                on_expire.await;
            }
        });

        if let Some(previous) = slot.armed.replace(Armed {
            generation,
            deadline,
            handle,
        }) {
            debug!("Replacing armed sleep timer");
            previous.handle.abort();
        }
        Ok(deadline)
    }

    /// Disarm; returns whether a timer was armed
    pub fn cancel(&self) -> bool {
        match self.slot.lock().armed.take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().armed.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().armed.as_ref().map(|a| a.deadline)
    }

    fn disarm_if(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.armed.as_ref().is_some_and(|a| a.generation == generation) {
            slot.armed = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_duration() {
        let timer = SleepTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timer.arm(Duration::from_secs(60), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let timer = SleepTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&fired);
        timer.arm(Duration::from_secs(10), async move {
            first.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let second = Arc::clone(&fired);
        timer.arm(Duration::from_secs(30), async move {
            second.fetch_add(10, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let timer = SleepTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timer.arm(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_deadline_is_rejected() {
        let timer = SleepTimer::new();
        timer.arm(Duration::from_secs(60), async {}).unwrap();
        let before = timer.deadline();

        let err = timer.arm(Duration::MAX, async {}).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(timer.is_armed());
        assert_eq!(timer.deadline(), before);

        timer.cancel();
        let err = timer
            .arm(Duration::from_millis(10_000_000_000_000_000), async {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!timer.is_armed());
    }
}
