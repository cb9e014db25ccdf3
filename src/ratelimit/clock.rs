//! Second-granularity clocks.
//!
//! The limiter never reads the system time on the hot path. It reads a shared
//! atomic that a background task refreshes once per second, so boundaries may
//! lag the wall clock by up to a second.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How often a [`CachedClock`] is refreshed.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// A source of the current time in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync + Debug {
    /// The current time, in seconds.
    fn now(&self) -> u64;
}

/// Read the wall clock directly.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Clock backed by a shared atomic that is refreshed on a fixed cadence.
///
/// Clones share the same underlying value.
#[derive(Debug, Clone)]
pub struct CachedClock {
    secs: Arc<AtomicU64>,
}

impl CachedClock {
    /// Create a clock primed with the current wall time.
    pub fn new() -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(unix_now())),
        }
    }

    /// Re-read the wall clock. The stored value never moves backwards.
    pub fn refresh(&self) {
        self.secs.fetch_max(unix_now(), Ordering::Release);
    }

    /// Spawn the task that refreshes this clock every second.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_refresher(&self) -> JoinHandle<()> {
        let clock = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                clock.refresh();
            }
        })
    }
}

impl Default for CachedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for CachedClock {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::Acquire)
    }
}

/// Clock whose time only changes when told to.
///
/// Useful for tests and for hosts that already track time themselves.
/// Clones share the same underlying value.
#[derive(Debug, Clone)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at `start` seconds.
    pub fn new(start: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Set the clock to `secs`.
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::Release);
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::Acquire)
    }
}
