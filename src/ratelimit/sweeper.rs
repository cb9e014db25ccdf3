//! Background task that rolls expired windows back to zero.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::clock::Clock;
use super::store::CounterStore;

/// Spawn a task that sweeps `store` every `period`.
///
/// The first sweep runs immediately. Must be called from within a tokio
/// runtime; the task runs until aborted.
pub fn spawn_sweeper(
    store: Arc<CounterStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    evict: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let now = clock.now();
            let stats = store.sweep(now, evict);
            if stats.reset > 0 || stats.evicted > 0 {
                debug!(
                    now,
                    reset = stats.reset,
                    evicted = stats.evicted,
                    remaining_keys = store.len(),
                    "Swept expired rate limit windows"
                );
            }
        }
    })
}
