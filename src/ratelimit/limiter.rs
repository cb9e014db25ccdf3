//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::{CachedClock, Clock};
use super::context::OperationContext;
use super::decision::{
    Decision, Quota, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
use super::policy::Policy;
use super::store::{CounterEntry, CounterStore, SweepStats};
use super::sweeper::spawn_sweeper;

/// Fixed-window rate limiter.
///
/// Each key may be hit `max_hits` times per window; the hit that exceeds the
/// limit is counted and rejected. Windows open on the first hit after a reset
/// and close `window_seconds` later.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
/// Background tasks started by the constructors are aborted on
/// [`shutdown`](Self::shutdown) or drop.
pub struct RateLimiter<C> {
    policy: Policy<C>,
    store: Arc<CounterStore>,
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: OperationContext + 'static> RateLimiter<C> {
    /// Create a limiter with a cached clock and its expiry sweeper.
    ///
    /// Spawns the clock refresher and the sweeper, so it must be called from
    /// within a tokio runtime.
    pub fn new(policy: Policy<C>) -> Self {
        let clock = CachedClock::new();
        let refresher = clock.spawn_refresher();

        let limiter = Self::with_clock(policy, Arc::new(clock));
        limiter.tasks.lock().push(refresher);
        limiter
    }

    /// Create a limiter reading time from `clock`, with its expiry sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_clock(policy: Policy<C>, clock: Arc<dyn Clock>) -> Self {
        let limiter = Self::detached(policy, clock);
        let sweeper = spawn_sweeper(
            Arc::clone(&limiter.store),
            Arc::clone(&limiter.clock),
            Duration::from_secs(limiter.policy.window_seconds()),
            limiter.policy.evict_expired(),
        );
        limiter.tasks.lock().push(sweeper);
        limiter
    }

    /// Create a limiter without any background tasks.
    ///
    /// Closed windows still roll over when their key is hit again, but idle
    /// keys are only reclaimed when the caller invokes [`sweep`](Self::sweep).
    pub fn detached(policy: Policy<C>, clock: Arc<dyn Clock>) -> Self {
        debug!(
            window_seconds = policy.window_seconds(),
            max_hits = policy.max_hits(),
            status_code = policy.status_code(),
            "Creating rate limiter"
        );

        Self {
            store: Arc::new(CounterStore::new(policy.window_seconds())),
            policy,
            clock,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Evaluate one operation.
    ///
    /// Admitted operations get the `X-RateLimit-*` headers. Rejected operations
    /// are handed to the policy's reject handler and get `Retry-After`; the
    /// host must not continue processing them.
    pub fn evaluate(&self, op: &mut C) -> Decision {
        if self.policy.bypasses(op) {
            trace!("Operation bypassed rate limiting");
            return Decision::Bypassed;
        }

        let key = self.policy.key_for(op);
        let decision = self.check(&key);

        match &decision {
            Decision::Admitted(quota) => {
                op.set_header(HEADER_LIMIT, quota.limit.to_string());
                op.set_header(HEADER_REMAINING, quota.remaining.to_string());
                op.set_header(HEADER_RESET, quota.reset.to_string());
            }
            Decision::Rejected(rejection) => {
                self.policy.reject(op, rejection);
                op.set_header(HEADER_RETRY_AFTER, rejection.retry_after.to_string());
            }
            Decision::Bypassed => {}
        }

        decision
    }
}

impl<C> RateLimiter<C> {
    /// Count one hit for `key` and decide whether it is within quota.
    ///
    /// No headers are written; use this when the host derives keys itself.
    pub fn check(&self, key: &str) -> Decision {
        let now = self.clock.now();
        let (hits, window_end) = self.store.record_hit(key, now);
        let limit = self.policy.max_hits();
        let reset = window_end.saturating_sub(now);

        trace!(key = %key, hits, limit, reset, "Checking rate limit");

        if hits > limit {
            debug!(key = %key, hits, limit, retry_after = reset, "Rate limit exceeded");
            return Decision::Rejected(self.policy.rejection(reset));
        }

        Decision::Admitted(Quota {
            limit,
            remaining: limit - hits,
            reset,
        })
    }

    /// Run one expiry sweep now.
    pub fn sweep(&self) -> SweepStats {
        self.store.sweep(self.clock.now(), self.policy.evict_expired())
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy<C> {
        &self.policy
    }

    /// The clock this limiter reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Hits recorded for `key` in its current window.
    ///
    /// Returns `None` if the key has never been seen (or was evicted).
    pub fn hits(&self, key: &str) -> Option<u64> {
        self.store.get(key).map(|entry| entry.hits)
    }

    /// Snapshot of the counter entry for `key`.
    pub fn entry(&self, key: &str) -> Option<CounterEntry> {
        self.store.get(key)
    }

    /// Get the number of tracked keys.
    pub fn counter_count(&self) -> usize {
        self.store.len()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if !tasks.is_empty() {
            debug!(tasks = tasks.len(), "Stopping rate limiter background tasks");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl<C> Drop for RateLimiter<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C> std::fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("keys", &self.store.len())
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct TestOp {
        addr: String,
        path: String,
        headers: HashMap<String, String>,
        status: Option<u16>,
        body: Option<String>,
    }

    impl TestOp {
        fn new(addr: &str) -> Self {
            Self {
                addr: addr.to_string(),
                path: "/".to_string(),
                ..Self::default()
            }
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }
    }

    impl OperationContext for TestOp {
        fn remote_key(&self) -> String {
            self.addr.clone()
        }

        fn set_header(&mut self, name: &str, value: String) {
            self.headers.insert(name.to_string(), value);
        }

        fn respond(&mut self, status: u16, body: &str) {
            self.status = Some(status);
            self.body = Some(body.to_string());
        }
    }

    fn detached(max_hits: u64, window: u64, clock: &ManualClock) -> RateLimiter<TestOp> {
        let policy = Policy::new()
            .with_max_hits(max_hits)
            .with_window_seconds(window);
        RateLimiter::detached(policy, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_default_construction() {
        let limiter: RateLimiter<TestOp> = RateLimiter::new(Policy::default());

        assert_eq!(limiter.policy().window_seconds(), 60);
        assert_eq!(limiter.policy().max_hits(), 10);
        assert_eq!(limiter.policy().status_code(), 429);
        assert_eq!(limiter.counter_count(), 0);
        assert_eq!(limiter.tasks.lock().len(), 2);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let clock = ManualClock::new(1000);
        let limiter = detached(3, 60, &clock);

        for expected_remaining in [2, 1, 0] {
            let mut op = TestOp::new("10.0.0.1");
            let decision = limiter.evaluate(&mut op);
            assert_eq!(decision.quota().map(|q| q.remaining), Some(expected_remaining));
            clock.advance(10);
        }

        let mut op = TestOp::new("10.0.0.1");
        let decision = limiter.evaluate(&mut op);
        assert!(decision.is_rejected());
        assert_eq!(decision.rejection().map(|r| r.retry_after), Some(30));
        assert_eq!(op.header("Retry-After"), Some("30"));
        assert_eq!(op.status, Some(429));
        assert_eq!(
            op.body.as_deref(),
            Some("Too many requests, please try again later.")
        );
    }

    #[test]
    fn test_admitted_operation_gets_headers() {
        let clock = ManualClock::new(1000);
        let limiter = detached(5, 60, &clock);

        let mut op = TestOp::new("10.0.0.1");
        limiter.evaluate(&mut op);
        clock.advance(15);
        let mut op = TestOp::new("10.0.0.1");
        let decision = limiter.evaluate(&mut op);

        assert_eq!(
            decision,
            Decision::Admitted(Quota {
                limit: 5,
                remaining: 3,
                reset: 45
            })
        );
        assert_eq!(op.header("X-RateLimit-Limit"), Some("5"));
        assert_eq!(op.header("X-RateLimit-Remaining"), Some("3"));
        assert_eq!(op.header("X-RateLimit-Reset"), Some("45"));
        assert_eq!(op.header("Retry-After"), None);
        assert_eq!(op.status, None);
    }

    #[test]
    fn test_admits_exactly_max_hits() {
        let clock = ManualClock::new(1000);
        let limiter = detached(10, 60, &clock);

        let admitted = (0..25)
            .filter(|_| limiter.check("key").should_proceed())
            .count();

        assert_eq!(admitted, 10);
        assert_eq!(limiter.hits("key"), Some(25));
    }

    #[test]
    fn test_rejections_keep_counting() {
        let clock = ManualClock::new(1000);
        let limiter = detached(1, 60, &clock);

        limiter.check("key");
        limiter.check("key");
        limiter.check("key");

        assert_eq!(limiter.hits("key"), Some(3));
        assert!(limiter.check("key").is_rejected());
    }

    #[test]
    fn test_window_resets_after_sweep() {
        let clock = ManualClock::new(1000);
        let limiter = detached(3, 60, &clock);

        for _ in 0..4 {
            limiter.check("key");
        }
        clock.advance(60);

        assert_eq!(limiter.sweep().reset, 1);
        assert_eq!(limiter.hits("key"), Some(0));

        let decision = limiter.check("key");
        assert_eq!(
            decision.quota(),
            Some(&Quota {
                limit: 3,
                remaining: 2,
                reset: 60
            })
        );
    }

    #[test]
    fn test_window_rolls_over_without_sweep() {
        let clock = ManualClock::new(1000);
        let limiter = detached(2, 60, &clock);

        for _ in 0..3 {
            limiter.check("key");
        }
        clock.advance(75);

        let decision = limiter.check("key");
        assert_eq!(decision.quota().map(|q| q.remaining), Some(1));
        assert_eq!(
            limiter.entry("key"),
            Some(CounterEntry {
                hits: 1,
                window_end: 1135
            })
        );
    }

    #[test]
    fn test_bypass_leaves_counters_untouched() {
        let clock = ManualClock::new(1000);
        let policy = Policy::new()
            .with_max_hits(2)
            .with_bypass(|op: &TestOp| op.path.starts_with("/health"));
        let limiter = RateLimiter::detached(policy, Arc::new(clock));

        for _ in 0..5 {
            limiter.evaluate(&mut TestOp::new("10.0.0.1"));
        }
        assert_eq!(limiter.hits("10.0.0.1"), Some(5));

        let mut op = TestOp::new("10.0.0.1");
        op.path = "/health".to_string();
        let decision = limiter.evaluate(&mut op);

        assert_eq!(decision, Decision::Bypassed);
        assert!(decision.should_proceed());
        assert!(op.headers.is_empty());
        assert_eq!(op.status, None);
        assert_eq!(limiter.hits("10.0.0.1"), Some(5));
    }

    #[test]
    fn test_custom_key_fn() {
        let clock = ManualClock::new(1000);
        let policy = Policy::new()
            .with_max_hits(1)
            .with_key_fn(|op: &TestOp| format!("path:{}", op.path));
        let limiter = RateLimiter::detached(policy, Arc::new(clock));

        assert!(limiter.evaluate(&mut TestOp::new("10.0.0.1")).should_proceed());
        assert!(limiter.evaluate(&mut TestOp::new("10.0.0.2")).is_rejected());
        assert_eq!(limiter.hits("path:/"), Some(2));
        assert_eq!(limiter.hits("10.0.0.1"), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::new(1000);
        let limiter = detached(2, 60, &clock);

        for _ in 0..5 {
            limiter.check("a");
        }
        clock.advance(20);

        let decision = limiter.check("b");
        assert_eq!(
            decision.quota(),
            Some(&Quota {
                limit: 2,
                remaining: 1,
                reset: 60
            })
        );
        assert_eq!(limiter.entry("a").map(|e| e.window_end), Some(1060));
    }

    #[test]
    fn test_concurrent_hits_within_limit() {
        let clock = ManualClock::new(1000);
        let limiter = detached(100, 60, &clock);

        std::thread::scope(|scope| {
            for _ in 0..50 {
                scope.spawn(|| {
                    assert!(limiter.check("shared").should_proceed());
                });
            }
        });

        assert_eq!(limiter.hits("shared"), Some(50));
    }

    #[test]
    fn test_concurrent_hits_admit_no_more_than_limit() {
        let clock = ManualClock::new(1000);
        let limiter = detached(100, 60, &clock);

        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..50)
                            .filter(|_| limiter.check("shared").should_proceed())
                            .count()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .sum::<usize>()
        });

        assert_eq!(admitted, 100);
        assert_eq!(limiter.hits("shared"), Some(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_rolls_idle_keys() {
        let clock = ManualClock::new(1000);
        let policy = Policy::new().with_max_hits(3).with_window_seconds(5);
        let limiter: RateLimiter<TestOp> =
            RateLimiter::with_clock(policy, Arc::new(clock.clone()));

        for _ in 0..3 {
            limiter.check("idle");
        }
        clock.advance(5);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(limiter.entry("idle"), Some(CounterEntry::default()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let limiter: RateLimiter<TestOp> = RateLimiter::new(Policy::default());
        limiter.shutdown();

        assert!(limiter.tasks.lock().is_empty());
        assert!(limiter.check("key").should_proceed());
    }
}
