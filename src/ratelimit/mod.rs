//! Rate limiting logic and state management.

mod clock;
mod context;
mod decision;
mod limiter;
mod policy;
mod store;
mod sweeper;

pub use clock::{unix_now, CachedClock, Clock, ManualClock, REFRESH_INTERVAL};
pub use context::OperationContext;
pub use decision::{
    Decision, Quota, Rejection, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use limiter::RateLimiter;
pub use policy::{
    BypassFn, KeyFn, Policy, RejectFn, DEFAULT_MAX_HITS, DEFAULT_MESSAGE, DEFAULT_STATUS_CODE,
    DEFAULT_WINDOW_SECONDS,
};
pub use store::{CounterEntry, CounterStore, SweepStats};
pub use sweeper::spawn_sweeper;
