//! HTTP host adapter for the rate limiter.

mod context;
mod middleware;
mod routes;

pub use context::{forwarded_for_key, path_prefix_bypass, HttpOperation, UNKNOWN_KEY};
pub use middleware::{rate_limit, HttpRateLimiter};
pub use routes::{router, GREETING};

use crate::config::{KeySource, LimiterConfig};
use crate::ratelimit::Policy;

/// Build an HTTP policy from configuration, including key source and bypass paths.
pub fn policy_from_config(config: &LimiterConfig) -> Policy<HttpOperation> {
    let mut policy = Policy::from_config(config);

    if config.key_source == KeySource::ForwardedFor {
        policy = policy.with_key_fn(forwarded_for_key);
    }

    if !config.bypass_paths.is_empty() {
        policy = policy.with_bypass(path_prefix_bypass(config.bypass_paths.clone()));
    }

    policy
}
