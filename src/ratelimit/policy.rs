//! Resolved limiter settings.
//!
//! A [`Policy`] is built once and shared read-only by every evaluation.
//! Construction never fails: zero or negative numbers fall back to defaults.

use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::context::OperationContext;
use super::decision::Rejection;
use crate::config::LimiterConfig;

/// Default window length.
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
/// Default hits per key per window.
pub const DEFAULT_MAX_HITS: u64 = 10;
/// Default rejection status (429 Too Many Requests).
pub const DEFAULT_STATUS_CODE: u16 = 429;
/// Default rejection body.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Derives the counting key from an operation.
pub type KeyFn<C> = Arc<dyn Fn(&C) -> String + Send + Sync>;
/// Returns `true` for operations that skip limiting.
pub type BypassFn<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;
/// Writes the response for a rejected operation.
pub type RejectFn<C> = Arc<dyn Fn(&mut C, &Rejection) + Send + Sync>;

/// Settings for a [`RateLimiter`](super::RateLimiter).
pub struct Policy<C> {
    window_seconds: u64,
    max_hits: u64,
    status_code: u16,
    message: Arc<str>,
    evict_expired: bool,
    key_fn: KeyFn<C>,
    bypass_fn: Option<BypassFn<C>>,
    on_reject: RejectFn<C>,
}

impl<C: OperationContext + 'static> Policy<C> {
    /// Create a policy with every setting at its default.
    pub fn new() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            max_hits: DEFAULT_MAX_HITS,
            status_code: DEFAULT_STATUS_CODE,
            message: Arc::from(DEFAULT_MESSAGE),
            evict_expired: false,
            key_fn: Arc::new(|op: &C| op.remote_key()),
            bypass_fn: None,
            on_reject: Arc::new(|op: &mut C, rejection: &Rejection| {
                op.respond(rejection.status_code, &rejection.message)
            }),
        }
    }

    /// Build a policy from file configuration, correcting anomalies.
    pub fn from_config(config: &LimiterConfig) -> Self {
        let mut policy = Self::new()
            .with_window_seconds(positive_or_default(
                "window_seconds",
                config.window_seconds,
                DEFAULT_WINDOW_SECONDS,
            ))
            .with_max_hits(positive_or_default(
                "max_hits",
                config.max_hits,
                DEFAULT_MAX_HITS,
            ))
            .with_evict_expired(config.evict_expired);

        policy.status_code = status_or_default(config.status_code);
        if !config.message.is_empty() {
            policy.message = Arc::from(config.message.as_str());
        }
        policy
    }
}

impl<C> Policy<C> {
    /// Set the window length. Zero keeps the default.
    pub fn with_window_seconds(mut self, secs: u64) -> Self {
        self.window_seconds = if secs == 0 {
            DEFAULT_WINDOW_SECONDS
        } else {
            secs
        };
        self
    }

    /// Set the hits permitted per window. Zero keeps the default.
    pub fn with_max_hits(mut self, max_hits: u64) -> Self {
        self.max_hits = if max_hits == 0 {
            DEFAULT_MAX_HITS
        } else {
            max_hits
        };
        self
    }

    /// Set the rejection status. Values outside 100..=599 keep the default.
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_or_default(i64::from(status_code));
        self
    }

    /// Set the rejection body. An empty message keeps the default.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.is_empty() {
            self.message = Arc::from(message);
        }
        self
    }

    /// Derive keys with `key_fn` instead of the caller's address.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&C) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Skip limiting entirely for operations matching `bypass_fn`.
    pub fn with_bypass<F>(mut self, bypass_fn: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.bypass_fn = Some(Arc::new(bypass_fn));
        self
    }

    /// Replace the default rejection response.
    pub fn with_on_reject<F>(mut self, on_reject: F) -> Self
    where
        F: Fn(&mut C, &Rejection) + Send + Sync + 'static,
    {
        self.on_reject = Arc::new(on_reject);
        self
    }

    /// Remove expired entries on sweep instead of zeroing them.
    pub fn with_evict_expired(mut self, evict: bool) -> Self {
        self.evict_expired = evict;
        self
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Hits permitted per key per window.
    pub fn max_hits(&self) -> u64 {
        self.max_hits
    }

    /// Status sent on rejection.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Body sent on rejection.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether sweeps remove expired entries.
    pub fn evict_expired(&self) -> bool {
        self.evict_expired
    }

    /// Whether a bypass predicate is configured.
    pub fn has_bypass(&self) -> bool {
        self.bypass_fn.is_some()
    }

    pub(crate) fn key_for(&self, op: &C) -> String {
        (self.key_fn)(op)
    }

    pub(crate) fn bypasses(&self, op: &C) -> bool {
        self.bypass_fn.as_ref().is_some_and(|bypass| bypass(op))
    }

    pub(crate) fn reject(&self, op: &mut C, rejection: &Rejection) {
        (self.on_reject)(op, rejection)
    }

    pub(crate) fn rejection(&self, retry_after: u64) -> Rejection {
        Rejection {
            status_code: self.status_code,
            message: Arc::clone(&self.message),
            retry_after,
        }
    }
}

impl<C: OperationContext + 'static> Default for Policy<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for Policy<C> {
    fn clone(&self) -> Self {
        Self {
            window_seconds: self.window_seconds,
            max_hits: self.max_hits,
            status_code: self.status_code,
            message: Arc::clone(&self.message),
            evict_expired: self.evict_expired,
            key_fn: Arc::clone(&self.key_fn),
            bypass_fn: self.bypass_fn.clone(),
            on_reject: Arc::clone(&self.on_reject),
        }
    }
}

impl<C> fmt::Debug for Policy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("window_seconds", &self.window_seconds)
            .field("max_hits", &self.max_hits)
            .field("status_code", &self.status_code)
            .field("message", &self.message)
            .field("evict_expired", &self.evict_expired)
            .field("bypass", &self.bypass_fn.is_some())
            .finish_non_exhaustive()
    }
}

fn positive_or_default(field: &str, value: i64, default: u64) -> u64 {
    match u64::try_from(value) {
        Ok(value) if value > 0 => value,
        _ => {
            warn!(field, value, default, "Invalid limiter setting, using default");
            default
        }
    }
}

fn status_or_default(value: i64) -> u16 {
    match u16::try_from(value) {
        Ok(status) if (100..=599).contains(&status) => status,
        _ => {
            warn!(
                value,
                default = DEFAULT_STATUS_CODE,
                "Invalid rejection status code, using default"
            );
            DEFAULT_STATUS_CODE
        }
    }
}
