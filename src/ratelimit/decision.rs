//! Outcomes of evaluating an operation.

use std::sync::Arc;

/// Signal carrying the configured hit limit.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Signal carrying the hits left in the current window.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Signal carrying the seconds until the current window closes.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Signal carrying the seconds a rejected caller should wait.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Quota information attached to an admitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Hits permitted per window
    pub limit: u64,
    /// Hits left in the current window
    pub remaining: u64,
    /// Seconds until the current window closes
    pub reset: u64,
}

/// Details of a rejected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status to respond with
    pub status_code: u16,
    /// Body to respond with
    pub message: Arc<str>,
    /// Seconds until the caller's window closes
    pub retry_after: u64,
}

/// Terminal outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The bypass predicate matched; nothing was counted.
    Bypassed,
    /// Within quota; the host should continue its pipeline.
    Admitted(Quota),
    /// Over quota; the host must not continue.
    Rejected(Rejection),
}

impl Decision {
    /// Whether the host should run its downstream processing.
    pub fn should_proceed(&self) -> bool {
        !matches!(self, Decision::Rejected(_))
    }

    /// Whether this is a rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Rejected(_))
    }

    /// The quota, if the operation was admitted.
    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Decision::Admitted(quota) => Some(quota),
            _ => None,
        }
    }

    /// The rejection details, if the operation was rejected.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}
