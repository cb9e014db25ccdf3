//! Axum middleware that guards a router with a [`RateLimiter`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::context::HttpOperation;
use crate::ratelimit::{Decision, RateLimiter};

/// A limiter evaluating axum requests.
pub type HttpRateLimiter = RateLimiter<HttpOperation>;

/// Rate limiting middleware.
///
/// Install with `axum::middleware::from_fn_with_state(limiter, rate_limit)`.
/// Admitted and bypassed requests reach the inner service; rejected requests
/// are answered directly.
pub async fn rate_limit(
    State(limiter): State<Arc<HttpRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let mut op = HttpOperation::new(request);

    match limiter.evaluate(&mut op) {
        Decision::Rejected(rejection) => {
            debug!(
                path = %op.path(),
                status = rejection.status_code,
                retry_after = rejection.retry_after,
                "Rate limit exceeded"
            );
            op.into_rejection_response(rejection.status_code)
        }
        Decision::Admitted(_) | Decision::Bypassed => {
            let (request, headers) = op.into_parts();
            let mut response = next.run(request).await;
            response.headers_mut().extend(headers);
            response
        }
    }
}
