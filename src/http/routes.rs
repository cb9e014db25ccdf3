//! Demo routes served behind the limiter.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use super::middleware::{rate_limit, HttpRateLimiter};

/// Body of the index route.
pub const GREETING: &str = "Hello tester!";

/// Build the demo router with every route guarded by `limiter`.
pub fn router(limiter: Arc<HttpRateLimiter>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit))
}

async fn index() -> &'static str {
    GREETING
}

async fn health() -> &'static str {
    "ok"
}
