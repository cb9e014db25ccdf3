//! [`OperationContext`] over an axum request.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::ratelimit::OperationContext;

/// Key used when the peer address is not available.
pub const UNKNOWN_KEY: &str = "unknown";

/// One HTTP request passing through the limiter.
///
/// Headers set by the limiter are collected here and copied onto whichever
/// response is finally sent.
#[derive(Debug)]
pub struct HttpOperation {
    request: Request,
    headers: HeaderMap,
    response: Option<(StatusCode, String)>,
}

impl HttpOperation {
    /// Wrap an incoming request.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            headers: HeaderMap::new(),
            response: None,
        }
    }

    /// The wrapped request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request path.
    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// The peer address, when the server was started with connect info.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
    }

    /// Headers to be added to the response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Split into the request and the headers to add to its response.
    pub fn into_parts(self) -> (Request, HeaderMap) {
        (self.request, self.headers)
    }

    /// Build the response for a rejected request.
    ///
    /// Uses whatever the reject handler wrote, or `fallback` with an empty
    /// body if it wrote nothing.
    pub fn into_rejection_response(self, fallback: u16) -> Response {
        let (status, body) = self.response.unwrap_or_else(|| {
            (
                StatusCode::from_u16(fallback).unwrap_or(StatusCode::TOO_MANY_REQUESTS),
                String::new(),
            )
        });

        let mut response = (status, body).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

impl OperationContext for HttpOperation {
    fn remote_key(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_KEY.to_string())
    }

    fn set_header(&mut self, name: &str, value: String) {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                warn!(header = %name, "Dropping invalid header name");
                return;
            }
        };

        match HeaderValue::try_from(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "Dropping invalid header value"),
        }
    }

    fn respond(&mut self, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        self.response = Some((status, body.to_string()));
    }
}

/// Key a request by the client address a proxy reported.
///
/// Takes the first hop of `X-Forwarded-For`, then `X-Real-IP`, then falls back
/// to the peer address.
pub fn forwarded_for_key(op: &HttpOperation) -> String {
    let headers = op.request().headers();

    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first) = value.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    op.remote_key()
}

/// Bypass predicate matching requests whose path starts with any of `prefixes`.
pub fn path_prefix_bypass(
    prefixes: Vec<String>,
) -> impl Fn(&HttpOperation) -> bool + Send + Sync + 'static {
    move |op: &HttpOperation| {
        let path = op.path();
        prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}
