//! Tollgate - Fixed-Window Rate Limiting Guard
//!
//! This crate implements an in-process admission control component that caps
//! how many operations each caller may perform per time window. It sits in
//! front of an arbitrary request pipeline through the
//! [`OperationContext`](ratelimit::OperationContext) trait, and ships an axum
//! middleware as the HTTP host adapter.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
