//! Turnstile - Multi-policy HTTP Admission Control
//!
//! This crate gates inbound HTTP requests with several independently
//! configured fixed-window rate limits (by IP, user, tenant and operation).
//! Counters live in a shared Redis store so every server instance enforces
//! the same quotas, and an administrative bulk reset clears them by the same
//! key prefixes the policies write.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod reset;
pub mod store;
