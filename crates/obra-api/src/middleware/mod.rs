//! # HTTP Middleware
//!
//! - `metrics` counts requests and errors for `/metrics`.
//! - `csrf` enforces the double-submit token on unsafe authenticated calls.
//! - `brute_force` is the login throttle consulted by the login handler.

pub mod brute_force;
pub mod csrf;
pub mod metrics;
