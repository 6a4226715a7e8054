//! Network access for cache misses and manifest population.
//!
//! This module provides the `Network` trait the cache manager fetches
//! through, and `HttpNetwork`, its `reqwest`-backed implementation that
//! classifies responses as same-origin (`basic`) or cross-origin (`cors`).

pub mod client;
pub mod error;

pub use client::{HttpNetwork, Network};
pub use error::NetworkError;
