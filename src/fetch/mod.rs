//! Rate-limited retrieval from quote providers.
//!
//! Provides:
//! - Sliding-window rate limiting per provider capability
//! - Windowed chain enumeration with quota-aware retries
//! - Batched snapshot retrieval

pub mod chain;
pub mod rate_limiter;
pub mod snapshot;

pub use chain::{date_windows, ChainFetcher, ChainWindowConfig};
pub use rate_limiter::RateLimiter;
pub use snapshot::{contract_ids, SnapshotFetcher};
