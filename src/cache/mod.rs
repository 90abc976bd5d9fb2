//! Persistent state: rolling daily open-interest totals.

pub mod oi_history;
pub mod store;

pub use oi_history::{OiHistoryCache, DEFAULT_RETENTION_DAYS};
pub use store::{CacheError, DatedValues, JsonFileStore, KeyedPersistentStore, MemoryStore};
