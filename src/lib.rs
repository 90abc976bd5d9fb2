pub mod analytics;
pub mod cache;
pub mod config;
pub mod data;
pub mod fetch;
pub mod sources;

// Re-export commonly used types
pub use analytics::{IVTermResult, PositioningResult, TermStructureRegime};
pub use cache::{CacheError, OiHistoryCache};
pub use config::{AppConfig, ConfigError};
pub use data::{ContractSnapshot, OptionContract, OptionSide, ProviderError, ProviderKind, QuoteProvider};
pub use fetch::RateLimiter;
pub use sources::{ProviderRegistry, SourceOrchestrator};
