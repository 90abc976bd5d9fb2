//! Data source routing.
//!
//! Provides:
//! - Per-provider analytics cycles (chain → snapshots → analytics)
//! - A provider registry built from configuration
//! - Primary/fallback orchestration per capability group

pub mod engine;
pub mod orchestrator;
pub mod registry;

pub use engine::ProviderAnalytics;
pub use orchestrator::{
    Capability, CapabilityGroup, ConnectionReport, ProviderStatus, Route, SourceInfo, SourceOrchestrator,
};
pub use registry::{ProviderRegistry, RegisteredProvider};
