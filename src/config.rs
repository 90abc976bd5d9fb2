//! Application configuration.
//!
//! Loaded from TOML. Every section has defaults, so a partial file (or no
//! file at all) is valid. API tokens are never stored in the file; each
//! provider names the environment variable holding its token.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::data::ProviderKind;
use crate::fetch::ChainWindowConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_sources: DataSourcesConfig,
    pub providers: ProvidersConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
}

/// Provider routing per capability group. Keys missing from a group's
/// section keep that group's default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourcesConfig {
    /// Chains, IV term structure, positioning.
    #[serde(deserialize_with = "options_routing")]
    pub options_data: SourceRouting,
    /// Underlying quotes.
    #[serde(deserialize_with = "market_routing")]
    pub market_data: SourceRouting,
}

impl Default for DataSourcesConfig {
    fn default() -> Self {
        Self {
            options_data: SourceRouting::new(ProviderKind::Orats, Some(ProviderKind::Tradier)),
            market_data: SourceRouting::new(ProviderKind::Tradier, Some(ProviderKind::Orats)),
        }
    }
}

/// Primary/fallback pair for one capability group.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRouting {
    pub primary: String,
    /// Blank means no fallback.
    pub fallback: Option<String>,
    pub auto_fallback: bool,
}

/// A routing section as written; every key optional.
#[derive(Debug, Default, Deserialize)]
struct RoutingOverrides {
    primary: Option<String>,
    fallback: Option<String>,
    auto_fallback: Option<bool>,
}

impl RoutingOverrides {
    fn apply(self, base: SourceRouting) -> SourceRouting {
        SourceRouting {
            primary: self.primary.unwrap_or(base.primary),
            fallback: self.fallback.or(base.fallback),
            auto_fallback: self.auto_fallback.unwrap_or(base.auto_fallback),
        }
    }
}

fn options_routing<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SourceRouting, D::Error> {
    Ok(RoutingOverrides::deserialize(deserializer)?.apply(DataSourcesConfig::default().options_data))
}

fn market_routing<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SourceRouting, D::Error> {
    Ok(RoutingOverrides::deserialize(deserializer)?.apply(DataSourcesConfig::default().market_data))
}

fn default_true() -> bool {
    true
}

impl SourceRouting {
    pub fn new(primary: ProviderKind, fallback: Option<ProviderKind>) -> Self {
        Self {
            primary: primary.as_str().to_string(),
            fallback: fallback.map(|k| k.as_str().to_string()),
            auto_fallback: true,
        }
    }

    pub fn primary_kind(&self) -> Option<ProviderKind> {
        ProviderKind::from_str(&self.primary)
    }

    /// Unknown or blank fallback labels mean no fallback.
    pub fn fallback_kind(&self) -> Option<ProviderKind> {
        self.fallback.as_deref().and_then(ProviderKind::from_str)
    }
}

/// Sliding-window quota for one provider capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuota {
    pub max_calls_per_period: usize,
    pub period_seconds: u64,
}

impl RateQuota {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}

fn default_chain_rate() -> RateQuota {
    RateQuota {
        max_calls_per_period: 10,
        period_seconds: 30,
    }
}

fn default_snapshot_rate() -> RateQuota {
    RateQuota {
        max_calls_per_period: 60,
        period_seconds: 30,
    }
}

/// Per-provider settings. Unset URL, token variable and batch size fall
/// back to the provider's own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_chain_rate")]
    pub chain_rate: RateQuota,
    #[serde(default = "default_snapshot_rate")]
    pub snapshot_rate: RateQuota,
    #[serde(default)]
    pub max_batch_size: Option<usize>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            token_env: None,
            chain_rate: default_chain_rate(),
            snapshot_rate: default_snapshot_rate(),
            max_batch_size: None,
        }
    }
}

impl ProviderConfig {
    /// Environment variable holding the token for `kind`.
    pub fn token_env_for(&self, kind: ProviderKind) -> String {
        self.token_env.clone().unwrap_or_else(|| match kind {
            ProviderKind::Orats => "ORATS_API_KEY".to_string(),
            ProviderKind::Tradier => "TRADIER_API_KEY".to_string(),
        })
    }

    /// Token from the environment; empty when unset.
    pub fn token(&self, kind: ProviderKind) -> String {
        std::env::var(self.token_env_for(kind)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub orats: ProviderConfig,
    pub tradier: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Orats => &self.orats,
            ProviderKind::Tradier => &self.tradier,
        }
    }
}

/// Fetch and aggregation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Forward horizon for term structure chains.
    pub horizon_days: i64,
    /// Date span per chain call.
    pub window_days: i64,
    /// Forward horizon for positioning chains.
    pub positioning_horizon_days: i64,
    pub max_rate_limit_retries: u32,
    pub oi_cache_path: String,
    pub oi_retention_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            horizon_days: 120,
            window_days: 30,
            positioning_horizon_days: 90,
            max_rate_limit_retries: 2,
            oi_cache_path: "oi_cache.json".to_string(),
            oi_retention_days: 7,
        }
    }
}

impl AnalyticsConfig {
    pub fn term_windows(&self) -> ChainWindowConfig {
        ChainWindowConfig {
            horizon_days: self.horizon_days,
            window_days: self.window_days,
            max_rate_limit_retries: self.max_rate_limit_retries,
        }
    }

    pub fn positioning_windows(&self) -> ChainWindowConfig {
        ChainWindowConfig {
            horizon_days: self.positioning_horizon_days,
            ..self.term_windows()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (group, routing) in [
            ("options_data", &self.data_sources.options_data),
            ("market_data", &self.data_sources.market_data),
        ] {
            if routing.primary_kind().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "data_sources.{}.primary: unknown provider '{}'",
                    group, routing.primary
                )));
            }
            if let Some(fallback) = routing.fallback.as_deref().filter(|f| !f.trim().is_empty()) {
                if ProviderKind::from_str(fallback).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "data_sources.{}.fallback: unknown provider '{}'",
                        group, fallback
                    )));
                }
            }
        }

        for kind in ProviderKind::ALL {
            let provider = self.providers.get(kind);
            for (name, quota) in [("chain_rate", provider.chain_rate), ("snapshot_rate", provider.snapshot_rate)] {
                if quota.max_calls_per_period == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "providers.{}.{}.max_calls_per_period must be at least 1",
                        kind, name
                    )));
                }
                if quota.period_seconds == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "providers.{}.{}.period_seconds must be positive",
                        kind, name
                    )));
                }
            }
            if provider.max_batch_size == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "providers.{}.max_batch_size must be at least 1",
                    kind
                )));
            }
        }

        let analytics = &self.analytics;
        if analytics.window_days < 1 {
            return Err(ConfigError::Invalid("analytics.window_days must be at least 1".into()));
        }
        if analytics.horizon_days < 0 || analytics.positioning_horizon_days < 0 {
            return Err(ConfigError::Invalid("analytics horizons must not be negative".into()));
        }
        if analytics.oi_retention_days < 1 {
            return Err(ConfigError::Invalid("analytics.oi_retention_days must be at least 1".into()));
        }

        Ok(())
    }
}
