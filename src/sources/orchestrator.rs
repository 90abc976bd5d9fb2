//! Primary/fallback routing across providers.
//!
//! Each capability belongs to a group with its own (primary, fallback)
//! pair. Disabled providers are skipped. A provider that errors or comes
//! back empty hands over to the fallback when `auto_fallback` is set.
//! Individual provider errors are logged here and never surfaced; callers
//! only see a value or `None`.

use std::future::Future;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::engine::ProviderAnalytics;
use super::registry::ProviderRegistry;
use crate::analytics::{IVTermResult, PositioningResult};
use crate::config::{AppConfig, ConfigError, SourceRouting};
use crate::data::{ExpiryChains, ProviderError, ProviderKind, UnderlyingQuote};

/// Capability groups with independent routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityGroup {
    OptionsData,
    MarketData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    OptionChain,
    IvTermStructure,
    Positioning,
    MarketQuotes,
}

impl Capability {
    pub fn group(&self) -> CapabilityGroup {
        match self {
            Self::OptionChain | Self::IvTermStructure | Self::Positioning => CapabilityGroup::OptionsData,
            Self::MarketQuotes => CapabilityGroup::MarketData,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptionChain => "option_chain",
            Self::IvTermStructure => "iv_term_structure",
            Self::Positioning => "positioning",
            Self::MarketQuotes => "market_quotes",
        }
    }
}

/// Resolved routing for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub primary: ProviderKind,
    pub fallback: Option<ProviderKind>,
    pub auto_fallback: bool,
}

impl Route {
    pub fn new(primary: ProviderKind, fallback: Option<ProviderKind>) -> Self {
        Self {
            primary,
            fallback,
            auto_fallback: true,
        }
    }

    pub fn with_auto_fallback(mut self, auto_fallback: bool) -> Self {
        self.auto_fallback = auto_fallback;
        self
    }

    pub fn from_routing(routing: &SourceRouting) -> Result<Self, ConfigError> {
        let primary = routing
            .primary_kind()
            .ok_or_else(|| ConfigError::Invalid(format!("unknown provider '{}'", routing.primary)))?;
        Ok(Self {
            primary,
            fallback: routing.fallback_kind(),
            auto_fallback: routing.auto_fallback,
        })
    }

    /// Providers to try, in order.
    fn candidates(&self) -> Vec<ProviderKind> {
        let mut kinds = vec![self.primary];
        if self.auto_fallback {
            if let Some(fallback) = self.fallback.filter(|f| *f != self.primary) {
                kinds.push(fallback);
            }
        }
        kinds
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub enabled: bool,
}

/// Routing table plus each registered provider's enabled flag.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub options_data: Route,
    pub market_data: Route,
    pub providers: Vec<ProviderStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub provider: ProviderKind,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Routes analytics requests to providers.
pub struct SourceOrchestrator {
    registry: ProviderRegistry,
    options_data: Route,
    market_data: Route,
}

impl SourceOrchestrator {
    pub fn new(registry: ProviderRegistry, options_data: Route, market_data: Route) -> Self {
        Self {
            registry,
            options_data,
            market_data,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            ProviderRegistry::from_config(config),
            Route::from_routing(&config.data_sources.options_data)?,
            Route::from_routing(&config.data_sources.market_data)?,
        ))
    }

    pub fn route(&self, group: CapabilityGroup) -> &Route {
        match group {
            CapabilityGroup::OptionsData => &self.options_data,
            CapabilityGroup::MarketData => &self.market_data,
        }
    }

    async fn resolve<'a, T, F, Fut>(&'a self, capability: Capability, subject: &str, call: F) -> Option<T>
    where
        F: Fn(&'a ProviderAnalytics) -> Fut,
        Fut: Future<Output = Result<Option<T>, ProviderError>>,
    {
        let route = self.route(capability.group());

        for kind in route.candidates() {
            let Some(entry) = self.registry.get(kind) else {
                warn!(capability = capability.as_str(), subject, provider = %kind, outcome = "unregistered", "Provider not registered");
                continue;
            };
            if !entry.enabled {
                info!(capability = capability.as_str(), subject, provider = %kind, outcome = "disabled", "Skipping disabled provider");
                continue;
            }

            let started = Instant::now();
            let outcome = call(&entry.analytics).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(Some(value)) => {
                    info!(capability = capability.as_str(), subject, provider = %kind, outcome = "success", elapsed_ms, "Resolved");
                    return Some(value);
                }
                Ok(None) => {
                    info!(capability = capability.as_str(), subject, provider = %kind, outcome = "empty", elapsed_ms, "No data");
                }
                Err(e) => {
                    warn!(capability = capability.as_str(), subject, provider = %kind, outcome = "error", elapsed_ms, error = %e, "Provider failed");
                }
            }
        }

        warn!(capability = capability.as_str(), subject, "Unavailable from every configured provider");
        None
    }

    pub async fn get_option_chain(&self, symbol: &str) -> Option<ExpiryChains> {
        self.get_option_chain_as_of(symbol, Local::now().date_naive()).await
    }

    pub async fn get_option_chain_as_of(&self, symbol: &str, today: NaiveDate) -> Option<ExpiryChains> {
        self.resolve(Capability::OptionChain, symbol, |p| p.option_chain(symbol, today))
            .await
    }

    pub async fn get_market_quotes(&self, symbols: &[String]) -> Option<Vec<UnderlyingQuote>> {
        let subject = symbols.join(",");
        self.resolve(Capability::MarketQuotes, &subject, |p| p.market_quotes(symbols))
            .await
    }

    /// Underlying price through the market data group, best effort.
    pub async fn underlying_price(&self, symbol: &str) -> Option<Decimal> {
        let quotes = self.get_market_quotes(&[symbol.to_string()]).await?;
        quotes
            .into_iter()
            .find(|q| q.symbol.eq_ignore_ascii_case(symbol))
            .map(|q| q.price)
    }

    pub async fn get_iv_term_structure(&self, symbol: &str) -> Option<IVTermResult> {
        self.get_iv_term_structure_as_of(symbol, Local::now().date_naive())
            .await
    }

    /// The underlying price, when available, is the ATM strike fallback.
    pub async fn get_iv_term_structure_as_of(&self, symbol: &str, today: NaiveDate) -> Option<IVTermResult> {
        let reference_price = self.underlying_price(symbol).await;
        debug!(symbol, reference_price = ?reference_price, "reference price for ATM fallback");

        self.resolve(Capability::IvTermStructure, symbol, |p| {
            p.iv_term_structure_as_of(symbol, today, reference_price)
        })
        .await
    }

    pub async fn get_positioning(&self, symbol: &str) -> Option<PositioningResult> {
        self.get_positioning_as_of(symbol, Local::now().date_naive()).await
    }

    pub async fn get_positioning_as_of(&self, symbol: &str, today: NaiveDate) -> Option<PositioningResult> {
        self.resolve(Capability::Positioning, symbol, |p| p.positioning_as_of(symbol, today))
            .await
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            options_data: self.options_data,
            market_data: self.market_data,
            providers: self
                .registry
                .iter()
                .map(|(provider, entry)| ProviderStatus {
                    provider,
                    enabled: entry.enabled,
                })
                .collect(),
        }
    }

    /// `connect` on every enabled provider.
    pub async fn test_connections(&self) -> Vec<ConnectionReport> {
        let mut reports = Vec::new();
        for (provider, entry) in self.registry.iter().filter(|(_, e)| e.enabled) {
            let report = match entry.analytics.connect().await {
                Ok(()) => ConnectionReport {
                    provider,
                    connected: true,
                    error: None,
                },
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Connection test failed");
                    ConnectionReport {
                        provider,
                        connected: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}
