//! Provider lookup table.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::engine::ProviderAnalytics;
use crate::cache::OiHistoryCache;
use crate::config::AppConfig;
use crate::data::{OratsProvider, ProviderKind, QuoteProvider, TradierProvider};

/// A registered provider and whether routing may use it.
pub struct RegisteredProvider {
    pub analytics: ProviderAnalytics,
    pub enabled: bool,
}

/// Providers keyed by [`ProviderKind`].
#[derive(Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<ProviderKind, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both REST providers from configuration, sharing one OI cache.
    pub fn from_config(config: &AppConfig) -> Self {
        let analytics = &config.analytics;
        let cache = Arc::new(
            OiHistoryCache::open(&analytics.oi_cache_path).with_retention_days(analytics.oi_retention_days),
        );

        let mut registry = Self::new();
        for kind in ProviderKind::ALL {
            let provider_config = config.providers.get(kind);
            let token = provider_config.token(kind);
            if token.is_empty() && provider_config.enabled {
                info!(provider = %kind, env = %provider_config.token_env_for(kind), "No API token set");
            }

            let provider: Arc<dyn QuoteProvider> = match kind {
                ProviderKind::Orats => {
                    let mut p = OratsProvider::new(token);
                    if let Some(url) = &provider_config.base_url {
                        p = p.with_base_url(url.as_str());
                    }
                    if let Some(size) = provider_config.max_batch_size {
                        p = p.with_max_batch_size(size);
                    }
                    Arc::new(p)
                }
                ProviderKind::Tradier => {
                    let mut p = TradierProvider::new(token);
                    if let Some(url) = &provider_config.base_url {
                        p = p.with_base_url(url.as_str());
                    }
                    if let Some(size) = provider_config.max_batch_size {
                        p = p.with_max_batch_size(size);
                    }
                    Arc::new(p)
                }
            };

            registry.register(
                ProviderAnalytics::with_config(provider, provider_config, analytics, Arc::clone(&cache)),
                provider_config.enabled,
            );
        }
        registry
    }

    /// Replaces any provider of the same kind.
    pub fn register(&mut self, analytics: ProviderAnalytics, enabled: bool) {
        self.entries.insert(analytics.kind(), RegisteredProvider { analytics, enabled });
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&RegisteredProvider> {
        self.entries.get(&kind)
    }

    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        self.entries.get(&kind).map_or(false, |e| e.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &RegisteredProvider)> {
        self.entries.iter().map(|(kind, entry)| (*kind, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
