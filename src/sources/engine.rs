//! One provider's full fetch-and-analyze cycle.
//!
//! Chain listing always completes before any snapshot call of the same
//! cycle. Empty outcomes (no chain, fewer than two usable expiries, no
//! snapshots) are `Ok(None)`, not errors.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::analytics::{
    chain_open_interest, collect_term_points, AtmSelector, IVTermResult, OiAggregator,
    PositioningResult, TermInterpolator,
};
use crate::cache::OiHistoryCache;
use crate::config::{AnalyticsConfig, ProviderConfig};
use crate::data::{ExpiryChains, ProviderError, ProviderKind, QuoteProvider, SnapshotMap, UnderlyingQuote};
use crate::fetch::{contract_ids, ChainFetcher, ChainWindowConfig, RateLimiter, SnapshotFetcher};

/// A provider with its own chain and snapshot quotas.
pub struct ProviderAnalytics {
    provider: Arc<dyn QuoteProvider>,
    chain_limiter: RateLimiter,
    snapshot_limiter: RateLimiter,
    term_windows: ChainWindowConfig,
    positioning_windows: ChainWindowConfig,
    cache: Arc<OiHistoryCache>,
    selector: AtmSelector,
    interpolator: TermInterpolator,
}

impl ProviderAnalytics {
    /// Default quotas and windows.
    pub fn new(provider: Arc<dyn QuoteProvider>, cache: Arc<OiHistoryCache>) -> Self {
        Self::with_config(provider, &ProviderConfig::default(), &AnalyticsConfig::default(), cache)
    }

    pub fn with_config(
        provider: Arc<dyn QuoteProvider>,
        provider_config: &ProviderConfig,
        analytics: &AnalyticsConfig,
        cache: Arc<OiHistoryCache>,
    ) -> Self {
        let kind = provider.kind();
        let chain = provider_config.chain_rate;
        let snapshot = provider_config.snapshot_rate;
        Self {
            chain_limiter: RateLimiter::new(format!("{}:chain", kind), chain.max_calls_per_period, chain.period()),
            snapshot_limiter: RateLimiter::new(
                format!("{}:snapshot", kind),
                snapshot.max_calls_per_period,
                snapshot.period(),
            ),
            term_windows: analytics.term_windows(),
            positioning_windows: analytics.positioning_windows(),
            provider,
            cache,
            selector: AtmSelector::new(),
            interpolator: TermInterpolator::new(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub async fn connect(&self) -> Result<(), ProviderError> {
        self.provider.connect().await
    }

    async fn fetch_chain(
        &self,
        symbol: &str,
        today: NaiveDate,
        windows: &ChainWindowConfig,
    ) -> Result<ExpiryChains, ProviderError> {
        ChainFetcher::new(self.provider.as_ref(), &self.chain_limiter, windows.clone())
            .fetch(symbol, today)
            .await
    }

    async fn fetch_snapshots(&self, chains: &ExpiryChains) -> SnapshotMap {
        let ids = contract_ids(chains);
        SnapshotFetcher::new(self.provider.as_ref(), &self.snapshot_limiter)
            .fetch(&ids)
            .await
    }

    /// Merged expiry → contracts over the term horizon.
    pub async fn option_chain(&self, symbol: &str, today: NaiveDate) -> Result<Option<ExpiryChains>, ProviderError> {
        self.connect().await?;
        let chains = self.fetch_chain(symbol, today, &self.term_windows).await?;
        Ok((!chains.is_empty()).then_some(chains))
    }

    pub async fn iv_term_structure(
        &self,
        symbol: &str,
        reference_price: Option<Decimal>,
    ) -> Result<Option<IVTermResult>, ProviderError> {
        self.iv_term_structure_as_of(symbol, Local::now().date_naive(), reference_price)
            .await
    }

    /// `reference_price` is only used where no contract of an expiry has
    /// a usable delta.
    pub async fn iv_term_structure_as_of(
        &self,
        symbol: &str,
        today: NaiveDate,
        reference_price: Option<Decimal>,
    ) -> Result<Option<IVTermResult>, ProviderError> {
        self.connect().await?;

        let chains = self.fetch_chain(symbol, today, &self.term_windows).await?;
        if chains.len() < 2 {
            info!(symbol, provider = %self.kind(), expiries = chains.len(), "Not enough expiries for a term structure");
            return Ok(None);
        }

        let snapshots = self.fetch_snapshots(&chains).await;
        let points = collect_term_points(&chains, &snapshots, today, reference_price, &self.selector);
        debug!(symbol, points = points.len(), "term points collected");

        let total_oi = chain_open_interest(&chains, &snapshots);
        let result = self.interpolator.build(symbol, today, points, total_oi);
        if result.is_none() {
            info!(symbol, provider = %self.kind(), "Fewer than two ATM points, term structure unavailable");
        }
        Ok(result)
    }

    pub async fn positioning(&self, symbol: &str) -> Result<Option<PositioningResult>, ProviderError> {
        self.positioning_as_of(symbol, Local::now().date_naive()).await
    }

    /// Records today's total in the OI history as a side effect.
    pub async fn positioning_as_of(
        &self,
        symbol: &str,
        today: NaiveDate,
    ) -> Result<Option<PositioningResult>, ProviderError> {
        self.connect().await?;

        let chains = self.fetch_chain(symbol, today, &self.positioning_windows).await?;
        if chains.is_empty() {
            return Ok(None);
        }

        let snapshots = self.fetch_snapshots(&chains).await;
        if snapshots.is_empty() {
            info!(symbol, provider = %self.kind(), "No snapshots returned, positioning unavailable");
            return Ok(None);
        }

        Ok(Some(OiAggregator::new(&self.cache).aggregate(symbol, &chains, &snapshots, today)))
    }

    pub async fn market_quotes(&self, symbols: &[String]) -> Result<Option<Vec<UnderlyingQuote>>, ProviderError> {
        self.connect().await?;
        self.snapshot_limiter.acquire().await;
        let quotes = self.provider.underlying_quotes(symbols).await?;
        Ok((!quotes.is_empty()).then_some(quotes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::TermStructureRegime;
    use crate::cache::MemoryStore;
    use crate::data::mock::{contract, snapshot, Failure, MockProvider};
    use crate::data::OptionSide;
    use approx::assert_relative_eq;
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn cache() -> Arc<OiHistoryCache> {
        Arc::new(OiHistoryCache::new(Box::new(MemoryStore::new())))
    }

    /// Calls at strike 100 with delta 0.5 on +7, +30 and +90 days.
    fn term_provider() -> MockProvider {
        [(7, 0.20), (30, 0.25), (90, 0.22)]
            .into_iter()
            .fold(MockProvider::new(ProviderKind::Orats), |p, (offset, iv)| {
                let expiry = today() + Duration::days(offset);
                p.with_contract(contract(OptionSide::Call, 100, expiry), snapshot(Some(100), Some(iv), Some(0.5)))
                    .with_contract(contract(OptionSide::Put, 100, expiry), snapshot(Some(50), Some(iv), Some(-0.5)))
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_iv_term_structure_cycle() {
        let provider = Arc::new(term_provider());
        let engine = ProviderAnalytics::new(provider.clone(), cache());

        let result = engine
            .iv_term_structure_as_of("SPY", today(), None)
            .await
            .unwrap()
            .unwrap();

        assert_relative_eq!(result.iv7, 20.0, epsilon = 1e-9);
        assert_relative_eq!(result.iv30, 25.0, epsilon = 1e-9);
        assert_relative_eq!(result.iv60, 23.55, epsilon = 0.01);
        assert_relative_eq!(result.iv90, 22.0, epsilon = 1e-9);
        assert_eq!(result.regime, TermStructureRegime::Backwardation);
        assert_eq!(result.total_open_interest, Some(450));
        assert_eq!(provider.connect_calls.load(Ordering::SeqCst), 1);
        // 120-day horizon in 30-day windows
        assert_eq!(provider.contract_calls.load(Ordering::SeqCst), 4);
        assert_eq!(provider.snapshot_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_expiry_is_unavailable() {
        let expiry = today() + Duration::days(20);
        let provider = MockProvider::new(ProviderKind::Orats)
            .with_contract(contract(OptionSide::Call, 100, expiry), snapshot(Some(10), Some(0.2), Some(0.5)));
        let engine = ProviderAnalytics::new(Arc::new(provider), cache());

        let result = engine.iv_term_structure_as_of("SPY", today(), None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_an_error() {
        let provider = Arc::new(term_provider().failing_connect(Failure::Connectivity));
        let engine = ProviderAnalytics::new(provider.clone(), cache());

        let err = engine.iv_term_structure_as_of("SPY", today(), None).await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(provider.contract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_outage_is_an_error() {
        let provider = term_provider().fail_contracts(&[Failure::Api; 4]);
        let engine = ProviderAnalytics::new(Arc::new(provider), cache());
        assert!(engine.option_chain("SPY", today()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_positioning_cycle_records_history() {
        let cache = cache();
        let engine = ProviderAnalytics::new(Arc::new(term_provider()), cache.clone());

        let first = engine.positioning_as_of("SPY", today()).await.unwrap().unwrap();
        assert_eq!(first.total_open_interest, 450);
        assert_eq!(first.delta_open_interest_1d, None);
        assert_eq!(first.buckets.week.call, 100);
        assert_eq!(first.buckets.quarter.put, 50);

        let second = engine
            .positioning_as_of("SPY", today() + Duration::days(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.delta_open_interest_1d, Some(0));
        assert_eq!(cache.history("SPY").unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positioning_without_snapshots_is_unavailable() {
        let cache = cache();
        let provider = term_provider().fail_snapshots(&[Failure::Api]);
        let engine = ProviderAnalytics::new(Arc::new(provider), cache.clone());

        assert!(engine.positioning_as_of("SPY", today()).await.unwrap().is_none());
        assert!(cache.history("SPY").unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_chain_is_unavailable() {
        let engine = ProviderAnalytics::new(Arc::new(MockProvider::new(ProviderKind::Tradier)), cache());
        assert!(engine.option_chain("SPY", today()).await.unwrap().is_none());
        assert!(engine.positioning_as_of("SPY", today()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_quotes() {
        let provider = MockProvider::new(ProviderKind::Tradier).with_quote("SPY", Decimal::new(51234, 2));
        let engine = ProviderAnalytics::new(Arc::new(provider), cache());

        let quotes = engine.market_quotes(&["SPY".to_string()]).await.unwrap().unwrap();
        assert_eq!(quotes[0].price, Decimal::new(51234, 2));
        assert!(engine.market_quotes(&["QQQ".to_string()]).await.unwrap().is_none());
    }
}
