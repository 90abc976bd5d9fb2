//! Option chain enumeration over a forward date horizon.
//!
//! Providers only answer chain queries for a bounded date span, so the
//! horizon is walked in consecutive windows, one rate-limited call each,
//! and the results merged by expiry. Fetching is best effort: a window
//! that fails for any reason other than a quota signal is dropped.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiter;
use crate::data::{ExpiryChains, OptionContract, ProviderError, QuoteProvider};

/// Window walk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainWindowConfig {
    /// How far ahead to look for expiries, in calendar days.
    pub horizon_days: i64,
    /// Date span covered by one provider call.
    pub window_days: i64,
    /// Retries after a quota signal, per window.
    pub max_rate_limit_retries: u32,
}

impl Default for ChainWindowConfig {
    fn default() -> Self {
        Self {
            horizon_days: 120,
            window_days: 30,
            max_rate_limit_retries: 2,
        }
    }
}

/// Inclusive `(start, end)` date windows covering `[today, today + horizon]`.
pub fn date_windows(today: NaiveDate, horizon_days: i64, window_days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let end = today + ChronoDuration::days(horizon_days.max(0));
    let step = ChronoDuration::days(window_days.max(1));

    let mut windows = Vec::new();
    let mut start = today;
    while start <= end {
        let window_end = (start + step).min(end);
        windows.push((start, window_end));
        start = window_end + ChronoDuration::days(1);
    }
    windows
}

/// Walks the chain windows for one provider.
pub struct ChainFetcher<'a> {
    provider: &'a dyn QuoteProvider,
    limiter: &'a RateLimiter,
    config: ChainWindowConfig,
    cooldown: Duration,
}

impl<'a> ChainFetcher<'a> {
    /// The quota cool-down defaults to one full limiter period.
    pub fn new(provider: &'a dyn QuoteProvider, limiter: &'a RateLimiter, config: ChainWindowConfig) -> Self {
        Self {
            provider,
            limiter,
            config,
            cooldown: limiter.period(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Merge every window's contracts by expiry.
    ///
    /// Errors only when no window succeeded at all; the last error is
    /// returned so the caller can tell an outage from an empty chain.
    pub async fn fetch(&self, symbol: &str, today: NaiveDate) -> Result<ExpiryChains, ProviderError> {
        let windows = date_windows(today, self.config.horizon_days, self.config.window_days);
        let mut chains = ExpiryChains::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut succeeded = 0usize;
        let mut last_error = None;

        for (start, end) in windows {
            match self.fetch_window(symbol, today, start, end).await {
                Ok(contracts) => {
                    succeeded += 1;
                    debug!(symbol, %start, %end, contracts = contracts.len(), "chain window");
                    for contract in contracts {
                        if seen.insert(contract.id.clone()) {
                            chains.entry(contract.expiry).or_default().push(contract);
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol, provider = %self.provider.kind(), %start, %end, error = %e, "Chain window failed, skipping");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => {
                info!(
                    symbol,
                    provider = %self.provider.kind(),
                    expiries = chains.len(),
                    "Fetched option chain"
                );
                Ok(chains)
            }
        }
    }

    async fn fetch_window(
        &self,
        symbol: &str,
        today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OptionContract>, ProviderError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            match self.provider.list_contracts(symbol, today, start, end).await {
                Err(e) if e.is_rate_limit() && attempt < self.config.max_rate_limit_retries => {
                    attempt += 1;
                    warn!(
                        symbol,
                        provider = %self.provider.kind(),
                        attempt,
                        max = self.config.max_rate_limit_retries,
                        cooldown_secs = self.cooldown.as_secs_f64(),
                        "Rate limited listing contracts, retrying after cool-down"
                    );
                    tokio::time::sleep(self.cooldown).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::{contract, snapshot, Failure, MockProvider};
    use crate::data::{OptionSide, ProviderKind};
    use std::sync::atomic::Ordering;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + ChronoDuration::days(offset)
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new("chain", 10, Duration::from_secs(30))
    }

    #[test]
    fn test_windows_cover_horizon_without_overlap() {
        let windows = date_windows(day(0), 120, 30);
        assert_eq!(
            windows,
            vec![
                (day(0), day(30)),
                (day(31), day(61)),
                (day(62), day(92)),
                (day(93), day(120)),
            ]
        );
    }

    #[test]
    fn test_single_window_when_horizon_is_short() {
        assert_eq!(date_windows(day(0), 10, 30), vec![(day(0), day(10))]);
        assert_eq!(date_windows(day(0), 0, 30), vec![(day(0), day(0))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merges_windows_by_expiry() {
        let provider = MockProvider::new(ProviderKind::Orats)
            .with_contract(contract(OptionSide::Call, 100, day(5)), snapshot(None, None, None))
            .with_contract(contract(OptionSide::Put, 100, day(5)), snapshot(None, None, None))
            .with_contract(contract(OptionSide::Call, 100, day(45)), snapshot(None, None, None))
            .with_contract(contract(OptionSide::Call, 100, day(200)), snapshot(None, None, None));
        let limiter = limiter();

        let chains = ChainFetcher::new(&provider, &limiter, ChainWindowConfig::default())
            .fetch("SPY", day(0))
            .await
            .unwrap();

        assert_eq!(chains.len(), 2);
        assert_eq!(chains[&day(5)].len(), 2);
        assert_eq!(chains[&day(45)].len(), 1);
        assert_eq!(provider.contract_calls.load(Ordering::SeqCst), 4);
        assert_eq!(limiter.in_window().await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_window_sees_the_cycle_date() {
        let provider = MockProvider::new(ProviderKind::Orats)
            .with_contract(contract(OptionSide::Call, 100, day(5)), snapshot(None, None, None));
        let limiter = limiter();

        ChainFetcher::new(&provider, &limiter, ChainWindowConfig::default())
            .fetch("SPY", day(0))
            .await
            .unwrap();

        let seen = provider.contract_as_of.lock().unwrap().clone();
        assert_eq!(seen, vec![day(0); 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_rate_limit() {
        let provider = MockProvider::new(ProviderKind::Orats)
            .with_contract(contract(OptionSide::Call, 100, day(5)), snapshot(None, None, None))
            .fail_contracts(&[Failure::RateLimited, Failure::RateLimited]);
        let limiter = limiter();
        let config = ChainWindowConfig {
            horizon_days: 20,
            ..Default::default()
        };

        let start = tokio::time::Instant::now();
        let chains = ChainFetcher::new(&provider, &limiter, config)
            .fetch("SPY", day(0))
            .await
            .unwrap();

        assert_eq!(chains[&day(5)].len(), 1);
        assert_eq!(provider.contract_calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_cap() {
        let provider = MockProvider::new(ProviderKind::Orats)
            .with_contract(contract(OptionSide::Call, 100, day(5)), snapshot(None, None, None))
            .fail_contracts(&[Failure::RateLimited; 3]);
        let limiter = limiter();
        let config = ChainWindowConfig {
            horizon_days: 20,
            ..Default::default()
        };

        let result = ChainFetcher::new(&provider, &limiter, config)
            .with_cooldown(Duration::from_secs(1))
            .fetch("SPY", day(0))
            .await;

        assert!(result.unwrap_err().is_rate_limit());
        assert_eq!(provider.contract_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_skip_window_without_retry() {
        let provider = MockProvider::new(ProviderKind::Orats)
            .with_contract(contract(OptionSide::Call, 100, day(5)), snapshot(None, None, None))
            .with_contract(contract(OptionSide::Call, 100, day(45)), snapshot(None, None, None))
            .fail_contracts(&[Failure::Api]);
        let limiter = limiter();

        let chains = ChainFetcher::new(&provider, &limiter, ChainWindowConfig::default())
            .fetch("SPY", day(0))
            .await
            .unwrap();

        // First window (day 0-30) failed and was dropped
        assert!(!chains.contains_key(&day(5)));
        assert_eq!(chains[&day(45)].len(), 1);
        assert_eq!(provider.contract_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_windows_failing_is_an_error() {
        let provider = MockProvider::new(ProviderKind::Tradier).fail_contracts(&[Failure::Connectivity; 4]);
        let limiter = limiter();

        let result = ChainFetcher::new(&provider, &limiter, ChainWindowConfig::default())
            .fetch("SPY", day(0))
            .await;

        assert!(result.unwrap_err().is_connectivity());
    }
}
