//! Tradier brokerage API provider.
//!
//! - Contract universe comes from `markets/options/lookup` (OCC symbols for
//!   every listed expiry), filtered to the requested date span
//! - Snapshots come from `markets/quotes?greeks=true`; IVs are fractions
//! - Single results are returned as an object instead of a one-element array

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::provider::{decode_rows, ProviderError, ProviderKind, QuoteProvider};
use super::symbology::parse_occ_symbol;
use super::types::{ContractSnapshot, OptionContract, SnapshotMap, UnderlyingQuote};

pub const BASE_URL: &str = "https://api.tradier.com/v1";

/// Symbols per quotes request (kept small enough for a GET query string).
pub const MAX_SYMBOLS_PER_REQUEST: usize = 200;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tradier collapses single-element lists into a bare object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpirationsEnvelope {
    expirations: Option<ExpirationDates>,
}

#[derive(Debug, Deserialize)]
struct ExpirationDates {
    date: Option<OneOrMany<String>>,
}

#[derive(Debug, Deserialize)]
struct LookupEnvelope {
    symbols: Option<Vec<LookupRoot>>,
}

#[derive(Debug, Deserialize)]
struct LookupRoot {
    #[serde(default)]
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuotesEnvelope {
    quotes: Option<QuotesBody>,
}

#[derive(Debug, Deserialize)]
struct QuotesBody {
    /// Kept raw so each quote decodes on its own.
    quote: Option<serde_json::Value>,
}

impl QuotesEnvelope {
    /// Quote rows, malformed ones dropped.
    fn into_quotes(self) -> Vec<RawQuote> {
        let rows = match self.quotes.and_then(|q| q.quote) {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(rows)) => rows,
            Some(row) => vec![row],
        };
        decode_rows(ProviderKind::Tradier, rows)
    }
}

/// Quote row; equity and option quotes share this shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuote {
    pub symbol: String,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub prevclose: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<i64>,
    #[serde(default)]
    pub greeks: Option<RawGreeks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGreeks {
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub mid_iv: Option<f64>,
    #[serde(default)]
    pub smv_vol: Option<f64>,
}

impl RawQuote {
    pub fn to_snapshot(&self) -> ContractSnapshot {
        let greeks = self.greeks.as_ref();
        ContractSnapshot {
            open_interest: self.open_interest,
            implied_volatility: greeks
                .and_then(|g| g.mid_iv.filter(|iv| *iv > 0.0).or(g.smv_vol)),
            delta: greeks.and_then(|g| g.delta),
            last_price: self.last.and_then(|p| Decimal::try_from(p).ok()),
        }
    }
}

/// Tradier market data client.
pub struct TradierProvider {
    client: Client,
    token: String,
    base_url: String,
    max_batch_size: usize,
    request_count: AtomicU64,
}

impl TradierProvider {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            token,
            base_url: BASE_URL.to_string(),
            max_batch_size: MAX_SYMBOLS_PER_REQUEST,
            request_count: AtomicU64::new(0),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(params)
            .send()
            .await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_api_message(status.as_u16(), text));
        }

        response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse {} response: {}", endpoint, e))
        })
    }

    async fn quotes(&self, symbols: &[String], greeks: bool) -> Result<Vec<RawQuote>, ProviderError> {
        let joined = symbols.join(",");
        let greeks = if greeks { "true" } else { "false" };
        let envelope: QuotesEnvelope = self
            .request("markets/quotes", &[("symbols", joined.as_str()), ("greeks", greeks)])
            .await?;
        Ok(envelope.into_quotes())
    }
}

#[async_trait]
impl QuoteProvider for TradierProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tradier
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if self.token.trim().is_empty() {
            return Err(ProviderError::Authentication("Tradier token is not configured".into()));
        }
        Ok(())
    }

    async fn list_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let envelope: ExpirationsEnvelope = self
            .request("markets/options/expirations", &[("symbol", symbol)])
            .await?;
        let mut dates: Vec<NaiveDate> = envelope
            .expirations
            .and_then(|e| e.date)
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect();
        dates.sort();
        Ok(dates)
    }

    async fn list_contracts(
        &self,
        symbol: &str,
        _today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OptionContract>, ProviderError> {
        let envelope: LookupEnvelope = self
            .request("markets/options/lookup", &[("underlying", symbol)])
            .await?;

        let contracts: Vec<OptionContract> = envelope
            .symbols
            .unwrap_or_default()
            .iter()
            .flat_map(|root| root.options.iter())
            .filter_map(|occ| parse_occ_symbol(occ))
            .filter(|c| c.expiry >= start && c.expiry <= end)
            .collect();

        debug!(symbol, %start, %end, contracts = contracts.len(), "tradier lookup");
        Ok(contracts)
    }

    async fn batch_snapshot(&self, contract_ids: &[String]) -> Result<SnapshotMap, ProviderError> {
        if contract_ids.is_empty() {
            return Ok(SnapshotMap::new());
        }
        Ok(self
            .quotes(contract_ids, true)
            .await?
            .into_iter()
            .map(|quote| {
                let snapshot = quote.to_snapshot();
                (quote.symbol, snapshot)
            })
            .collect())
    }

    async fn underlying_quotes(&self, symbols: &[String]) -> Result<Vec<UnderlyingQuote>, ProviderError> {
        Ok(self
            .quotes(symbols, false)
            .await?
            .into_iter()
            .filter_map(|quote| {
                let price = Decimal::try_from(quote.last?).ok()?;
                Some(UnderlyingQuote {
                    symbol: quote.symbol,
                    price,
                    volume: quote.volume,
                    prev_close: quote.prevclose.and_then(|p| Decimal::try_from(p).ok()),
                })
            })
            .collect())
    }
}
