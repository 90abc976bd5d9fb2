//! ORATS API provider for live option chains and per-strike snapshots.
//!
//! API Constraints:
//! - Row limit: 5,000 rows per request
//! - Strikes are returned one row per strike with both call and put fields,
//!   so every row expands into two contracts
//! - IVs are reported as fractions (0.25 = 25%)

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{decode_rows, ProviderError, ProviderKind, QuoteProvider};
use super::symbology::occ_symbol;
use super::types::{ContractSnapshot, OptionContract, OptionSide, SnapshotMap, UnderlyingQuote};

/// ORATS API base URL.
pub const BASE_URL: &str = "https://api.orats.io/datav2";

/// Maximum option symbols per `strikes/options` request.
pub const MAX_SYMBOLS_PER_REQUEST: usize = 400;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `dte` query value covering `[start, end]` as seen from `today`.
fn dte_range(today: NaiveDate, start: NaiveDate, end: NaiveDate) -> String {
    let min_dte = (start - today).num_days().max(0);
    let max_dte = (end - today).num_days().max(min_dte);
    format!("{},{}", min_dte, max_dte)
}

/// API response wrapper - ORATS wraps all responses in {"data": [...]}
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Raw strike record from the ORATS `strikes` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStrikeRecord {
    pub ticker: String,
    #[serde(default)]
    pub trade_date: Option<String>,
    pub expir_date: String,
    #[serde(default)]
    pub dte: Option<i32>,
    pub strike: f64,
    #[serde(default)]
    pub stock_price: Option<f64>,

    // Call data
    #[serde(default)]
    pub call_open_interest: Option<i64>,
    #[serde(default)]
    pub call_bid_price: Option<f64>,
    #[serde(default)]
    pub call_ask_price: Option<f64>,
    #[serde(default)]
    pub call_mid_iv: Option<f64>,

    // Put data
    #[serde(default)]
    pub put_open_interest: Option<i64>,
    #[serde(default)]
    pub put_bid_price: Option<f64>,
    #[serde(default)]
    pub put_ask_price: Option<f64>,
    #[serde(default)]
    pub put_mid_iv: Option<f64>,

    // Common fields
    #[serde(default)]
    pub smv_vol: Option<f64>,
    /// Call delta.
    #[serde(default)]
    pub delta: Option<f64>,
}

impl RawStrikeRecord {
    pub fn expiration(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.expir_date, "%Y-%m-%d").ok()
    }

    fn strike_decimal(&self) -> Option<Decimal> {
        Decimal::try_from(self.strike).ok().map(|d| d.normalize())
    }

    /// Call and put contracts for this strike row.
    pub fn to_contracts(&self) -> Option<[OptionContract; 2]> {
        let expiry = self.expiration()?;
        let strike = self.strike_decimal()?;
        let contract = |side| {
            OptionContract::new(occ_symbol(&self.ticker, expiry, side, strike), side, strike, expiry)
        };
        Some([contract(OptionSide::Call), contract(OptionSide::Put)])
    }

    /// Snapshot for one side of this strike row.
    pub fn to_snapshot(&self, side: OptionSide) -> ContractSnapshot {
        let (oi, bid, ask, mid_iv) = match side {
            OptionSide::Call => (
                self.call_open_interest,
                self.call_bid_price,
                self.call_ask_price,
                self.call_mid_iv,
            ),
            OptionSide::Put => (
                self.put_open_interest,
                self.put_bid_price,
                self.put_ask_price,
                self.put_mid_iv,
            ),
        };

        // For puts, delta is typically negative but ORATS returns the call delta
        // We store as negative for puts
        let delta = match side {
            OptionSide::Call => self.delta,
            OptionSide::Put => self.delta.map(|d| -d.abs()),
        };

        let last_price = match (bid, ask) {
            (Some(b), Some(a)) => Decimal::try_from((b + a) / 2.0).ok(),
            _ => None,
        };

        ContractSnapshot {
            open_interest: oi,
            implied_volatility: mid_iv.filter(|iv| *iv > 0.0).or(self.smv_vol),
            delta,
            last_price,
        }
    }
}

/// Strike rows from an ORATS body, malformed rows dropped.
fn strike_rows(response: ApiResponse<Vec<serde_json::Value>>) -> Vec<RawStrikeRecord> {
    decode_rows(ProviderKind::Orats, response.data)
}

/// Per-ticker summary row (only the fields used here).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRecord {
    ticker: String,
    stock_price: Option<f64>,
    #[serde(default)]
    prior_cls_px: Option<f64>,
}

/// ORATS API client.
pub struct OratsProvider {
    client: Client,
    token: String,
    base_url: String,
    max_batch_size: usize,
    request_count: AtomicU64,
}

impl OratsProvider {
    /// Create a new ORATS provider.
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

    /// Get request count for monitoring.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("token", &self.token));

        let response = self.client.get(&url).query(&all_params).send().await?;
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
}

#[async_trait]
impl QuoteProvider for OratsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Orats
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if self.token.trim().is_empty() {
            return Err(ProviderError::Authentication("ORATS token is not configured".into()));
        }
        Ok(())
    }

    async fn list_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let response: ApiResponse<Vec<String>> = self.request("expirations", &[("ticker", symbol)]).await?;
        let mut dates: Vec<NaiveDate> = response
            .data
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect();
        dates.sort();
        Ok(dates)
    }

    async fn list_contracts(
        &self,
        symbol: &str,
        today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OptionContract>, ProviderError> {
        // The live strikes endpoint filters by DTE rather than by date
        let dte_range = dte_range(today, start, end);

        let rows = strike_rows(
            self.request("strikes", &[("ticker", symbol), ("dte", dte_range.as_str())])
                .await?,
        );

        let contracts: Vec<OptionContract> = rows
            .iter()
            .filter_map(RawStrikeRecord::to_contracts)
            .flatten()
            .filter(|c| c.expiry >= start && c.expiry <= end)
            .collect();

        debug!(symbol, rows = rows.len(), contracts = contracts.len(), "orats strikes");
        Ok(contracts)
    }

    async fn batch_snapshot(&self, contract_ids: &[String]) -> Result<SnapshotMap, ProviderError> {
        if contract_ids.is_empty() {
            return Ok(SnapshotMap::new());
        }
        let tickers = contract_ids.join(",");
        let rows = strike_rows(self.request("strikes/options", &[("tickers", tickers.as_str())]).await?);

        // Rows come back per strike; keep only the sides that were asked for
        let wanted: HashSet<&str> = contract_ids.iter().map(String::as_str).collect();
        let mut snapshots = SnapshotMap::new();
        for record in &rows {
            let Some(contracts) = record.to_contracts() else {
                debug!(ticker = %record.ticker, expiry = %record.expir_date, "skipping malformed strike row");
                continue;
            };
            for contract in contracts {
                if wanted.contains(contract.id.as_str()) {
                    snapshots.insert(contract.id.clone(), record.to_snapshot(contract.side));
                }
            }
        }
        Ok(snapshots)
    }

    async fn underlying_quotes(&self, symbols: &[String]) -> Result<Vec<UnderlyingQuote>, ProviderError> {
        let tickers = symbols.join(",");
        let response: ApiResponse<Vec<serde_json::Value>> =
            self.request("summaries", &[("ticker", tickers.as_str())]).await?;
        let rows: Vec<SummaryRecord> = decode_rows(ProviderKind::Orats, response.data);

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let price = Decimal::try_from(row.stock_price?).ok()?;
                Some(UnderlyingQuote {
                    symbol: row.ticker,
                    price,
                    volume: None,
                    prev_close: row.prior_cls_px.and_then(|p| Decimal::try_from(p).ok()),
                })
            })
            .collect())
    }
}
