//! Quote provider abstraction.
//!
//! One implementation per data source. The orchestrator only ever talks to
//! providers through this trait, selected from a [`crate::sources::ProviderRegistry`].

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::types::{OptionContract, SnapshotMap, UnderlyingQuote};

/// Known provider labels, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Orats,
    Tradier,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Orats, ProviderKind::Tradier];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "orats" => Some(Self::Orats),
            "tradier" => Some(Self::Tradier),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orats => "orats",
            Self::Tradier => "tradier",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider call failures.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Quota exceeded; retryable after a cool-down.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Provider unreachable.
    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),
}

/// Substrings providers use to signal a quota violation in an error body.
const RATE_LIMIT_SIGNATURES: &[&str] = &["rate", "limit", "quota", "too many", "频率"];

impl ProviderError {
    /// Classify a non-success API response.
    pub fn from_api_message(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 {
            return Self::RateLimited(message);
        }
        // Some providers answer a quota violation with 403
        let lower = message.to_lowercase();
        if RATE_LIMIT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
            return Self::RateLimited(message);
        }
        if status == 401 || status == 403 {
            return Self::Authentication(message);
        }
        Self::Api { status, message }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Unreachable or unauthenticated: not worth retrying in this cycle.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Authentication(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::InvalidResponse(err.to_string());
        }
        match err.status() {
            Some(status) => Self::from_api_message(status.as_u16(), err.to_string()),
            None => Self::Connectivity(err.to_string()),
        }
    }
}

/// Decode response rows one at a time. A row that does not fit `T` is
/// skipped so one malformed contract never costs the rest of the batch.
pub(crate) fn decode_rows<T: DeserializeOwned>(provider: ProviderKind, rows: Vec<serde_json::Value>) -> Vec<T> {
    let total = rows.len();
    let decoded: Vec<T> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(provider = %provider, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect();
    if decoded.len() < total {
        debug!(provider = %provider, total, skipped = total - decoded.len(), "Dropped malformed rows");
    }
    decoded
}

/// A source of option chains, per-contract snapshots and underlying quotes.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Largest number of contract identifiers accepted by one
    /// [`QuoteProvider::batch_snapshot`] call.
    fn max_batch_size(&self) -> usize;

    /// Verify credentials and reachability.
    async fn connect(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError>;

    /// Contracts expiring within `[start, end]` (inclusive). `today` is the
    /// cycle's as-of date, for providers that filter by days to expiry.
    async fn list_contracts(
        &self,
        symbol: &str,
        today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OptionContract>, ProviderError>;

    /// Snapshots for at most [`QuoteProvider::max_batch_size`] contracts.
    /// Identifiers the provider has no data for are simply absent.
    async fn batch_snapshot(&self, contract_ids: &[String]) -> Result<SnapshotMap, ProviderError>;

    async fn underlying_quotes(&self, symbols: &[String]) -> Result<Vec<UnderlyingQuote>, ProviderError> {
        let _ = symbols;
        Err(ProviderError::Unsupported("underlying_quotes"))
    }
}
