//! Core data types for options analytics.
//!
//! Contracts come from a chain listing and never change; snapshots carry
//! the dynamic per-contract fields (greeks, IV, open interest) as of the
//! fetch and live only for one analytics computation.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option side (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// A listed option contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Provider-specific contract identifier (OCC symbol for our providers).
    pub id: String,

    /// Call or put
    pub side: OptionSide,

    /// Strike price
    pub strike: Decimal,

    /// Expiration date
    pub expiry: NaiveDate,
}

impl OptionContract {
    pub fn new(id: impl Into<String>, side: OptionSide, strike: Decimal, expiry: NaiveDate) -> Self {
        Self {
            id: id.into(),
            side,
            strike,
            expiry,
        }
    }

    /// Calendar days from `today` to expiry (negative once expired).
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry - today).num_days()
    }

    pub fn is_call(&self) -> bool {
        self.side == OptionSide::Call
    }
}

/// Dynamic fields for one contract as of fetch time.
///
/// Every field is optional: providers routinely omit greeks for illiquid
/// strikes, and consumers must tolerate the gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractSnapshot {
    pub open_interest: Option<i64>,

    /// Implied volatility in whatever unit the provider reports
    /// (fraction or percent); see [`crate::analytics::normalize_iv`].
    pub implied_volatility: Option<f64>,

    pub delta: Option<f64>,

    pub last_price: Option<Decimal>,
}

impl ContractSnapshot {
    /// IV if present and usable (finite, positive).
    pub fn usable_iv(&self) -> Option<f64> {
        self.implied_volatility.filter(|iv| iv.is_finite() && *iv > 0.0)
    }

    /// Delta if present and finite.
    pub fn usable_delta(&self) -> Option<f64> {
        self.delta.filter(|d| d.is_finite())
    }
}

/// Contracts grouped by expiration date, sorted ascending.
pub type ExpiryChains = BTreeMap<NaiveDate, Vec<OptionContract>>;

/// Snapshots keyed by contract identifier.
pub type SnapshotMap = HashMap<String, ContractSnapshot>;

/// Last price of an underlying, as reported by the market-data capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingQuote {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Option<i64>,
    pub prev_close: Option<Decimal>,
}

/// Total number of contracts across all expirations.
pub fn total_contracts(chains: &ExpiryChains) -> usize {
    chains.values().map(Vec::len).sum()
}
