//! IV term structure analysis.
//!
//! Turns sparse (DTE, ATM IV) observations into IV at fixed horizons:
//! - Variance interpolation between bracketing expiries
//! - Clamping to the nearest observed expiry outside the observed range
//! - Slope (iv30 - iv90) and a contango/backwardation regime
//!
//! Volatility adds up in variance over time, so interpolating σ² rather
//! than σ keeps the curve consistent with how it compounds.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atm::AtmSelector;
use crate::data::{ExpiryChains, SnapshotMap};

/// Canonical horizons, in days.
pub const TARGET_HORIZONS: [i64; 4] = [7, 30, 60, 90];

/// Term structure regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermStructureRegime {
    /// Near-term IV < far-term IV (normal).
    Contango,
    /// Near-term IV > far-term IV (near-term stress).
    Backwardation,
    /// Near-term IV ~ far-term IV.
    Flat,
}

/// One ATM observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermPoint {
    pub dte: i64,
    /// IV in percent.
    pub iv: f64,
}

impl TermPoint {
    pub fn new(dte: i64, iv: f64) -> Self {
        Self { dte, iv }
    }

    pub fn variance(&self) -> f64 {
        (self.iv / 100.0).powi(2)
    }
}

/// Interpolated IV term structure for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IVTermResult {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub iv7: f64,
    pub iv30: f64,
    pub iv60: f64,
    pub iv90: f64,
    /// iv30 - iv90; positive means backwardation.
    pub slope: f64,
    pub regime: TermStructureRegime,
    /// Summed open interest across the fetched chain; `None` when zero.
    pub total_open_interest: Option<i64>,
    /// Observations the horizons were interpolated from, by DTE.
    pub points: Vec<TermPoint>,
}

/// Interpolate between two observations in variance space.
pub fn variance_interpolate(lower: TermPoint, upper: TermPoint, target_dte: i64) -> f64 {
    if upper.dte == lower.dte {
        return lower.iv;
    }
    let weight = (target_dte - lower.dte) as f64 / (upper.dte - lower.dte) as f64;
    let variance = lower.variance() + (upper.variance() - lower.variance()) * weight;
    variance.sqrt() * 100.0
}

/// IV at `target_dte` from points sorted by DTE.
///
/// Exact knots return their IV unchanged; targets outside the observed
/// range clamp to the nearest endpoint. Fewer than two points is not
/// enough to call a term structure, so the result is `None`.
pub fn interpolate_iv(points: &[TermPoint], target_dte: i64) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    debug_assert!(points.windows(2).all(|w| w[0].dte <= w[1].dte));

    let first = points[0];
    let last = points[points.len() - 1];
    if target_dte <= first.dte {
        return Some(first.iv);
    }
    if target_dte >= last.dte {
        return Some(last.iv);
    }

    let upper_idx = points.iter().position(|p| p.dte >= target_dte)?;
    let upper = points[upper_idx];
    if upper.dte == target_dte {
        return Some(upper.iv);
    }
    Some(variance_interpolate(points[upper_idx - 1], upper, target_dte))
}

/// ATM term point for every expiry with a usable pick. Expiries on or
/// before `today` are skipped.
pub fn collect_term_points(
    chains: &ExpiryChains,
    snapshots: &SnapshotMap,
    today: NaiveDate,
    reference_price: Option<Decimal>,
    selector: &AtmSelector,
) -> Vec<TermPoint> {
    let mut points: Vec<TermPoint> = chains
        .iter()
        .filter_map(|(expiry, contracts)| {
            let dte = (*expiry - today).num_days();
            if dte <= 0 {
                return None;
            }
            let pick = selector.select(contracts, snapshots, reference_price)?;
            debug!(%expiry, dte, iv = pick.iv_percent, method = ?pick.method, "ATM pick");
            Some(TermPoint::new(dte, pick.iv_percent))
        })
        .collect();
    points.sort_by_key(|p| p.dte);
    points
}

/// Sum of open interest over every contract with a snapshot.
pub fn chain_open_interest(chains: &ExpiryChains, snapshots: &SnapshotMap) -> i64 {
    chains
        .values()
        .flatten()
        .filter_map(|c| snapshots.get(&c.id).and_then(|s| s.open_interest))
        .filter(|oi| *oi > 0)
        .sum()
}

/// Builds [`IVTermResult`]s from term points.
#[derive(Debug, Clone)]
pub struct TermInterpolator {
    /// Threshold for contango (iv30/iv90 below this = contango).
    contango_threshold: f64,
    /// Threshold for backwardation (above this = backwardation).
    backwardation_threshold: f64,
}

impl Default for TermInterpolator {
    fn default() -> Self {
        Self {
            contango_threshold: 0.95,
            backwardation_threshold: 1.05,
        }
    }
}

impl TermInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, contango: f64, backwardation: f64) -> Self {
        self.contango_threshold = contango;
        self.backwardation_threshold = backwardation;
        self
    }

    pub fn classify(&self, iv30: f64, iv90: f64) -> TermStructureRegime {
        if iv90 <= 0.0 {
            return TermStructureRegime::Flat;
        }
        let ratio = iv30 / iv90;
        if ratio < self.contango_threshold {
            TermStructureRegime::Contango
        } else if ratio > self.backwardation_threshold {
            TermStructureRegime::Backwardation
        } else {
            TermStructureRegime::Flat
        }
    }

    /// `None` with fewer than two points.
    pub fn build(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        mut points: Vec<TermPoint>,
        total_open_interest: i64,
    ) -> Option<IVTermResult> {
        points.sort_by_key(|p| p.dte);
        let [iv7, iv30, iv60, iv90] = TARGET_HORIZONS.map(|h| interpolate_iv(&points, h));

        let (iv7, iv30, iv60, iv90) = (iv7?, iv30?, iv60?, iv90?);
        let slope = iv30 - iv90;

        Some(IVTermResult {
            symbol: symbol.to_string(),
            as_of,
            iv7,
            iv30,
            iv60,
            iv90,
            slope,
            regime: self.classify(iv30, iv90),
            total_open_interest: (total_open_interest > 0).then_some(total_open_interest),
            points,
        })
    }
}
