//! At-the-money IV selection per expiry.
//!
//! Calls only. The contract whose delta is nearest 0.5 wins; delta already
//! encodes moneyness, so it stays right even when the reference spot price
//! is stale. Without any usable delta, the call struck nearest the
//! reference price is used instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{OptionContract, SnapshotMap};

/// IVs at or below this are taken to be fractions (0.35) rather than
/// percent (35.0). A genuine 1.2% IV would be misread as 120%.
pub const FRACTION_IV_THRESHOLD: f64 = 1.5;

/// Express an IV as percent.
pub fn normalize_iv(iv: f64) -> f64 {
    if iv <= FRACTION_IV_THRESHOLD {
        iv * 100.0
    } else {
        iv
    }
}

/// Which signal picked the ATM contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtmMethod {
    Delta,
    Strike,
}

/// The chosen contract and its IV in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmPick {
    pub contract_id: String,
    pub iv_percent: f64,
    pub method: AtmMethod,
}

/// ATM selector.
#[derive(Debug, Clone)]
pub struct AtmSelector {
    target_delta: f64,
}

impl Default for AtmSelector {
    fn default() -> Self {
        Self { target_delta: 0.5 }
    }
}

impl AtmSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the representative IV for one expiry's contracts.
    pub fn select(
        &self,
        contracts: &[OptionContract],
        snapshots: &SnapshotMap,
        reference_price: Option<Decimal>,
    ) -> Option<AtmPick> {
        self.select_by_delta(contracts, snapshots)
            .or_else(|| select_by_strike(contracts, snapshots, reference_price?))
    }

    fn select_by_delta(&self, contracts: &[OptionContract], snapshots: &SnapshotMap) -> Option<AtmPick> {
        let mut best: Option<(f64, AtmPick)> = None;

        for contract in contracts.iter().filter(|c| c.is_call()) {
            let Some(snapshot) = snapshots.get(&contract.id) else {
                continue;
            };
            let (Some(delta), Some(iv)) = (snapshot.usable_delta(), snapshot.usable_iv()) else {
                continue;
            };

            let diff = (delta - self.target_delta).abs();
            if best.as_ref().map_or(true, |(best_diff, _)| diff < *best_diff) {
                best = Some((
                    diff,
                    AtmPick {
                        contract_id: contract.id.clone(),
                        iv_percent: normalize_iv(iv),
                        method: AtmMethod::Delta,
                    },
                ));
            }
        }

        best.map(|(_, pick)| pick)
    }
}

fn select_by_strike(
    contracts: &[OptionContract],
    snapshots: &SnapshotMap,
    reference_price: Decimal,
) -> Option<AtmPick> {
    let mut best: Option<(Decimal, AtmPick)> = None;

    for contract in contracts.iter().filter(|c| c.is_call()) {
        let Some(iv) = snapshots.get(&contract.id).and_then(|s| s.usable_iv()) else {
            continue;
        };

        let distance = (contract.strike - reference_price).abs();
        if best.as_ref().map_or(true, |(best_distance, _)| distance < *best_distance) {
            best = Some((
                distance,
                AtmPick {
                    contract_id: contract.id.clone(),
                    iv_percent: normalize_iv(iv),
                    method: AtmMethod::Strike,
                },
            ));
        }
    }

    best.map(|(_, pick)| pick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::{contract, snapshot};
    use crate::data::OptionSide;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 19).unwrap()
    }

    fn chain(rows: &[(OptionSide, i64, Option<f64>, Option<f64>)]) -> (Vec<OptionContract>, SnapshotMap) {
        let mut contracts = Vec::new();
        let mut snapshots = SnapshotMap::new();
        for &(side, strike, iv, delta) in rows {
            let c = contract(side, strike, expiry());
            snapshots.insert(c.id.clone(), snapshot(Some(100), iv, delta));
            contracts.push(c);
        }
        (contracts, snapshots)
    }

    #[test]
    fn test_normalize_iv() {
        assert_relative_eq!(normalize_iv(0.35), 35.0, epsilon = 1e-9);
        assert_relative_eq!(normalize_iv(1.5), 150.0, epsilon = 1e-9);
        assert_relative_eq!(normalize_iv(35.0), 35.0, epsilon = 1e-9);
        assert_relative_eq!(normalize_iv(1.51), 1.51, epsilon = 1e-9);
    }

    #[test]
    fn test_picks_delta_nearest_half() {
        let (contracts, snapshots) = chain(&[
            (OptionSide::Call, 95, Some(0.30), Some(0.70)),
            (OptionSide::Call, 100, Some(0.25), Some(0.52)),
            (OptionSide::Call, 105, Some(0.22), Some(0.35)),
            // Puts never participate even with a perfect delta
            (OptionSide::Put, 100, Some(0.90), Some(0.50)),
        ]);

        let pick = AtmSelector::new().select(&contracts, &snapshots, None).unwrap();
        assert_eq!(pick.contract_id, contracts[1].id);
        assert_eq!(pick.method, AtmMethod::Delta);
        assert_relative_eq!(pick.iv_percent, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_delta_wins_over_strike_proximity() {
        let (contracts, snapshots) = chain(&[
            (OptionSide::Call, 100, Some(0.20), Some(0.80)),
            (OptionSide::Call, 110, Some(0.24), Some(0.49)),
        ]);

        let pick = AtmSelector::new()
            .select(&contracts, &snapshots, Some(Decimal::from(100)))
            .unwrap();
        assert_eq!(pick.contract_id, contracts[1].id);
    }

    #[test]
    fn test_ignores_contracts_missing_iv_or_delta() {
        let (contracts, snapshots) = chain(&[
            (OptionSide::Call, 100, None, Some(0.50)),
            (OptionSide::Call, 105, Some(0.21), Some(0.40)),
        ]);

        let pick = AtmSelector::new().select(&contracts, &snapshots, None).unwrap();
        assert_eq!(pick.contract_id, contracts[1].id);
    }

    #[test]
    fn test_falls_back_to_nearest_strike_without_deltas() {
        let (contracts, snapshots) = chain(&[
            (OptionSide::Call, 90, Some(0.30), None),
            (OptionSide::Call, 100, Some(0.25), None),
            (OptionSide::Call, 110, Some(0.22), None),
            (OptionSide::Put, 102, Some(0.40), None),
        ]);

        let pick = AtmSelector::new()
            .select(&contracts, &snapshots, Some(Decimal::new(1024, 1)))
            .unwrap();
        assert_eq!(pick.contract_id, contracts[1].id);
        assert_eq!(pick.method, AtmMethod::Strike);
        assert_relative_eq!(pick.iv_percent, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_delta_and_no_reference_yields_nothing() {
        let (contracts, snapshots) = chain(&[
            (OptionSide::Call, 100, Some(0.25), None),
            (OptionSide::Call, 105, Some(0.22), None),
        ]);

        assert!(AtmSelector::new().select(&contracts, &snapshots, None).is_none());
    }

    #[test]
    fn test_missing_snapshots_yield_nothing() {
        let (contracts, _) = chain(&[(OptionSide::Call, 100, Some(0.25), Some(0.5))]);
        let empty = SnapshotMap::new();
        assert!(AtmSelector::new()
            .select(&contracts, &empty, Some(Decimal::from(100)))
            .is_none());
    }
}
