//! Open-interest positioning.
//!
//! Buckets open interest by days to expiry and side:
//!
//! | Bucket   | DTE     |
//! |----------|---------|
//! | Week     | 0 - 7   |
//! | Month    | 8 - 30  |
//! | Quarter  | 31 - 90 |
//!
//! Contracts beyond 90 days, already expired, or without an OI value are
//! ignored. The total is compared against the cached total from the most
//! recent prior day to give a one-day OI change.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::OiHistoryCache;
use crate::data::{ExpiryChains, OptionSide, SnapshotMap};

/// Expiry range bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryBucket {
    Week,
    Month,
    Quarter,
}

impl ExpiryBucket {
    pub const ALL: [ExpiryBucket; 3] = [Self::Week, Self::Month, Self::Quarter];

    pub fn from_dte(dte: i64) -> Option<Self> {
        match dte {
            0..=7 => Some(Self::Week),
            8..=30 => Some(Self::Month),
            31..=90 => Some(Self::Quarter),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Week => "0-7",
            Self::Month => "8-30",
            Self::Quarter => "31-90",
        }
    }
}

/// Call and put totals for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTotals {
    pub call: i64,
    pub put: i64,
}

impl SideTotals {
    pub fn get(&self, side: OptionSide) -> i64 {
        match side {
            OptionSide::Call => self.call,
            OptionSide::Put => self.put,
        }
    }

    fn add(&mut self, side: OptionSide, oi: i64) {
        match side {
            OptionSide::Call => self.call += oi,
            OptionSide::Put => self.put += oi,
        }
    }

    pub fn total(&self) -> i64 {
        self.call + self.put
    }
}

/// The six bucket × side sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OiBuckets {
    pub week: SideTotals,
    pub month: SideTotals,
    pub quarter: SideTotals,
}

impl OiBuckets {
    pub fn bucket(&self, bucket: ExpiryBucket) -> &SideTotals {
        match bucket {
            ExpiryBucket::Week => &self.week,
            ExpiryBucket::Month => &self.month,
            ExpiryBucket::Quarter => &self.quarter,
        }
    }

    fn bucket_mut(&mut self, bucket: ExpiryBucket) -> &mut SideTotals {
        match bucket {
            ExpiryBucket::Week => &mut self.week,
            ExpiryBucket::Month => &mut self.month,
            ExpiryBucket::Quarter => &mut self.quarter,
        }
    }

    pub fn get(&self, bucket: ExpiryBucket, side: OptionSide) -> i64 {
        self.bucket(bucket).get(side)
    }

    pub fn side_total(&self, side: OptionSide) -> i64 {
        ExpiryBucket::ALL.iter().map(|b| self.get(*b, side)).sum()
    }

    pub fn total(&self) -> i64 {
        ExpiryBucket::ALL.iter().map(|b| self.bucket(*b).total()).sum()
    }
}

/// Positioning for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositioningResult {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub buckets: OiBuckets,
    pub total_open_interest: i64,
    /// Change against the latest cached prior total; `None` on first sight.
    pub delta_open_interest_1d: Option<i64>,
}

impl PositioningResult {
    /// Put OI over call OI, `None` when there is no call OI.
    pub fn put_call_ratio(&self) -> Option<f64> {
        let calls = self.buckets.side_total(OptionSide::Call);
        if calls == 0 {
            return None;
        }
        Some(self.buckets.side_total(OptionSide::Put) as f64 / calls as f64)
    }
}

/// Route each contract's OI into its bucket.
pub fn bucket_open_interest(chains: &ExpiryChains, snapshots: &SnapshotMap, today: NaiveDate) -> OiBuckets {
    let mut buckets = OiBuckets::default();
    for contract in chains.values().flatten() {
        let Some(bucket) = ExpiryBucket::from_dte(contract.days_to_expiry(today)) else {
            continue;
        };
        let Some(oi) = snapshots.get(&contract.id).and_then(|s| s.open_interest) else {
            continue;
        };
        if oi < 0 {
            debug!(contract = %contract.id, oi, "skipping negative open interest");
            continue;
        }
        buckets.bucket_mut(bucket).add(contract.side, oi);
    }
    buckets
}

/// Buckets OI and records the total in the history cache.
pub struct OiAggregator<'a> {
    cache: &'a OiHistoryCache,
}

impl<'a> OiAggregator<'a> {
    pub fn new(cache: &'a OiHistoryCache) -> Self {
        Self { cache }
    }

    /// A cache failure is logged and leaves the delta empty; the bucket
    /// sums are still returned.
    pub fn aggregate(
        &self,
        symbol: &str,
        chains: &ExpiryChains,
        snapshots: &SnapshotMap,
        today: NaiveDate,
    ) -> PositioningResult {
        let buckets = bucket_open_interest(chains, snapshots, today);
        let total = buckets.total();

        let delta = match self.cache.record(symbol, today, total) {
            Ok(delta) => delta,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to update OI history, delta unavailable");
                None
            }
        };

        PositioningResult {
            symbol: symbol.to_string(),
            as_of: today,
            buckets,
            total_open_interest: total,
            delta_open_interest_1d: delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::data::mock::{contract, snapshot};
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn chain(rows: &[(i64, OptionSide, Option<i64>)]) -> (ExpiryChains, SnapshotMap) {
        let mut chains = ExpiryChains::new();
        let mut snapshots = SnapshotMap::new();
        for (i, &(offset, side, oi)) in rows.iter().enumerate() {
            let expiry = today() + Duration::days(offset);
            let c = contract(side, 100 + i as i64, expiry);
            snapshots.insert(c.id.clone(), snapshot(oi, None, None));
            chains.entry(expiry).or_default().push(c);
        }
        (chains, snapshots)
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(ExpiryBucket::from_dte(-1), None);
        assert_eq!(ExpiryBucket::from_dte(0), Some(ExpiryBucket::Week));
        assert_eq!(ExpiryBucket::from_dte(7), Some(ExpiryBucket::Week));
        assert_eq!(ExpiryBucket::from_dte(8), Some(ExpiryBucket::Month));
        assert_eq!(ExpiryBucket::from_dte(30), Some(ExpiryBucket::Month));
        assert_eq!(ExpiryBucket::from_dte(31), Some(ExpiryBucket::Quarter));
        assert_eq!(ExpiryBucket::from_dte(90), Some(ExpiryBucket::Quarter));
        assert_eq!(ExpiryBucket::from_dte(91), None);
    }

    #[test]
    fn test_buckets_by_expiry_and_side() {
        let (chains, snapshots) = chain(&[
            (0, OptionSide::Call, Some(10)),
            (7, OptionSide::Put, Some(20)),
            (8, OptionSide::Call, Some(30)),
            (30, OptionSide::Put, Some(40)),
            (31, OptionSide::Call, Some(50)),
            (90, OptionSide::Put, Some(60)),
            (91, OptionSide::Call, Some(1000)),
            (-1, OptionSide::Call, Some(1000)),
            (15, OptionSide::Put, None),
        ]);

        let buckets = bucket_open_interest(&chains, &snapshots, today());
        assert_eq!(buckets.get(ExpiryBucket::Week, OptionSide::Call), 10);
        assert_eq!(buckets.get(ExpiryBucket::Week, OptionSide::Put), 20);
        assert_eq!(buckets.get(ExpiryBucket::Month, OptionSide::Call), 30);
        assert_eq!(buckets.get(ExpiryBucket::Month, OptionSide::Put), 40);
        assert_eq!(buckets.get(ExpiryBucket::Quarter, OptionSide::Call), 50);
        assert_eq!(buckets.get(ExpiryBucket::Quarter, OptionSide::Put), 60);
        assert_eq!(buckets.total(), 210);
    }

    #[test]
    fn test_contracts_without_snapshot_are_ignored() {
        let (chains, _) = chain(&[(5, OptionSide::Call, Some(10))]);
        let buckets = bucket_open_interest(&chains, &SnapshotMap::new(), today());
        assert_eq!(buckets.total(), 0);
    }

    #[test]
    fn test_day_over_day_delta() {
        let cache = OiHistoryCache::new(Box::new(MemoryStore::new()));
        let aggregator = OiAggregator::new(&cache);

        let (chains, snapshots) = chain(&[(10, OptionSide::Call, Some(1000))]);
        let first = aggregator.aggregate("SPY", &chains, &snapshots, today());
        assert_eq!(first.total_open_interest, 1000);
        assert_eq!(first.delta_open_interest_1d, None);

        let tomorrow = today() + Duration::days(1);
        let (chains, snapshots) = chain(&[(9, OptionSide::Call, Some(700)), (9, OptionSide::Put, Some(500))]);
        let second = aggregator.aggregate("SPY", &chains, &snapshots, tomorrow);
        assert_eq!(second.total_open_interest, 1200);
        assert_eq!(second.delta_open_interest_1d, Some(200));
    }

    #[test]
    fn test_cache_failure_still_returns_buckets() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("plain");
        std::fs::write(&blocker, "x").unwrap();
        let cache = OiHistoryCache::open(blocker.join("oi_cache.json"));

        let (chains, snapshots) = chain(&[(10, OptionSide::Call, Some(1000))]);
        let result = OiAggregator::new(&cache).aggregate("SPY", &chains, &snapshots, today());
        assert_eq!(result.total_open_interest, 1000);
        assert_eq!(result.delta_open_interest_1d, None);
    }

    #[test]
    fn test_put_call_ratio() {
        let cache = OiHistoryCache::new(Box::new(MemoryStore::new()));
        let (chains, snapshots) = chain(&[(10, OptionSide::Call, Some(200)), (40, OptionSide::Put, Some(300))]);
        let result = OiAggregator::new(&cache).aggregate("QQQ", &chains, &snapshots, today());
        assert_eq!(result.put_call_ratio(), Some(1.5));

        let (chains, snapshots) = chain(&[(10, OptionSide::Put, Some(300))]);
        let result = OiAggregator::new(&cache).aggregate("IWM", &chains, &snapshots, today());
        assert_eq!(result.put_call_ratio(), None);
    }
}
