//! Daily total open interest per symbol.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use super::store::{CacheError, DatedValues, JsonFileStore, KeyedPersistentStore};

/// Default number of dates kept per symbol, today included.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Symbol → {date → total OI}, pruned to a rolling window on every write.
pub struct OiHistoryCache {
    store: Box<dyn KeyedPersistentStore>,
    retention_days: i64,
    write_lock: Mutex<()>,
}

impl OiHistoryCache {
    pub fn new(store: Box<dyn KeyedPersistentStore>) -> Self {
        Self {
            store,
            retention_days: DEFAULT_RETENTION_DAYS,
            write_lock: Mutex::new(()),
        }
    }

    /// Cache backed by a JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(JsonFileStore::new(path)))
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days.max(1);
        self
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    pub fn history(&self, symbol: &str) -> Result<DatedValues, CacheError> {
        self.store.get(symbol)
    }

    /// Most recent value strictly before `today`, within the retention window.
    pub fn previous(&self, symbol: &str, today: NaiveDate) -> Result<Option<(NaiveDate, i64)>, CacheError> {
        let history = self.store.get(symbol)?;
        Ok(self.lookback(&history, today))
    }

    fn lookback(&self, history: &DatedValues, today: NaiveDate) -> Option<(NaiveDate, i64)> {
        (1..=self.retention_days)
            .map(|back| today - Duration::days(back))
            .find_map(|date| history.get(&date).map(|v| (date, *v)))
    }

    /// Store today's total and return the change from the previous one.
    ///
    /// `None` when nothing was recorded within the look-back window.
    pub fn record(&self, symbol: &str, today: NaiveDate, total: i64) -> Result<Option<i64>, CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let history = self.store.get(symbol)?;
        let previous = self.lookback(&history, today);

        let cutoff = today - Duration::days(self.retention_days);
        self.store.set_and_prune(symbol, today, total, cutoff)?;

        let delta = previous.map(|(_, prev)| total - prev);
        debug!(symbol, %today, total, previous = ?previous.map(|(_, v)| v), delta = ?delta, "OI history updated");
        Ok(delta)
    }
}
