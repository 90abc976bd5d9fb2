//! Durable per-symbol date → value storage.
//!
//! The store itself makes no promise about concurrent writers. Callers
//! must serialize read-modify-write sequences; [`super::OiHistoryCache`]
//! does so with an in-process lock. Separate processes sharing a file are
//! not coordinated.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, warn};

/// Values for one symbol, oldest date first.
pub type DatedValues = BTreeMap<NaiveDate, i64>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed persistent store with get/set/prune.
pub trait KeyedPersistentStore: Send + Sync {
    /// All stored values for `key`; empty when the key is unknown.
    fn get(&self, key: &str) -> Result<DatedValues, CacheError>;

    /// Insert or overwrite the value for `key` on `date`.
    fn set(&self, key: &str, date: NaiveDate, value: i64) -> Result<(), CacheError>;

    /// Drop every entry for `key` dated on or before `cutoff`.
    fn prune(&self, key: &str, cutoff: NaiveDate) -> Result<(), CacheError>;

    /// [`set`](Self::set) then [`prune`](Self::prune) as a single write.
    /// Implementations backed by durable storage should override this so a
    /// failure leaves neither change behind.
    fn set_and_prune(&self, key: &str, date: NaiveDate, value: i64, cutoff: NaiveDate) -> Result<(), CacheError> {
        self.set(key, date, value)?;
        self.prune(key, cutoff)
    }
}

/// On-disk layout: `{ "SPY": { "2024-03-01": 123456 } }`.
type Document = BTreeMap<String, BTreeMap<String, i64>>;

/// Whole-document JSON file, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty document. So is an unreadable one; it
    /// gets replaced on the next write.
    fn load(&self) -> Result<Document, CacheError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt OI cache, starting empty");
                Ok(Document::new())
            }
        }
    }

    fn save(&self, doc: &Document) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyedPersistentStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<DatedValues, CacheError> {
        let doc = self.load()?;
        let Some(entries) = doc.get(key) else {
            return Ok(DatedValues::new());
        };
        Ok(entries
            .iter()
            .filter_map(|(date, value)| match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                Ok(d) => Some((d, *value)),
                Err(_) => {
                    debug!(key, date = %date, "Skipping unparseable cache date");
                    None
                }
            })
            .collect())
    }

    fn set(&self, key: &str, date: NaiveDate, value: i64) -> Result<(), CacheError> {
        let mut doc = self.load()?;
        doc.entry(key.to_string())
            .or_default()
            .insert(date.format("%Y-%m-%d").to_string(), value);
        self.save(&doc)
    }

    fn prune(&self, key: &str, cutoff: NaiveDate) -> Result<(), CacheError> {
        let mut doc = self.load()?;
        let Some(entries) = doc.get_mut(key) else {
            return Ok(());
        };
        let before = entries.len();
        entries.retain(|date, _| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_or(false, |d| d > cutoff)
        });
        if entries.len() == before {
            return Ok(());
        }
        self.save(&doc)
    }

    fn set_and_prune(&self, key: &str, date: NaiveDate, value: i64, cutoff: NaiveDate) -> Result<(), CacheError> {
        let mut doc = self.load()?;
        let entries = doc.entry(key.to_string()).or_default();
        entries.insert(date.format("%Y-%m-%d").to_string(), value);
        entries.retain(|date, _| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_or(false, |d| d > cutoff)
        });
        self.save(&doc)
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, DatedValues>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DatedValues>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyedPersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<DatedValues, CacheError> {
        Ok(self.lock().get(key).cloned().unwrap_or_default())
    }

    fn set(&self, key: &str, date: NaiveDate, value: i64) -> Result<(), CacheError> {
        self.lock().entry(key.to_string()).or_default().insert(date, value);
        Ok(())
    }

    fn prune(&self, key: &str, cutoff: NaiveDate) -> Result<(), CacheError> {
        if let Some(values) = self.lock().get_mut(key) {
            values.retain(|date, _| *date > cutoff);
        }
        Ok(())
    }

    fn set_and_prune(&self, key: &str, date: NaiveDate, value: i64, cutoff: NaiveDate) -> Result<(), CacheError> {
        let mut entries = self.lock();
        let values = entries.entry(key.to_string()).or_default();
        values.insert(date, value);
        values.retain(|date, _| *date > cutoff);
        Ok(())
    }
}
