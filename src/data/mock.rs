//! Scripted in-memory provider for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::provider::{ProviderError, ProviderKind, QuoteProvider};
use super::types::{ContractSnapshot, OptionContract, OptionSide, SnapshotMap, UnderlyingQuote};

/// Failure to inject into the next call of one operation.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    RateLimited,
    Connectivity,
    Api,
}

impl Failure {
    fn into_error(self) -> ProviderError {
        match self {
            Self::RateLimited => ProviderError::RateLimited("Too many requests".into()),
            Self::Connectivity => ProviderError::Connectivity("connection refused".into()),
            Self::Api => ProviderError::Api {
                status: 500,
                message: "internal error".into(),
            },
        }
    }
}

pub struct MockProvider {
    kind: ProviderKind,
    batch_size: usize,
    contracts: Vec<OptionContract>,
    snapshots: SnapshotMap,
    quotes: Vec<UnderlyingQuote>,
    connect_failure: Option<Failure>,
    contract_failures: Mutex<VecDeque<Failure>>,
    snapshot_failures: Mutex<VecDeque<Failure>>,
    pub contract_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub snapshot_batches: Mutex<Vec<usize>>,
    pub contract_as_of: Mutex<Vec<NaiveDate>>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            batch_size: 400,
            contracts: Vec::new(),
            snapshots: SnapshotMap::new(),
            quotes: Vec::new(),
            connect_failure: None,
            contract_failures: Mutex::new(VecDeque::new()),
            snapshot_failures: Mutex::new(VecDeque::new()),
            contract_calls: AtomicUsize::new(0),
            snapshot_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            snapshot_batches: Mutex::new(Vec::new()),
            contract_as_of: Mutex::new(Vec::new()),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Add a contract with its snapshot.
    pub fn with_contract(mut self, contract: OptionContract, snapshot: ContractSnapshot) -> Self {
        self.snapshots.insert(contract.id.clone(), snapshot);
        self.contracts.push(contract);
        self
    }

    pub fn with_quote(mut self, symbol: &str, price: Decimal) -> Self {
        self.quotes.push(UnderlyingQuote {
            symbol: symbol.to_string(),
            price,
            volume: None,
            prev_close: None,
        });
        self
    }

    pub fn failing_connect(mut self, failure: Failure) -> Self {
        self.connect_failure = Some(failure);
        self
    }

    pub fn fail_contracts(self, failures: &[Failure]) -> Self {
        self.contract_failures.lock().unwrap().extend(failures.iter().copied());
        self
    }

    pub fn fail_snapshots(self, failures: &[Failure]) -> Self {
        self.snapshot_failures.lock().unwrap().extend(failures.iter().copied());
        self
    }

    pub fn calls(&self) -> usize {
        self.contract_calls.load(Ordering::SeqCst)
            + self.snapshot_calls.load(Ordering::SeqCst)
            + self.connect_calls.load(Ordering::SeqCst)
    }
}

/// Contract whose id encodes side, strike and expiry so tests stay readable.
pub fn contract(side: OptionSide, strike: i64, expiry: NaiveDate) -> OptionContract {
    OptionContract::new(
        format!("T{}{}{}", expiry.format("%y%m%d"), side.as_str(), strike),
        side,
        Decimal::from(strike),
        expiry,
    )
}

pub fn snapshot(oi: Option<i64>, iv: Option<f64>, delta: Option<f64>) -> ContractSnapshot {
    ContractSnapshot {
        open_interest: oi,
        implied_volatility: iv,
        delta,
        last_price: None,
    }
}

#[async_trait]
impl QuoteProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.connect_failure {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    async fn list_expirations(&self, _symbol: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let mut dates: Vec<NaiveDate> = self.contracts.iter().map(|c| c.expiry).collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn list_contracts(
        &self,
        _symbol: &str,
        today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OptionContract>, ProviderError> {
        self.contract_calls.fetch_add(1, Ordering::SeqCst);
        self.contract_as_of.lock().unwrap().push(today);
        if let Some(failure) = self.contract_failures.lock().unwrap().pop_front() {
            return Err(failure.into_error());
        }
        Ok(self
            .contracts
            .iter()
            .filter(|c| c.expiry >= start && c.expiry <= end)
            .cloned()
            .collect())
    }

    async fn batch_snapshot(&self, contract_ids: &[String]) -> Result<SnapshotMap, ProviderError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot_batches.lock().unwrap().push(contract_ids.len());
        if let Some(failure) = self.snapshot_failures.lock().unwrap().pop_front() {
            return Err(failure.into_error());
        }
        Ok(contract_ids
            .iter()
            .filter_map(|id| self.snapshots.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn underlying_quotes(&self, symbols: &[String]) -> Result<Vec<UnderlyingQuote>, ProviderError> {
        Ok(self
            .quotes
            .iter()
            .filter(|q| symbols.contains(&q.symbol))
            .cloned()
            .collect())
    }
}
