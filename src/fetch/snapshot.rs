//! Batched per-contract snapshot retrieval.

use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiter;
use crate::data::{ExpiryChains, QuoteProvider, SnapshotMap};

/// Identifiers of every contract across all expiries, in expiry order.
pub fn contract_ids(chains: &ExpiryChains) -> Vec<String> {
    chains
        .values()
        .flat_map(|contracts| contracts.iter().map(|c| c.id.clone()))
        .collect()
}

/// Chunks identifiers to the provider's batch limit, one rate-limited call
/// per chunk. Failed chunks are skipped, so the result may be sparse.
pub struct SnapshotFetcher<'a> {
    provider: &'a dyn QuoteProvider,
    limiter: &'a RateLimiter,
    batch_size: usize,
}

impl<'a> SnapshotFetcher<'a> {
    pub fn new(provider: &'a dyn QuoteProvider, limiter: &'a RateLimiter) -> Self {
        Self {
            provider,
            limiter,
            batch_size: provider.max_batch_size().max(1),
        }
    }

    pub async fn fetch(&self, ids: &[String]) -> SnapshotMap {
        let mut snapshots = SnapshotMap::with_capacity(ids.len());
        let mut failed_chunks = 0usize;

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            self.limiter.acquire().await;
            match self.provider.batch_snapshot(chunk).await {
                Ok(batch) => {
                    debug!(chunk = index, requested = chunk.len(), returned = batch.len(), "snapshot chunk");
                    snapshots.extend(batch);
                }
                Err(e) => {
                    failed_chunks += 1;
                    warn!(
                        provider = %self.provider.kind(),
                        chunk = index,
                        size = chunk.len(),
                        error = %e,
                        "Snapshot chunk failed, skipping"
                    );
                }
            }
        }

        info!(
            provider = %self.provider.kind(),
            requested = ids.len(),
            returned = snapshots.len(),
            failed_chunks,
            "Fetched contract snapshots"
        );
        snapshots
    }
}
