use crate::error::Result;
use crate::pipeline::rate_limiter::RateLimiter;
use crate::pipeline::RunOutcome;
use crate::storage::CatalogStore;
use crate::types::{
    stamp_enriched, DetailOutcome, MovieApi, RawMovieData, FIELD_ATTEMPTS, OUTCOME_ABANDONED,
    OUTCOME_DETAIL, OUTCOME_MISSING_UPSTREAM,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct EnrichStats {
    pub enriched: u64,
    pub not_found: u64,
    pub abandoned: u64,
    /// Transient failures left unenriched for a later batch or run
    pub deferred: u64,
    pub batches: u64,
}

/// Drains unenriched stubs from the store in bounded batches and fills
/// them in with full detail from the catalog API.
///
/// The run ends only when a batch comes back empty or the stop flag is
/// observed; a batch full of transient failures does not end it. Each
/// transient failure bumps the stub's attempt counter, and a stub that
/// reaches `max_attempts` is written out as abandoned so the remaining
/// work set keeps shrinking.
pub struct EnrichmentWorker<'a> {
    store: &'a dyn CatalogStore,
    api: &'a dyn MovieApi,
    limiter: &'a RateLimiter,
    batch_size: usize,
    max_attempts: u32,
}

impl<'a> EnrichmentWorker<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        api: &'a dyn MovieApi,
        limiter: &'a RateLimiter,
        batch_size: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            api,
            limiter,
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn run(&self, stop: &AtomicBool) -> Result<(EnrichStats, RunOutcome)> {
        let mut stats = EnrichStats::default();

        loop {
            // Cancellation lands between batches, never mid-item
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested, ending enrichment run");
                return Ok((stats, RunOutcome::Cancelled));
            }

            let batch = self.store.find_unenriched(self.batch_size).await?;
            if batch.is_empty() {
                info!("All movies enriched");
                return Ok((stats, RunOutcome::Complete));
            }
            stats.batches += 1;
            info!("Enriching next {} movies", batch.len());

            for stub in batch {
                self.limiter.acquire().await;
                match self.api.movie_detail(stub.id).await {
                    DetailOutcome::Found(mut detail) => {
                        stamp_enriched(&mut detail, OUTCOME_DETAIL);
                        self.store.overwrite(stub.id, &detail).await?;
                        stats.enriched += 1;
                        debug!(
                            "Enriched movie {} ({})",
                            stub.id,
                            stub.title().unwrap_or("untitled")
                        );
                    }
                    DetailOutcome::NotFound => {
                        // Permanently absent upstream; sentinel keeps it
                        // out of every future batch
                        let mut doc = stub.doc.clone();
                        stamp_enriched(&mut doc, OUTCOME_MISSING_UPSTREAM);
                        self.store.overwrite(stub.id, &doc).await?;
                        stats.not_found += 1;
                    }
                    DetailOutcome::Transient(reason) => {
                        let attempts = stub.attempts() + 1;
                        let mut doc = stub.doc.clone();
                        set_attempts(&mut doc, attempts);

                        if attempts >= self.max_attempts {
                            stamp_enriched(&mut doc, OUTCOME_ABANDONED);
                            self.store.overwrite(stub.id, &doc).await?;
                            stats.abandoned += 1;
                            warn!(
                                "Abandoning movie {} after {} failed attempts: {}",
                                stub.id, attempts, reason
                            );
                        } else {
                            self.store.overwrite(stub.id, &doc).await?;
                            stats.deferred += 1;
                            warn!(
                                "Transient failure for movie {} (attempt {}): {}",
                                stub.id, attempts, reason
                            );
                        }
                    }
                }
            }

            let remaining = self.store.count_unenriched().await?;
            info!(
                "Batch done: {} enriched, {} not found, {} abandoned, {} remaining",
                stats.enriched, stats.not_found, stats.abandoned, remaining
            );
        }
    }
}

fn set_attempts(doc: &mut RawMovieData, attempts: u32) {
    if let Some(map) = doc.as_object_mut() {
        map.insert(FIELD_ATTEMPTS.to_string(), attempts.into());
    }
}
