use crate::error::Result;
use crate::pipeline::rate_limiter::RateLimiter;
use crate::pipeline::RunOutcome;
use crate::storage::CatalogStore;
use crate::types::{record_id, stamp_enriched, DetailOutcome, MovieApi, OUTCOME_DETAIL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct DiscoveryStats {
    pub pages: u64,
    pub page_retries: u64,
    pub detail_fetches: u64,
    pub saved: u64,
    pub already_known: u64,
    pub not_found: u64,
    /// Transient detail failures skipped this run
    pub deferred: u64,
}

/// Walks the live listing endpoints and pulls in movies the catalog does
/// not have yet. Known ids are skipped without a detail fetch or a write.
///
/// Endpoints are walked sequentially so listing and detail fetches share
/// one rate budget. A listing page that fails transiently is retried after
/// a cooldown without advancing the page counter. The page total is
/// re-read from every response (it grows as new movies appear) but the
/// walk never exceeds `max_pages` per endpoint.
pub struct DiscoverySync<'a> {
    store: &'a dyn CatalogStore,
    api: &'a dyn MovieApi,
    limiter: &'a RateLimiter,
    max_pages: u32,
    page_cooldown: Duration,
}

impl<'a> DiscoverySync<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        api: &'a dyn MovieApi,
        limiter: &'a RateLimiter,
        max_pages: u32,
        page_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            api,
            limiter,
            max_pages: max_pages.max(1),
            page_cooldown,
        }
    }

    pub async fn run(
        &self,
        endpoints: &[String],
        stop: &AtomicBool,
    ) -> Result<(DiscoveryStats, RunOutcome)> {
        let mut stats = DiscoveryStats::default();

        for endpoint in endpoints {
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested, ending discovery sync");
                return Ok((stats, RunOutcome::Cancelled));
            }
            self.sync_endpoint(endpoint, &mut stats, stop).await?;
        }

        let outcome = if stop.load(Ordering::Relaxed) {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Complete
        };
        Ok((stats, outcome))
    }

    async fn sync_endpoint(
        &self,
        endpoint: &str,
        stats: &mut DiscoveryStats,
        stop: &AtomicBool,
    ) -> Result<()> {
        info!("Syncing listing endpoint /movie/{}", endpoint);
        let mut page = 1u32;
        let mut total_pages = 1u32;

        while page <= total_pages {
            // Cancellation lands between pages, never mid-item
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }

            self.limiter.acquire().await;
            let listing = match self.api.listing_page(endpoint, page).await {
                Ok(listing) => listing,
                Err(e) => {
                    stats.page_retries += 1;
                    warn!(
                        "Page {} of {} failed: {}; retrying in {:?}",
                        page, endpoint, e, self.page_cooldown
                    );
                    tokio::time::sleep(self.page_cooldown).await;
                    continue;
                }
            };
            stats.pages += 1;

            // The reported total can grow mid-walk as movies are added
            if listing.total_pages > self.max_pages && total_pages != self.max_pages {
                info!(
                    "Capping {} walk at {} pages (endpoint reports {})",
                    endpoint, self.max_pages, listing.total_pages
                );
            }
            total_pages = listing.total_pages.min(self.max_pages);

            for item in &listing.results {
                let Some(id) = record_id(item) else {
                    warn!("Listing item without integer id on {} page {}", endpoint, page);
                    continue;
                };

                if self.store.exists(id).await? {
                    stats.already_known += 1;
                    continue;
                }

                self.limiter.acquire().await;
                stats.detail_fetches += 1;
                match self.api.movie_detail(id).await {
                    DetailOutcome::Found(mut detail) => {
                        stamp_enriched(&mut detail, OUTCOME_DETAIL);
                        self.store.overwrite(id, &detail).await?;
                        stats.saved += 1;
                    }
                    DetailOutcome::NotFound => {
                        // Listed but gone by the time we asked; nothing written
                        stats.not_found += 1;
                    }
                    DetailOutcome::Transient(reason) => {
                        stats.deferred += 1;
                        warn!("Transient failure for listed movie {}: {}", id, reason);
                    }
                }
            }

            info!(
                "Finished {} page {}/{}: {} saved, {} already known",
                endpoint, page, total_pages, stats.saved, stats.already_known
            );
            page += 1;
        }
        Ok(())
    }
}
