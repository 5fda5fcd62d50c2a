use crate::apis::export::download_export;
use crate::apis::tmdb::TmdbClient;
use crate::config::{Config, Tuning};
use crate::constants::PAGE_RETRY_COOLDOWN_SECS;
use crate::db::SqliteCatalog;
use crate::error::Result;
use crate::pipeline::bulk_import::{import_export, BulkImportStats};
use crate::pipeline::discovery::{DiscoveryStats, DiscoverySync};
use crate::pipeline::enrich::{EnrichStats, EnrichmentWorker};
use crate::pipeline::rate_limiter::RateLimiter;
use crate::pipeline::RunOutcome;
use crate::storage::CatalogStore;
use crate::types::MovieApi;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Result of a full sync run
#[derive(Debug)]
pub struct FullSyncReport {
    pub run_id: Uuid,
    pub downloaded: bool,
    pub import: BulkImportStats,
    pub enrich: EnrichStats,
    pub outcome: RunOutcome,
}

/// Sequences the ingestion/enrichment stages over one store handle.
///
/// The store connection and the rate limiter are acquired once when the
/// pipeline is built and shared by reference with every stage; dropping
/// the pipeline releases the store on every exit path. One limiter
/// governs bulk enrichment and discovery alike.
pub struct Pipeline {
    store: Arc<dyn CatalogStore>,
    api: Arc<dyn MovieApi>,
    limiter: RateLimiter,
    tuning: Tuning,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        api: Arc<dyn MovieApi>,
        tuning: Tuning,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let limiter = RateLimiter::new(
            tuning.rate_limit,
            Duration::from_secs(tuning.rate_interval_secs),
        );
        Self {
            store,
            api,
            limiter,
            tuning,
            stop,
        }
    }

    /// Wire up the SQLite store and the TMDB client from configuration.
    pub fn from_config(config: &Config, stop: Arc<AtomicBool>) -> Result<Self> {
        let store = Arc::new(SqliteCatalog::open(&config.db_path)?);
        let api = Arc::new(TmdbClient::new(
            &config.api_base,
            &config.api_key,
            config.request_timeout(),
        )?);
        Ok(Self::new(store, api, config.tuning.clone(), stop))
    }

    /// Download the daily export, bulk-load stubs, then enrich until no
    /// unenriched record remains (or a stop is requested).
    pub async fn run_full_sync(&self, export_url: &str, export_file: &Path) -> Result<FullSyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("full_sync", run = %run_id);

        async {
            info!("Starting full sync");
            let downloaded = download_export(export_url, export_file).await?;
            let import = import_export(export_file, self.store.as_ref()).await?;
            let (enrich, outcome) = self.enrichment_worker().run(&self.stop).await?;

            info!("Full sync finished: {:?}", outcome);
            Ok(FullSyncReport {
                run_id,
                downloaded,
                import,
                enrich,
                outcome,
            })
        }
        .instrument(span)
        .await
    }

    /// Enrich stubs already in the store, without touching the export.
    pub async fn run_enrichment(&self) -> Result<(EnrichStats, RunOutcome)> {
        let run_id = Uuid::new_v4();
        let span = info_span!("enrich", run = %run_id);
        self.enrichment_worker()
            .run(&self.stop)
            .instrument(span)
            .await
    }

    /// Walk the listing endpoints for movies the catalog is missing.
    pub async fn run_discovery(&self, endpoints: &[String]) -> Result<(DiscoveryStats, RunOutcome)> {
        let run_id = Uuid::new_v4();
        let span = info_span!("discovery", run = %run_id);

        let sync = DiscoverySync::new(
            self.store.as_ref(),
            self.api.as_ref(),
            &self.limiter,
            self.tuning.max_pages_per_endpoint,
            Duration::from_secs(PAGE_RETRY_COOLDOWN_SECS),
        );
        sync.run(endpoints, &self.stop).instrument(span).await
    }

    pub async fn remaining_unenriched(&self) -> Result<u64> {
        self.store.count_unenriched().await
    }

    fn enrichment_worker(&self) -> EnrichmentWorker<'_> {
        EnrichmentWorker::new(
            self.store.as_ref(),
            self.api.as_ref(),
            &self.limiter,
            self.tuning.batch_size,
            self.tuning.max_attempts,
        )
    }
}
