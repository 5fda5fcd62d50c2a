use async_trait::async_trait;
use mra_harvester::error::{HarvestError, Result};
use mra_harvester::pipeline::bulk_import::import_export;
use mra_harvester::pipeline::discovery::DiscoverySync;
use mra_harvester::pipeline::enrich::EnrichmentWorker;
use mra_harvester::pipeline::rate_limiter::RateLimiter;
use mra_harvester::pipeline::RunOutcome;
use mra_harvester::storage::{CatalogStore, InMemoryCatalog};
use mra_harvester::types::{
    DetailOutcome, ListingPage, MovieApi, MovieId, FIELD_ATTEMPTS, FIELD_ENRICHED, FIELD_OUTCOME,
    OUTCOME_ABANDONED, OUTCOME_MISSING_UPSTREAM,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Scripted stand-in for the TMDB API.
#[derive(Default)]
struct MockApi {
    not_found: HashSet<MovieId>,
    always_transient: HashSet<MovieId>,
    listings: HashMap<String, Vec<ListingPage>>,
    fail_page_once: Mutex<HashSet<(String, u32)>>,
    detail_calls: Mutex<Vec<MovieId>>,
    /// Flip this flag once the given number of detail calls have been made
    stop_after_details: Option<(usize, Arc<AtomicBool>)>,
}

impl MockApi {
    fn detail_call_count(&self) -> usize {
        self.detail_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MovieApi for MockApi {
    async fn movie_detail(&self, id: MovieId) -> DetailOutcome {
        let calls = {
            let mut calls = self.detail_calls.lock().unwrap();
            calls.push(id);
            calls.len()
        };
        if let Some((limit, flag)) = &self.stop_after_details {
            if calls >= *limit {
                flag.store(true, Ordering::Relaxed);
            }
        }

        if self.not_found.contains(&id) {
            return DetailOutcome::NotFound;
        }
        if self.always_transient.contains(&id) {
            return DetailOutcome::Transient("connection reset".to_string());
        }
        DetailOutcome::Found(json!({
            "id": id,
            "original_title": format!("Movie {id}"),
            "runtime": 100,
        }))
    }

    async fn listing_page(&self, endpoint: &str, page: u32) -> Result<ListingPage> {
        let mut failing = self.fail_page_once.lock().unwrap();
        if failing.remove(&(endpoint.to_string(), page)) {
            return Err(HarvestError::Api {
                message: "listing unavailable".to_string(),
            });
        }
        drop(failing);

        self.listings
            .get(endpoint)
            .and_then(|pages| pages.get((page - 1) as usize))
            .cloned()
            .ok_or_else(|| HarvestError::Api {
                message: format!("no page {page} for {endpoint}"),
            })
    }
}

fn listing(page: u32, total_pages: u32, ids: &[MovieId]) -> ListingPage {
    ListingPage {
        page,
        results: ids.iter().map(|id| json!({"id": id})).collect(),
        total_pages,
    }
}

async fn seed_stubs(store: &InMemoryCatalog, ids: &[MovieId]) {
    for id in ids {
        store
            .insert_if_absent(*id, &json!({"id": id, "original_title": format!("Stub {id}")}))
            .await
            .unwrap();
    }
}

fn wide_limiter() -> RateLimiter {
    RateLimiter::new(1000, Duration::from_secs(10))
}

#[tokio::test]
async fn enrichment_converges_in_bounded_batches() {
    let store = InMemoryCatalog::new();
    seed_stubs(&store, &[1, 2, 3, 4, 5]).await;
    let api = MockApi::default();
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let worker = EnrichmentWorker::new(&store, &api, &limiter, 2, 5);
    let (stats, outcome) = worker.run(&stop).await.unwrap();

    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.enriched, 5);
    // 5 stubs at batch size 2 means batches of 2, 2, 1
    assert_eq!(stats.batches, 3);
    assert_eq!(store.count_unenriched().await.unwrap(), 0);

    let doc = store.get(3).unwrap();
    assert_eq!(doc[FIELD_ENRICHED], true);
    assert_eq!(doc["runtime"], 100);
}

#[tokio::test]
async fn not_found_is_permanent() {
    let store = InMemoryCatalog::new();
    seed_stubs(&store, &[7]).await;
    let api = MockApi {
        not_found: HashSet::from([7]),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let worker = EnrichmentWorker::new(&store, &api, &limiter, 10, 5);
    let (stats, _) = worker.run(&stop).await.unwrap();
    assert_eq!(stats.not_found, 1);

    let doc = store.get(7).unwrap();
    assert_eq!(doc[FIELD_OUTCOME], OUTCOME_MISSING_UPSTREAM);
    // Stub fields survive the sentinel write
    assert_eq!(doc["original_title"], "Stub 7");

    // A second run must not re-select or re-fetch the id
    let calls_before = api.detail_call_count();
    let (stats, outcome) = worker.run(&stop).await.unwrap();
    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.not_found, 0);
    assert_eq!(api.detail_call_count(), calls_before);
}

#[tokio::test]
async fn persistent_transient_failure_is_abandoned_at_the_cap() {
    let store = InMemoryCatalog::new();
    seed_stubs(&store, &[9]).await;
    let api = MockApi {
        always_transient: HashSet::from([9]),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let worker = EnrichmentWorker::new(&store, &api, &limiter, 10, 3);
    let (stats, outcome) = worker.run(&stop).await.unwrap();

    // The run still terminates even though every fetch failed
    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.deferred, 2);
    assert_eq!(api.detail_call_count(), 3);

    let doc = store.get(9).unwrap();
    assert_eq!(doc[FIELD_OUTCOME], OUTCOME_ABANDONED);
    assert_eq!(doc[FIELD_ATTEMPTS], 3);
    assert_eq!(store.count_unenriched().await.unwrap(), 0);
}

#[tokio::test]
async fn bulk_reimport_never_clobbers_enriched_records() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut encoder =
        flate2::write::GzEncoder::new(file.reopen().unwrap(), flate2::Compression::default());
    writeln!(encoder, r#"{{"id":1,"original_title":"A"}}"#).unwrap();
    encoder.finish().unwrap();

    let store = InMemoryCatalog::new();
    import_export(file.path(), &store).await.unwrap();

    let api = MockApi::default();
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);
    let worker = EnrichmentWorker::new(&store, &api, &limiter, 10, 5);
    worker.run(&stop).await.unwrap();

    // Next day's import of the same id is a no-op
    let stats = import_export(file.path(), &store).await.unwrap();
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.already_present, 1);

    let doc = store.get(1).unwrap();
    assert_eq!(doc["runtime"], 100);
    assert_eq!(doc[FIELD_ENRICHED], true);
}

#[tokio::test]
async fn cancellation_lands_between_batches() {
    let store = InMemoryCatalog::new();
    seed_stubs(&store, &[1, 2, 3, 4, 5]).await;
    let stop = Arc::new(AtomicBool::new(false));
    let api = MockApi {
        // Request a stop during the first batch of two
        stop_after_details: Some((1, stop.clone())),
        ..Default::default()
    };
    let limiter = wide_limiter();

    let worker = EnrichmentWorker::new(&store, &api, &limiter, 2, 5);
    let (stats, outcome) = worker.run(&stop).await.unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    // The in-flight batch finished; nothing after it started
    assert_eq!(stats.enriched, 2);
    assert_eq!(store.count_unenriched().await.unwrap(), 3);
}

#[tokio::test]
async fn enrichment_respects_the_rate_window() {
    let store = InMemoryCatalog::new();
    seed_stubs(&store, &[1, 2, 3, 4, 5]).await;
    let api = MockApi::default();
    let interval = Duration::from_millis(150);
    let limiter = RateLimiter::new(2, interval);
    let stop = AtomicBool::new(false);

    let worker = EnrichmentWorker::new(&store, &api, &limiter, 10, 5);
    let start = Instant::now();
    let (stats, _) = worker.run(&stop).await.unwrap();

    assert_eq!(stats.enriched, 5);
    // Five fetches at two per window span at least three windows
    assert!(start.elapsed() >= interval * 2);
}

#[tokio::test]
async fn discovery_skips_known_ids_without_fetching() {
    let store = InMemoryCatalog::new();
    seed_stubs(&store, &[1, 2, 3]).await;
    let ids: Vec<MovieId> = (1..=10).collect();
    let api = MockApi {
        listings: HashMap::from([("popular".to_string(), vec![listing(1, 1, &ids)])]),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let sync = DiscoverySync::new(&store, &api, &limiter, 500, Duration::from_millis(10));
    let (stats, outcome) = sync.run(&["popular".to_string()], &stop).await.unwrap();

    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.already_known, 3);
    assert_eq!(stats.detail_fetches, 7);
    assert_eq!(stats.saved, 7);
    assert_eq!(store.len(), 10);
    // None of the pre-existing ids were fetched
    let calls = api.detail_calls.lock().unwrap().clone();
    assert!(calls.iter().all(|id| *id > 3));
}

#[tokio::test]
async fn discovery_retries_a_failed_page_without_advancing() {
    let store = InMemoryCatalog::new();
    let api = MockApi {
        listings: HashMap::from([(
            "upcoming".to_string(),
            vec![listing(1, 2, &[1, 2]), listing(2, 2, &[3])],
        )]),
        fail_page_once: Mutex::new(HashSet::from([("upcoming".to_string(), 2)])),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let sync = DiscoverySync::new(&store, &api, &limiter, 500, Duration::from_millis(10));
    let (stats, _) = sync.run(&["upcoming".to_string()], &stop).await.unwrap();

    assert_eq!(stats.page_retries, 1);
    assert_eq!(stats.pages, 2);
    assert_eq!(stats.saved, 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn discovery_follows_growing_totals_up_to_the_cap() {
    let store = InMemoryCatalog::new();
    // Page 1 claims two pages; page 2 appears mid-walk claiming five
    let api = MockApi {
        listings: HashMap::from([(
            "now_playing".to_string(),
            vec![listing(1, 2, &[1]), listing(2, 5, &[2]), listing(3, 5, &[3])],
        )]),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    // Cap of three pages beats the endpoint's claim of five
    let sync = DiscoverySync::new(&store, &api, &limiter, 3, Duration::from_millis(10));
    let (stats, outcome) = sync.run(&["now_playing".to_string()], &stop).await.unwrap();

    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.saved, 3);
}

#[tokio::test]
async fn discovery_stops_between_endpoints_when_cancelled() {
    let store = InMemoryCatalog::new();
    let stop = Arc::new(AtomicBool::new(false));
    let api = MockApi {
        listings: HashMap::from([
            ("popular".to_string(), vec![listing(1, 1, &[1, 2])]),
            ("top_rated".to_string(), vec![listing(1, 1, &[3, 4])]),
        ]),
        stop_after_details: Some((1, stop.clone())),
        ..Default::default()
    };
    let limiter = wide_limiter();

    let sync = DiscoverySync::new(&store, &api, &limiter, 500, Duration::from_millis(10));
    let (stats, outcome) = sync
        .run(&["popular".to_string(), "top_rated".to_string()], &stop)
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    // The first endpoint's page finished; the second was never started
    assert_eq!(stats.saved, 2);
    assert!(!store.exists(3).await.unwrap());
}

#[tokio::test]
async fn transient_detail_failure_during_discovery_is_deferred() {
    let store = InMemoryCatalog::new();
    let api = MockApi {
        listings: HashMap::from([("popular".to_string(), vec![listing(1, 1, &[1, 2])])]),
        always_transient: HashSet::from([2]),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let sync = DiscoverySync::new(&store, &api, &limiter, 500, Duration::from_millis(10));
    let (stats, outcome) = sync.run(&["popular".to_string()], &stop).await.unwrap();

    // The failed item is skipped, not fatal; the page still completes
    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.saved, 1);
    assert_eq!(stats.deferred, 1);
    assert!(!store.exists(2).await.unwrap());
}

#[tokio::test]
async fn sqlite_store_round_trips_the_pipeline() {
    use mra_harvester::db::SqliteCatalog;

    let store = SqliteCatalog::open_in_memory().unwrap();
    for id in [11, 12] {
        store
            .insert_if_absent(id, &json!({"id": id, "original_title": format!("Stub {id}")}))
            .await
            .unwrap();
    }

    let api = MockApi {
        not_found: HashSet::from([12]),
        ..Default::default()
    };
    let limiter = wide_limiter();
    let stop = AtomicBool::new(false);

    let worker = EnrichmentWorker::new(&store, &api, &limiter, 10, 5);
    let (stats, outcome) = worker.run(&stop).await.unwrap();

    assert_eq!(outcome, RunOutcome::Complete);
    assert_eq!(stats.enriched, 1);
    assert_eq!(stats.not_found, 1);
    assert_eq!(store.count_unenriched().await.unwrap(), 0);

    let remaining: Vec<Value> = store
        .find_unenriched(10)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.doc)
        .collect();
    assert!(remaining.is_empty());
}
