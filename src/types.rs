use crate::error::Result;
use serde::Deserialize;
use serde_json::Value;

/// External catalog identifier (TMDB movie id)
pub type MovieId = i64;

/// Raw movie document as returned from the API / stored in the catalog
pub type RawMovieData = serde_json::Value;

// Bookkeeping fields attached to stored documents
pub const FIELD_ENRICHED: &str = "enriched";
pub const FIELD_ENRICHED_AT: &str = "enriched_at";
pub const FIELD_OUTCOME: &str = "enrich_outcome";
pub const FIELD_ATTEMPTS: &str = "attempts";

// Values of the enrich_outcome field
pub const OUTCOME_DETAIL: &str = "detail";
pub const OUTCOME_MISSING_UPSTREAM: &str = "missing_upstream";
pub const OUTCOME_ABANDONED: &str = "abandoned";

/// A not-yet-enriched record drained from the store
#[derive(Debug, Clone)]
pub struct StubRecord {
    pub id: MovieId,
    pub doc: RawMovieData,
}

impl StubRecord {
    pub fn attempts(&self) -> u32 {
        self.doc
            .get(FIELD_ATTEMPTS)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    pub fn title(&self) -> Option<&str> {
        self.doc
            .get("original_title")
            .or_else(|| self.doc.get("title"))
            .and_then(Value::as_str)
    }
}

/// Extract the external identifier from a raw document
pub fn record_id(doc: &RawMovieData) -> Option<MovieId> {
    doc.get("id").and_then(Value::as_i64)
}

pub fn is_enriched(doc: &RawMovieData) -> bool {
    doc.get(FIELD_ENRICHED)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Stamp a document as enriched with the given outcome. The timestamp is
/// informational only; selection is driven by the enriched flag.
pub fn stamp_enriched(doc: &mut RawMovieData, outcome: &str) {
    if let Some(map) = doc.as_object_mut() {
        map.insert(FIELD_ENRICHED.to_string(), Value::Bool(true));
        map.insert(
            FIELD_ENRICHED_AT.to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        map.insert(FIELD_OUTCOME.to_string(), Value::String(outcome.to_string()));
    }
}

/// Classified outcome of a single detail fetch.
///
/// NotFound is terminal for the identifier; Transient leaves the decision
/// to retry, skip, or back off with the caller.
#[derive(Debug, Clone)]
pub enum DetailOutcome {
    Found(RawMovieData),
    NotFound,
    Transient(String),
}

/// One page of a paginated listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub page: u32,
    pub results: Vec<RawMovieData>,
    pub total_pages: u32,
}

/// Outbound surface of the external movie catalog API
#[async_trait::async_trait]
pub trait MovieApi: Send + Sync {
    /// Fetch full detail for one identifier, classifying the outcome.
    /// Never retries internally; one classification per call.
    async fn movie_detail(&self, id: MovieId) -> DetailOutcome;

    /// Fetch one page of a listing endpoint. Transient failures surface
    /// as errors for the caller's page-retry loop.
    async fn listing_page(&self, endpoint: &str, page: u32) -> Result<ListingPage>;
}
