use crate::error::Result;
use crate::types::{is_enriched, MovieId, RawMovieData, StubRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Storage trait for the keyed movie catalog.
///
/// The pipeline only ever touches the store through these five operations;
/// anything richer (queries, serving reads) belongs to the application that
/// owns the store.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a stub record unless the id is already present.
    /// Returns whether an insert occurred.
    async fn insert_if_absent(&self, id: MovieId, record: &RawMovieData) -> Result<bool>;

    /// Whole-document upsert: create if absent, else replace the document.
    async fn overwrite(&self, id: MovieId, record: &RawMovieData) -> Result<()>;

    /// Up to `limit` records whose enriched flag is absent or false,
    /// in ascending id order.
    async fn find_unenriched(&self, limit: usize) -> Result<Vec<StubRecord>>;

    /// Membership check used by discovery sync to avoid redundant fetches.
    async fn exists(&self, id: MovieId) -> Result<bool>;

    /// Number of records still awaiting enrichment.
    async fn count_unenriched(&self) -> Result<u64>;
}

/// In-memory catalog for development and testing.
///
/// A BTreeMap keeps `find_unenriched` ordering stable without an index.
pub struct InMemoryCatalog {
    movies: Arc<Mutex<BTreeMap<MovieId, RawMovieData>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            movies: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Direct read of a stored document, for assertions in tests.
    pub fn get(&self, id: MovieId) -> Option<RawMovieData> {
        self.movies.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.movies.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn insert_if_absent(&self, id: MovieId, record: &RawMovieData) -> Result<bool> {
        let mut movies = self.movies.lock().unwrap();
        if movies.contains_key(&id) {
            return Ok(false);
        }
        movies.insert(id, record.clone());
        debug!("Inserted stub movie {}", id);
        Ok(true)
    }

    async fn overwrite(&self, id: MovieId, record: &RawMovieData) -> Result<()> {
        let mut movies = self.movies.lock().unwrap();
        movies.insert(id, record.clone());
        debug!("Overwrote movie {}", id);
        Ok(())
    }

    async fn find_unenriched(&self, limit: usize) -> Result<Vec<StubRecord>> {
        let movies = self.movies.lock().unwrap();
        let stubs = movies
            .iter()
            .filter(|(_, doc)| !is_enriched(doc))
            .take(limit)
            .map(|(id, doc)| StubRecord {
                id: *id,
                doc: doc.clone(),
            })
            .collect();
        Ok(stubs)
    }

    async fn exists(&self, id: MovieId) -> Result<bool> {
        let movies = self.movies.lock().unwrap();
        Ok(movies.contains_key(&id))
    }

    async fn count_unenriched(&self) -> Result<u64> {
        let movies = self.movies.lock().unwrap();
        Ok(movies.values().filter(|doc| !is_enriched(doc)).count() as u64)
    }
}
