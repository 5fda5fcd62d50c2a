use crate::error::{HarvestError, Result};
use crate::types::{DetailOutcome, ListingPage, MovieApi, MovieId};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument};

/// Client for the TMDB v3 API.
///
/// Detail fetches classify their outcome instead of erroring: a 404 is a
/// terminal NotFound for that id, everything else that goes wrong is
/// Transient and left to the caller. No retries happen here.
pub struct TmdbClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl MovieApi for TmdbClient {
    #[instrument(skip(self))]
    async fn movie_detail(&self, id: MovieId) -> DetailOutcome {
        let url = format!("{}/movie/{}", self.api_base, id);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", "en-US"),
                ("append_to_response", "credits,images"),
            ])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                debug!("Movie {} not found upstream", id);
                DetailOutcome::NotFound
            }
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(doc) => DetailOutcome::Found(doc),
                Err(e) => DetailOutcome::Transient(format!("body decode failed: {e}")),
            },
            Ok(resp) => DetailOutcome::Transient(format!("status {}", resp.status())),
            Err(e) => DetailOutcome::Transient(e.to_string()),
        }
    }

    #[instrument(skip(self))]
    async fn listing_page(&self, endpoint: &str, page: u32) -> Result<ListingPage> {
        let url = format!("{}/movie/{}", self.api_base, endpoint);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.clone()),
                ("language", "en-US".to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(HarvestError::Api {
                message: format!("listing {endpoint} page {page}: status {}", resp.status()),
            });
        }

        let listing: ListingPage = resp.json().await?;
        debug!(
            "Fetched {} page {} ({} results, {} total pages)",
            endpoint,
            page,
            listing.results.len(),
            listing.total_pages
        );
        Ok(listing)
    }
}
