/// Endpoint and tuning constants shared across the harvester
/// These mirror the published TMDB v3 API surface and its rate policy

// Listing endpoints walked by discovery sync, in walk order
pub const POPULAR_ENDPOINT: &str = "popular";
pub const TOP_RATED_ENDPOINT: &str = "top_rated";
pub const UPCOMING_ENDPOINT: &str = "upcoming";
pub const NOW_PLAYING_ENDPOINT: &str = "now_playing";

pub const DEFAULT_API_BASE: &str = "https://api.themoviedb.org/3";
pub const DEFAULT_EXPORT_URL: &str = "http://files.tmdb.org/p/exports/movie_ids.json.gz";
pub const DEFAULT_EXPORT_FILE: &str = "movie_ids.json.gz";

// TMDB allows ~40 requests per 10 seconds; stay under the hard cap
pub const DEFAULT_RATE_LIMIT: u32 = 35;
pub const DEFAULT_RATE_INTERVAL_SECS: u64 = 10;

pub const DEFAULT_BATCH_SIZE: usize = 200;

// Transient failures tolerated per record before it is abandoned
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// Cooldown before retrying a failed listing page
pub const PAGE_RETRY_COOLDOWN_SECS: u64 = 5;

// TMDB never serves listing pages beyond 500
pub const DEFAULT_MAX_PAGES_PER_ENDPOINT: u32 = 500;

// Bulk import progress log cadence (records)
pub const IMPORT_PROGRESS_INTERVAL: u64 = 5000;

/// Listing endpoints in their default walk order
pub fn default_discovery_endpoints() -> Vec<String> {
    vec![
        POPULAR_ENDPOINT.to_string(),
        TOP_RATED_ENDPOINT.to_string(),
        UPCOMING_ENDPOINT.to_string(),
        NOW_PLAYING_ENDPOINT.to_string(),
    ]
}
