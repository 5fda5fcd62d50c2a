use crate::constants;
use crate::error::{HarvestError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::time::Duration;

/// Runtime configuration, resolved once at startup.
///
/// Secrets and connection info come from the environment (`.env` supported);
/// tunables may be overridden by an optional `config.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base: String,
    pub export_url: String,
    pub export_file: String,
    pub db_path: String,
    pub tuning: Tuning,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Detail/listing requests allowed per rate window
    pub rate_limit: u32,
    /// Rate window length in seconds
    pub rate_interval_secs: u64,
    /// Records drained from the store per enrichment batch
    pub batch_size: usize,
    /// Transient failures tolerated per record before abandoning it
    pub max_attempts: u32,
    /// Hard cap on pages walked per listing endpoint
    pub max_pages_per_endpoint: u32,
    /// Per-request timeout; expiry is treated as a transient failure
    pub request_timeout_secs: u64,
    /// Listing endpoints walked by discovery sync, in order
    pub discovery_endpoints: Vec<String>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            rate_limit: constants::DEFAULT_RATE_LIMIT,
            rate_interval_secs: constants::DEFAULT_RATE_INTERVAL_SECS,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            max_pages_per_endpoint: constants::DEFAULT_MAX_PAGES_PER_ENDPOINT,
            request_timeout_secs: 30,
            discovery_endpoints: constants::default_discovery_endpoints(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    harvester: Option<Tuning>,
}

impl Config {
    /// Resolve configuration from the environment plus an optional
    /// `config.toml`. Fails fast when the API credential or the store
    /// path is missing.
    pub fn load() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY")
            .map_err(|_| HarvestError::Config("TMDB_API_KEY is not set".to_string()))?;
        let db_path = env::var("CATALOG_DB")
            .map_err(|_| HarvestError::Config("CATALOG_DB is not set".to_string()))?;

        let api_base =
            env::var("TMDB_API_BASE").unwrap_or_else(|_| constants::DEFAULT_API_BASE.to_string());
        let export_url = env::var("TMDB_EXPORT_URL")
            .unwrap_or_else(|_| constants::DEFAULT_EXPORT_URL.to_string());
        let export_file =
            env::var("EXPORT_FILE").unwrap_or_else(|_| constants::DEFAULT_EXPORT_FILE.to_string());

        let tuning = Self::load_tuning("config.toml")?;

        Ok(Config {
            api_key,
            api_base,
            export_url,
            export_file,
            db_path,
            tuning,
        })
    }

    fn load_tuning(path: &str) -> Result<Tuning> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let file: ConfigFile = toml::from_str(&content)?;
                Ok(file.harvester.unwrap_or_default())
            }
            Err(_) => Ok(Tuning::default()),
        }
    }

    pub fn rate_interval(&self) -> Duration {
        Duration::from_secs(self.tuning.rate_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.tuning.request_timeout_secs)
    }
}
