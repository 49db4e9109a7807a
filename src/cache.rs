use crate::errors::AppError;
use crate::models::{Filters, SourceStat, SourceStatsSummary};
use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

/// Bumped whenever similarity thresholds or scoring weights change, so results
/// computed under old rules are never served from cache.
pub const ALGORITHM_VERSION: u32 = 1;

/// Samples kept per source for rolling stats.
const STATS_WINDOW: usize = 100;

/// Storage used by the orchestrator for raw per-source results and whole
/// search responses, plus per-source call statistics.
#[async_trait]
pub trait SearchCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn put(&self, key: &str, value: String) -> Result<(), AppError>;

    /// Records one live call. Must never fail the caller.
    async fn record_stat(&self, source: &str, stat: SourceStat);

    async fn source_stats(&self, source: &str) -> Option<SourceStatsSummary>;
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

fn filters_fingerprint(filters: &Filters) -> String {
    serde_json::to_string(filters).unwrap_or_default()
}

/// Key for one source's raw results.
pub fn source_cache_key(source: &str, query: &str, filters: &Filters) -> String {
    format!(
        "source:v{}:{}:{}",
        ALGORITHM_VERSION,
        source,
        digest(&[query.trim(), filters_fingerprint(filters).as_str()])
    )
}

/// Key for a whole aggregated search response.
pub fn search_cache_key(query: &str, filters: &Filters, sources: &[String]) -> String {
    format!(
        "search:v{}:{}",
        ALGORITHM_VERSION,
        digest(&[
            query.trim(),
            filters_fingerprint(filters).as_str(),
            sources.join(",").as_str(),
        ])
    )
}

/// Cached payload with a SHA-256 checksum, verified on every read.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    pub data: String,
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(data: String) -> Self {
        let checksum = digest(&[data.as_str()]);
        Self { data, checksum }
    }

    pub fn is_valid(&self) -> bool {
        digest(&[self.data.as_str()]) == self.checksum
    }

    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::CacheError(format!("Failed to encode cache entry: {}", e)))
    }

    /// Returns the payload when the entry parses and its checksum matches.
    pub fn decode(encoded: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(encoded).ok()?;
        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache entry rejected: checksum mismatch ({} bytes)",
                entry.data.len()
            );
            None
        }
    }
}

/// In-process cache backed by moka with TTL and bounded capacity.
pub struct MokaSearchCache {
    entries: Cache<String, String>,
    stats: Mutex<HashMap<String, VecDeque<SourceStat>>>,
}

impl MokaSearchCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_entries)
            .build();
        tracing::info!(
            "Search cache initialized ({}s TTL, {} capacity)",
            ttl.as_secs(),
            max_entries
        );
        Self {
            entries,
            stats: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SearchCache for MokaSearchCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let Some(encoded) = self.entries.get(key).await else {
            return Ok(None);
        };
        match ValidatedCacheEntry::decode(&encoded) {
            Some(data) => Ok(Some(data)),
            None => {
                self.entries.invalidate(key).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), AppError> {
        let encoded = ValidatedCacheEntry::new(value).encode()?;
        self.entries.insert(key.to_string(), encoded).await;
        Ok(())
    }

    async fn record_stat(&self, source: &str, stat: SourceStat) {
        let mut stats = self.stats.lock().await;
        let window = stats.entry(source.to_string()).or_default();
        if window.len() == STATS_WINDOW {
            window.pop_front();
        }
        window.push_back(stat);
    }

    async fn source_stats(&self, source: &str) -> Option<SourceStatsSummary> {
        let stats = self.stats.lock().await;
        let window = stats.get(source).filter(|w| !w.is_empty())?;
        let calls = window.len();
        Some(SourceStatsSummary {
            calls,
            avg_response_time_ms: window.iter().map(|s| s.response_time_ms).sum::<f64>()
                / calls as f64,
            total_results: window.iter().map(|s| s.results_count).sum(),
            errors: window.iter().filter(|s| s.error).count(),
        })
    }
}
