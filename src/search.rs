use crate::cache::{search_cache_key, SearchCache};
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    AggregationResult, CacheInfo, Filters, SearchResponse, SearchStats, SourceResults,
    SourceSummary,
};
use crate::orchestrator::SourceOrchestrator;
use crate::pipeline::ResultMerger;
use crate::sources::SourceRegistry;
use std::sync::Arc;
use std::time::Instant;

fn elapsed_seconds(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}

fn search_stats(sources: &SourceResults, started: Instant) -> SearchStats {
    SearchStats {
        total_time_seconds: elapsed_seconds(started),
        sources_used: sources.entries.len(),
        sources_successful: sources.successful(),
        total_raw_results: sources.total_raw_results(),
        by_source: sources
            .entries
            .iter()
            .map(|(source, result)| {
                (
                    source.clone(),
                    SourceSummary {
                        success: result.success,
                        count: result.count,
                        response_time_ms: result.response_time_ms,
                        cached: result.cached,
                        error: result.error.clone(),
                    },
                )
            })
            .collect(),
    }
}

/// Top-level search: whole-result cache, source fan-out, aggregation.
pub struct SearchAggregator {
    orchestrator: SourceOrchestrator,
    merger: ResultMerger,
    cache: Arc<dyn SearchCache>,
}

impl SearchAggregator {
    pub fn new(
        orchestrator: SourceOrchestrator,
        merger: ResultMerger,
        cache: Arc<dyn SearchCache>,
    ) -> Self {
        Self {
            orchestrator,
            merger,
            cache,
        }
    }

    /// Wires the HTTP source adapters and the default pipeline around `cache`.
    pub fn from_config(config: &Config, cache: Arc<dyn SearchCache>) -> Result<Self, AppError> {
        let registry = SourceRegistry::from_config(config)?;
        let orchestrator = SourceOrchestrator::new(config, registry, Arc::clone(&cache));
        Ok(Self::new(orchestrator, ResultMerger::default(), cache))
    }

    pub fn orchestrator(&self) -> &SourceOrchestrator {
        &self.orchestrator
    }

    /// Runs one search end to end.
    ///
    /// Never fails: per-source problems show up in `search_stats.by_source`, a
    /// degraded aggregation in `deduplication_info.error`, and anything else as
    /// an empty response with a top-level `error`.
    pub async fn aggregate_search(
        &self,
        query: &str,
        filters: &Filters,
        sources: &[String],
    ) -> SearchResponse {
        let started = Instant::now();
        let query = query.trim();
        let sources = self.orchestrator.resolve_sources(sources);

        tracing::info!("Search '{}' across {:?}", query, sources);

        match self.run_search(query, filters, &sources, started).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Search '{}' failed: {}", query, e);
                SearchResponse {
                    query: query.to_string(),
                    filters: filters.clone(),
                    sources_requested: sources,
                    search_stats: SearchStats {
                        total_time_seconds: elapsed_seconds(started),
                        ..Default::default()
                    },
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn run_search(
        &self,
        query: &str,
        filters: &Filters,
        sources: &[String],
        started: Instant,
    ) -> Result<SearchResponse, AppError> {
        let key = search_cache_key(query, filters, sources);

        if let Some(data) = self
            .cache
            .get(&key)
            .await
            .context("reading cached search results")?
        {
            match serde_json::from_str::<SearchResponse>(&data) {
                Ok(mut cached) => {
                    tracing::debug!("Serving '{}' from search cache", query);
                    cached.cache_info.from_cache = true;
                    return Ok(cached);
                }
                Err(e) => tracing::warn!("Ignoring unreadable cached search: {}", e),
            }
        }

        let source_results = self.orchestrator.search(query, filters, sources).await;
        let AggregationResult {
            merged,
            duplicates,
            deduplication_info,
        } = self.merger.aggregate(&source_results);

        let cacheable = source_results.successful() > 0 && deduplication_info.error.is_none();
        let response = SearchResponse {
            query: query.to_string(),
            filters: filters.clone(),
            sources_requested: sources.to_vec(),
            total_found: merged.len(),
            aggregated_results: merged,
            duplicates_found: duplicates,
            deduplication_info,
            search_stats: search_stats(&source_results, started),
            cache_info: CacheInfo {
                cached_at: Some(chrono::Utc::now().to_rfc3339()),
                from_cache: false,
            },
            error: None,
        };

        if cacheable {
            let stored = match serde_json::to_string(&response) {
                Ok(data) => self.cache.put(&key, data).await,
                Err(e) => Err(AppError::CacheError(e.to_string())),
            };
            if let Err(e) = stored {
                tracing::warn!("Failed to cache search '{}': {}", query, e);
            }
        }

        tracing::info!(
            "Search '{}' complete: {} results from {}/{} sources in {:.3}s",
            query,
            response.total_found,
            response.search_stats.sources_successful,
            response.search_stats.sources_used,
            response.search_stats.total_time_seconds
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceStat, SourceStatsSummary};
    use async_trait::async_trait;

    struct UnavailableCache;

    #[async_trait]
    impl SearchCache for UnavailableCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
            Err(AppError::CacheError("connection refused".to_string()))
        }

        async fn put(&self, _key: &str, _value: String) -> Result<(), AppError> {
            Err(AppError::CacheError("connection refused".to_string()))
        }

        async fn record_stat(&self, _source: &str, _stat: SourceStat) {}

        async fn source_stats(&self, _source: &str) -> Option<SourceStatsSummary> {
            None
        }
    }

    #[tokio::test]
    async fn test_unavailable_cache_is_a_total_failure() {
        let cache: Arc<dyn SearchCache> = Arc::new(UnavailableCache);
        let orchestrator = SourceOrchestrator::new(
            &Config::default(),
            SourceRegistry::new(),
            Arc::clone(&cache),
        );
        let aggregator = SearchAggregator::new(orchestrator, ResultMerger::default(), cache);

        let response = aggregator
            .aggregate_search("plombier", &Filters::new(), &[])
            .await;

        assert_eq!(response.total_found, 0);
        assert!(response.aggregated_results.is_empty());
        assert!(response.duplicates_found.is_empty());
        assert_eq!(
            response.sources_requested,
            vec!["google_maps".to_string(), "nominatim".to_string()]
        );
        let error = response.error.unwrap();
        assert!(error.contains("reading cached search results"));
        assert!(error.contains("connection refused"));
    }
}
