use crate::cache::{source_cache_key, SearchCache};
use crate::circuit_breaker::SourceBreakers;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{CandidateRecord, Filters, SourceResult, SourceResults, SourceStat};
use crate::pipeline::elapsed_ms;
use crate::sources::{SourceAdapter, SourceRegistry};
use failsafe::futures::CircuitBreaker;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Fans a query out to the requested sources and collates one `SourceResult` per source.
///
/// Every source is isolated: cache problems count as a miss, and adapter errors,
/// timeouts and open circuits become `success: false` entries. `search` itself
/// cannot fail.
#[derive(Clone)]
pub struct SourceOrchestrator {
    registry: SourceRegistry,
    cache: Arc<dyn SearchCache>,
    breakers: Arc<SourceBreakers>,
    timeout: Duration,
    concurrent: bool,
    default_sources: Vec<String>,
}

impl SourceOrchestrator {
    pub fn new(config: &Config, registry: SourceRegistry, cache: Arc<dyn SearchCache>) -> Self {
        let names = registry.names();
        let breakers = SourceBreakers::for_sources(names.iter().map(String::as_str));
        Self {
            registry,
            cache,
            breakers: Arc::new(breakers),
            timeout: Duration::from_secs(config.source_timeout_secs),
            concurrent: config.concurrent_fetch,
            default_sources: config.default_sources.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Sources a request actually queries: the request's own, or the defaults when it names none.
    ///
    /// Repeated ids collapse to their first occurrence.
    pub fn resolve_sources(&self, sources: &[String]) -> Vec<String> {
        let requested = if sources.is_empty() {
            self.default_sources.as_slice()
        } else {
            sources
        };
        let mut seen = HashSet::new();
        requested
            .iter()
            .filter(|source| seen.insert(source.as_str()))
            .cloned()
            .collect()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub async fn search(&self, query: &str, filters: &Filters, sources: &[String]) -> SourceResults {
        let query = query.trim();
        let sources = self.resolve_sources(sources);
        let started = Instant::now();

        let results = if self.concurrent {
            match self.search_concurrent(query, filters, &sources).await {
                Some(results) => results,
                None => {
                    tracing::warn!(
                        "No tokio runtime to spawn on, querying {} sources sequentially",
                        sources.len()
                    );
                    self.search_sequential(query, filters, &sources).await
                }
            }
        } else {
            self.search_sequential(query, filters, &sources).await
        };

        tracing::info!(
            "Queried {} sources in {:.2}ms ({} successful)",
            sources.len(),
            elapsed_ms(started),
            results.successful()
        );
        results
    }

    /// One task per source. A task that panics or is cancelled becomes a failed
    /// entry for its own source. `None` when there is no runtime to spawn on.
    pub async fn search_concurrent(
        &self,
        query: &str,
        filters: &Filters,
        sources: &[String],
    ) -> Option<SourceResults> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let started = Instant::now();

        let handles = sources.iter().map(|source| {
            let orchestrator = self.clone();
            let source = source.clone();
            let query = query.to_string();
            let filters = filters.clone();
            runtime.spawn(async move { orchestrator.fetch_source(&source, &query, &filters).await })
        });

        let mut results = SourceResults::default();
        for (source, joined) in sources.iter().zip(join_all(handles).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Task for source {} did not complete: {}", source, e);
                    self.task_failed(source, e.to_string(), started)
                }
            };
            results.push(source.clone(), result);
        }
        Some(results)
    }

    pub async fn search_sequential(
        &self,
        query: &str,
        filters: &Filters,
        sources: &[String],
    ) -> SourceResults {
        let mut results = SourceResults::default();
        for source in sources {
            let started = Instant::now();
            let result = match AssertUnwindSafe(self.fetch_source(source, query, filters))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    tracing::error!("Fetch for source {} panicked: {}", source, reason);
                    self.task_failed(source, reason, started)
                }
            };
            results.push(source.clone(), result);
        }
        results
    }

    fn task_failed(&self, source: &str, reason: String, started: Instant) -> SourceResult {
        let result = SourceResult::failed(
            format!("{} task failed: {}", source, reason),
            elapsed_ms(started),
        );
        self.spawn_stat(source, &result);
        result
    }

    /// Cache lookup, then a guarded live call on miss.
    pub async fn fetch_source(&self, source: &str, query: &str, filters: &Filters) -> SourceResult {
        let Some(adapter) = self.registry.get(source) else {
            tracing::warn!("Unknown source requested: {}", source);
            return SourceResult::failed(format!("Unknown source: {}", source), 0.0);
        };

        let key = source_cache_key(source, query, filters);
        if let Some(results) = self.cached_results(source, &key).await {
            tracing::debug!("Cache hit for {} ({} results)", source, results.len());
            return SourceResult::ok(results, 0.0, true);
        }

        let started = Instant::now();
        let outcome = self.call_guarded(source, adapter, query, filters).await;
        let response_time_ms = elapsed_ms(started);

        let result = match outcome {
            Ok(records) => {
                tracing::info!(
                    "{}: {} results in {:.2}ms",
                    source,
                    records.len(),
                    response_time_ms
                );
                self.store_results(source, &key, &records).await;
                SourceResult::ok(records, response_time_ms, false)
            }
            Err(e) => {
                tracing::warn!("{} failed after {:.2}ms: {}", source, response_time_ms, e);
                SourceResult::failed(e.to_string(), response_time_ms)
            }
        };

        self.spawn_stat(source, &result);
        result
    }

    async fn call_guarded(
        &self,
        source: &str,
        adapter: Arc<dyn SourceAdapter>,
        query: &str,
        filters: &Filters,
    ) -> Result<Vec<CandidateRecord>, AppError> {
        let timeout = self.timeout;
        let call = async move {
            match tokio::time::timeout(timeout, adapter.fetch(query, filters)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "{} did not respond within {}s",
                    adapter.name(),
                    timeout.as_secs_f64()
                ))),
            }
        };

        let Some(breaker) = self.breakers.get(source) else {
            return call.await;
        };

        breaker.call(call).await.map_err(|e| match e {
            failsafe::Error::Inner(e) => e,
            failsafe::Error::Rejected => {
                AppError::ExternalApiError("circuit open".to_string())
            }
        })
    }

    async fn cached_results(&self, source: &str, key: &str) -> Option<Vec<CandidateRecord>> {
        match self.cache.get(key).await {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(results) => Some(results),
                Err(e) => {
                    tracing::warn!("Discarding unreadable cache entry for {}: {}", source, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}, fetching live: {}", source, e);
                None
            }
        }
    }

    async fn store_results(&self, source: &str, key: &str, records: &[CandidateRecord]) {
        let stored = match serde_json::to_string(records) {
            Ok(data) => self.cache.put(key, data).await,
            Err(e) => Err(AppError::CacheError(e.to_string())),
        };
        if let Err(e) = stored {
            tracing::warn!("Failed to cache results for {}: {}", source, e);
        }
    }

    fn spawn_stat(&self, source: &str, result: &SourceResult) {
        let cache = Arc::clone(&self.cache);
        let source = source.to_string();
        let stat = SourceStat {
            response_time_ms: result.response_time_ms,
            results_count: result.count,
            error: !result.success,
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            cache.record_stat(&source, stat).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaSearchCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for CountingAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(
            &self,
            query: &str,
            _filters: &Filters,
        ) -> Result<Vec<CandidateRecord>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::ExternalApiError("provider down".to_string()));
            }
            Ok(vec![CandidateRecord {
                name: Some(format!("{} result", query)),
                source: Some(self.name.to_string()),
                ..Default::default()
            }])
        }
    }

    struct PanickingAdapter;

    #[async_trait]
    impl SourceAdapter for PanickingAdapter {
        fn name(&self) -> &str {
            "bad"
        }

        async fn fetch(
            &self,
            _query: &str,
            _filters: &Filters,
        ) -> Result<Vec<CandidateRecord>, AppError> {
            panic!("malformed provider payload")
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl SourceAdapter for SlowAdapter {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(
            &self,
            _query: &str,
            _filters: &Filters,
        ) -> Result<Vec<CandidateRecord>, AppError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn adapter(name: &'static str, fail: bool) -> Arc<CountingAdapter> {
        Arc::new(CountingAdapter {
            name,
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn orchestrator(adapters: Vec<Arc<dyn SourceAdapter>>) -> SourceOrchestrator {
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let cache = Arc::new(MokaSearchCache::new(Duration::from_secs(60), 100));
        SourceOrchestrator::new(&Config::default(), registry, cache)
    }

    fn names(sources: &[&str]) -> Vec<String> {
        sources.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_search_is_served_from_cache() {
        let ok = adapter("ok", false);
        let orchestrator = orchestrator(vec![ok.clone()]);

        let first = orchestrator.search("garage", &Filters::new(), &names(&["ok"])).await;
        let second = orchestrator.search("garage", &Filters::new(), &names(&["ok"])).await;

        assert!(!first.get("ok").unwrap().cached);
        let cached = second.get("ok").unwrap();
        assert!(cached.cached);
        assert_eq!(cached.response_time_ms, 0.0);
        assert_eq!(cached.results, first.get("ok").unwrap().results);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_not_cached() {
        let down = adapter("down", true);
        let orchestrator = orchestrator(vec![down.clone(), adapter("ok", false)]);
        let sources = names(&["down", "ok", "missing"]);

        let results = orchestrator.search("garage", &Filters::new(), &sources).await;
        let order: Vec<&str> = results.entries.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, vec!["down", "ok", "missing"]);

        let failed = results.get("down").unwrap();
        assert!(!failed.success);
        assert_eq!(failed.count, 0);
        assert_eq!(failed.error.as_deref(), Some("External API error: provider down"));
        assert_eq!(
            results.get("missing").unwrap().error.as_deref(),
            Some("Unknown source: missing")
        );
        assert!(results.get("ok").unwrap().success);

        orchestrator.search("garage", &Filters::new(), &sources).await;
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_a_source_failure() {
        let orchestrator = orchestrator(vec![Arc::new(SlowAdapter), adapter("ok", false)])
            .with_timeout(Duration::from_millis(20));

        let results = orchestrator
            .search("garage", &Filters::new(), &names(&["slow", "ok"]))
            .await;

        let slow = results.get("slow").unwrap();
        assert!(!slow.success);
        assert!(slow.error.as_deref().unwrap().contains("did not respond"));
        assert!(results.get("ok").unwrap().success);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_failures() {
        let down = adapter("down", true);
        let orchestrator = orchestrator(vec![down.clone()]);

        for i in 0..6 {
            let query = format!("query {}", i);
            orchestrator.search(&query, &Filters::new(), &names(&["down"])).await;
        }

        let results = orchestrator
            .search("another", &Filters::new(), &names(&["down"]))
            .await;
        assert_eq!(
            results.get("down").unwrap().error.as_deref(),
            Some("External API error: circuit open")
        );
        assert_eq!(down.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_sequential_matches_concurrent() {
        let sources = names(&["a", "b", "down"]);
        let build = || orchestrator(vec![adapter("a", false), adapter("b", false), adapter("down", true)]);

        let concurrent = build().search("café", &Filters::new(), &sources).await;
        let sequential = build()
            .with_concurrency(false)
            .search("café", &Filters::new(), &sources)
            .await;

        let shape = |r: &SourceResults| {
            r.entries
                .iter()
                .map(|(s, r)| (s.clone(), r.success, r.results.clone(), r.error.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&concurrent), shape(&sequential));
    }

    #[tokio::test]
    async fn test_empty_sources_use_defaults() {
        let orchestrator = orchestrator(vec![]);
        let results = orchestrator.search("garage", &Filters::new(), &[]).await;
        let order: Vec<&str> = results.entries.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, vec!["google_maps", "nominatim"]);
    }

    #[tokio::test]
    async fn test_panicking_source_fails_alone_on_both_paths() {
        let sources = names(&["bad", "ok"]);
        let build = || orchestrator(vec![Arc::new(PanickingAdapter), adapter("ok", false)]);

        for concurrent in [true, false] {
            let results = build()
                .with_concurrency(concurrent)
                .search("garage", &Filters::new(), &sources)
                .await;

            let order: Vec<&str> = results.entries.iter().map(|(s, _)| s.as_str()).collect();
            assert_eq!(order, vec!["bad", "ok"]);

            let bad = results.get("bad").unwrap();
            assert!(!bad.success);
            assert_eq!(bad.count, 0);
            assert!(bad.error.as_deref().unwrap().starts_with("bad task failed"));

            let ok = results.get("ok").unwrap();
            assert!(ok.success);
            assert_eq!(ok.count, 1);
        }
    }

    #[tokio::test]
    async fn test_sequential_path_reports_panic_message() {
        let results = orchestrator(vec![Arc::new(PanickingAdapter)])
            .with_concurrency(false)
            .search("garage", &Filters::new(), &names(&["bad"]))
            .await;

        assert_eq!(
            results.get("bad").unwrap().error.as_deref(),
            Some("bad task failed: malformed provider payload")
        );
    }

    #[test]
    fn test_concurrent_path_needs_a_runtime() {
        let orchestrator = orchestrator(vec![adapter("ok", false)]);
        let outcome = futures::executor::block_on(orchestrator.search_concurrent(
            "garage",
            &Filters::new(),
            &names(&["ok"]),
        ));
        assert!(outcome.is_none());
    }

    #[test]
    fn test_repeated_sources_collapse_in_order() {
        let orchestrator = orchestrator(vec![]);
        assert_eq!(
            orchestrator.resolve_sources(&names(&["b", "a", "b", "c", "a"])),
            names(&["b", "a", "c"])
        );
    }

    #[tokio::test]
    async fn test_query_is_trimmed_before_fetching() {
        let ok = adapter("ok", false);
        let orchestrator = orchestrator(vec![ok.clone()]);

        let padded = orchestrator.search("  garage ", &Filters::new(), &names(&["ok"])).await;
        assert_eq!(
            padded.get("ok").unwrap().results[0].name.as_deref(),
            Some("garage result")
        );

        let plain = orchestrator.search("garage", &Filters::new(), &names(&["ok"])).await;
        assert!(plain.get("ok").unwrap().cached);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }
}
