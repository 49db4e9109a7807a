use crate::cache::SearchCache;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{SearchRequest, SearchResponse, SourceStatsSummary};
use crate::search::SearchAggregator;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Search entry point (source fan-out + aggregation).
    pub aggregator: Arc<SearchAggregator>,
    /// Cache shared with the aggregator; also holds rolling source stats.
    pub cache: Arc<dyn SearchCache>,
}

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "prospect-search",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/search
///
/// Queries the requested sources (or the configured defaults), deduplicates
/// and ranks the results. Partial source failures are reported inside the
/// response, not as an HTTP error.
///
/// # Returns
///
/// * `Result<Json<SearchResponse>, AppError>` - The aggregated response, or 400 on a blank query.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::BadRequest("query cannot be empty".to_string()));
    }

    tracing::info!(
        "POST /api/v1/search - query: '{}', sources: {:?}, filters: {:?}",
        query,
        request.sources,
        request.filters
    );

    let response = state
        .aggregator
        .aggregate_search(query, &request.filters, &request.sources)
        .await;

    if response.total_found == 0 {
        if let Some(error) = &response.error {
            tracing::warn!("Search '{}' returned nothing: {}", query, error);
        }
    }

    Ok(Json(response))
}

/// GET /api/v1/sources/stats
///
/// Rolling call statistics for every registered source. Sources never called yet report zeros.
pub async fn source_stats(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, SourceStatsSummary>> {
    let mut stats = BTreeMap::new();
    for source in state.aggregator.orchestrator().registry().names() {
        let summary = state.cache.source_stats(&source).await.unwrap_or_default();
        stats.insert(source, summary);
    }
    Json(stats)
}
