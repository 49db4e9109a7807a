use axum::{
    routing::{get, post},
    Router,
};
use prospect_search::cache::{MokaSearchCache, SearchCache};
use prospect_search::config::Config;
use prospect_search::handlers::{self, AppState};
use prospect_search::search::SearchAggregator;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the search cache and the source
/// adapters, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prospect_search=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Raw source results and whole search responses share one cache
    let cache: Arc<dyn SearchCache> = Arc::new(MokaSearchCache::new(
        Duration::from_secs(config.cache_ttl_secs),
        config.cache_max_entries,
    ));

    let aggregator = SearchAggregator::from_config(&config, Arc::clone(&cache))
        .map_err(|e| anyhow::anyhow!("Failed to initialize sources: {}", e))?;
    tracing::info!(
        "Sources registered: {:?}",
        aggregator.orchestrator().registry().names()
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        aggregator: Arc::new(aggregator),
        cache,
    });

    let api_routes = Router::new()
        .route("/api/v1/search", post(handlers::search))
        .route("/api/v1/sources/stats", get(handlers::source_stats))
        // Request size limit: 1MB max payload
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(1024 * 1024)));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
