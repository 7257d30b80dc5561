//! Adoption Trends Analyzer — Binary Entrypoint
//! Boots the Axum HTTP server, wiring config, the series store, the findings
//! cache, the model chain, and the Prometheus exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adoption_trends_analyzer::api;
use adoption_trends_analyzer::cache::FindingsCache;
use adoption_trends_analyzer::chain::{ModelCallChain, OpenRouterProvider};
use adoption_trends_analyzer::config::PipelineConfig;
use adoption_trends_analyzer::counters::PerformanceCounters;
use adoption_trends_analyzer::metrics::Metrics;
use adoption_trends_analyzer::orchestrator::Orchestrator;
use adoption_trends_analyzer::series::JsonSeriesStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("adoption_trends_analyzer=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = PipelineConfig::load()?;
    let metrics = Metrics::init(config.models.len());

    let provider = OpenRouterProvider::new(config.base_url.clone(), config.api_key());
    let chain = ModelCallChain::new(Arc::new(provider), config.models.clone(), config.retry);
    let store = JsonSeriesStore::new(
        std::env::var("ANALYZER_DATA_DIR").unwrap_or_else(|_| "data/series".to_string()),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(store),
        chain,
        FindingsCache::new(config.cache_dir.clone()),
        Arc::new(PerformanceCounters::new()),
    ));

    let app = api::create_router(orchestrator).merge(metrics.router());

    let addr: SocketAddr = std::env::var("ANALYZER_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()
        .context("parsing ANALYZER_BIND")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
