use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use findash::api::health::HealthState;
use findash::api::latency::LatencyStats;
use findash::api::{router, ApiState};
use findash::config::Config;
use findash::db::{RecordStore, SqliteStore};
use findash::error::Result;
use findash::fetcher::{http_client, NewsApiClient, NewsFetcher, QuoteFetcher, YahooChartClient};
use findash::normalizer::Normalizer;
use findash::refresh::{RefreshJob, RefreshScheduler};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::connect(&cfg.db_path).await?);
    info!("Database ready at {}", cfg.db_path);

    // --- Providers ---
    let client = http_client(cfg.http_timeout_secs)?;
    let quotes: Arc<dyn QuoteFetcher> =
        Arc::new(YahooChartClient::new(client.clone(), cfg.quote_api_url.clone()));
    let news: Arc<dyn NewsFetcher> = Arc::new(NewsApiClient::new(
        client,
        cfg.news_api_url.clone(),
        cfg.news_api_key.clone(),
    ));
    if cfg.news_api_key.is_none() {
        warn!("NEWS_API_KEY not set: /news will return a configuration error");
    }

    let normalizer = Normalizer::new(cfg.coercion_mode);
    let latency = Arc::new(LatencyStats::new());

    // --- Refresh loop ---
    let job = RefreshJob::new(
        Arc::clone(&store),
        Arc::clone(&quotes),
        normalizer,
        cfg.refresh_period,
        Arc::clone(&latency),
    );
    let scheduler = Arc::new(RefreshScheduler::new(job));
    if cfg.refresh_tickers.is_empty() {
        info!("REFRESH_TICKERS not set: refresh loop idle until started via POST /scheduler/start");
    } else {
        scheduler
            .start(cfg.refresh_tickers.clone(), cfg.refresh_interval_minutes)
            .await?;
    }

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        quotes,
        news,
        normalizer,
        scheduler: Arc::clone(&scheduler),
        latency,
        health: Arc::new(HealthState::new()),
        summary_sentences: cfg.summary_sentences,
        max_upload_bytes: cfg.max_upload_bytes,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received");
}
