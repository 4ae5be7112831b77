use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::health::HealthState;
use super::latency::{LatencySnapshot, LatencyStats};
use crate::config::{
    DEFAULT_NEWS_LIMIT, DEFAULT_RECENT_RECORDS, DEFAULT_RECENT_REPORTS,
    DEFAULT_RECENT_SOURCE_FILES, DEFAULT_TICKER_RECORDS, MAX_QUERY_LIMIT, TEXT_PREVIEW_CHARS,
};
use crate::db::RecordStore;
use crate::error::AppError;
use crate::extract::{extract_kind, Extracted};
use crate::fetcher::{NewsFetcher, QuoteFetcher};
use crate::geo::{fill_locations, location_for, parse_location};
use crate::normalizer::{bars_to_table, ColumnMap, Normalizer};
use crate::refresh::{RefreshPlan, RefreshScheduler, SchedulerStatus};
use crate::summarize::summarize;
use crate::types::{
    BarInterval, DocumentKind, FinancialRecord, NewsOutcome, OhlcvBar, Period, RawTable, Report,
    SourceFile,
};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RecordStore>,
    pub quotes: Arc<dyn QuoteFetcher>,
    pub news: Arc<dyn NewsFetcher>,
    pub normalizer: Normalizer,
    pub scheduler: Arc<RefreshScheduler>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    pub summary_sentences: usize,
    pub max_upload_bytes: usize,
}

pub fn router(state: ApiState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(get_health))
        .route("/uploads", post(post_upload))
        .route("/records", get(get_ticker_records))
        .route("/records/recent", get(get_recent_records))
        .route("/tickers", get(get_tickers))
        .route("/reports", post(post_report))
        .route("/reports/recent", get(get_recent_reports))
        .route("/source-files", get(get_source_files).post(post_source_file))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .route("/market/:ticker", get(get_market))
        .route("/news", get(get_news))
        .route("/map", get(get_map))
        .route("/scheduler", get(get_scheduler))
        .route("/scheduler/start", post(post_scheduler_start))
        .route("/scheduler/stop", post(post_scheduler_stop))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, MAX_QUERY_LIMIT)
}

fn ticker_param(raw: Option<&str>) -> Option<String> {
    raw.map(|t| t.trim().to_uppercase()).filter(|t| !t.is_empty())
}

/// Ticker for one extracted table: the explicit `ticker` param wins. Otherwise,
/// unless the table carries its own ticker column, the sheet name and then the
/// filename stem stand in.
fn table_ticker_hint(explicit: Option<&str>, table: &RawTable, filename: &str) -> Option<String> {
    if let Some(t) = ticker_param(explicit) {
        return Some(t);
    }
    if ColumnMap::resolve(&table.headers).ticker.is_some() {
        return None;
    }
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str());
    ticker_param(table.name.as_deref()).or_else(|| ticker_param(stem))
}

// ---------------------------------------------------------------------------
// Query param / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct TickerRecordsQuery {
    pub ticker: String,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub ticker: Option<String>,
    #[serde(default)]
    pub save_report: bool,
    #[serde(default)]
    pub save_metadata: bool,
}

#[derive(Deserialize)]
pub struct NewReport {
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
}

#[derive(Deserialize)]
pub struct NewSourceFile {
    pub filename: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct MarketQuery {
    pub period: Option<Period>,
    pub interval: Option<BarInterval>,
    #[serde(default)]
    pub save: bool,
}

#[derive(Deserialize)]
pub struct NewsQuery {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct StartScheduler {
    pub tickers: Vec<String>,
    pub interval_minutes: u64,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub uptime_secs: u64,
    pub refresh_running: bool,
    pub uploads_processed: u64,
    pub upload_failures: u64,
}

#[derive(Serialize)]
pub struct TableSummary {
    pub name: Option<String>,
    /// Ticker attached to every record of the table; None when a ticker column supplied it.
    pub ticker: Option<String>,
    pub headers: Vec<String>,
    pub rows: usize,
    pub records: usize,
    pub skipped: usize,
    /// Skip reason → row count.
    pub skip_reasons: BTreeMap<String, usize>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub kind: DocumentKind,
    pub text_preview: String,
    pub tables: Vec<TableSummary>,
    pub records_stored: u64,
    pub report: Option<Report>,
    pub source_file: Option<SourceFile>,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub reports: i64,
    pub tickers: usize,
    pub records: i64,
}

#[derive(Serialize)]
pub struct MarketResponse {
    pub ticker: String,
    /// "ok" or "unavailable".
    pub status: &'static str,
    pub period: Period,
    pub interval: BarInterval,
    pub bars: Vec<OhlcvBar>,
    pub records_stored: u64,
}

#[derive(Serialize)]
pub struct MapPoint {
    pub ticker: String,
    pub location: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let db_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: database unreachable: {e}");
            false
        }
    };
    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        db_ok,
        uptime_secs: state.health.uptime_secs(),
        refresh_running: state.scheduler.is_running().await,
        uploads_processed: state.health.uploads_processed(),
        upload_failures: state.health.upload_failures(),
    })
}

async fn post_upload(
    State(state): State<ApiState>,
    Query(params): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let result = ingest(&state, params, body).await;
    state.health.record_upload(result.is_ok());
    result.map(Json)
}

async fn ingest(state: &ApiState, params: UploadQuery, body: Bytes) -> Result<UploadResponse, AppError> {
    // Extension check comes first: unsupported files are never parsed.
    let kind = DocumentKind::from_filename(&params.filename)?;
    if body.is_empty() {
        return Err(AppError::InvalidInput(format!("'{}' is empty", params.filename)));
    }

    let started = Instant::now();
    let extracted: Extracted = tokio::task::spawn_blocking(move || extract_kind(kind, &body))
        .await
        .map_err(|e| AppError::Extraction(format!("extraction task failed: {e}")))??;

    let mut tables = Vec::with_capacity(extracted.tables.len());
    let mut records: Vec<FinancialRecord> = Vec::new();
    for table in &extracted.tables {
        let hint = table_ticker_hint(params.ticker.as_deref(), table, &params.filename);
        let normalized = state.normalizer.normalize_table(hint.as_deref(), table);
        let mut skip_reasons = BTreeMap::new();
        for s in &normalized.skipped {
            *skip_reasons.entry(s.reason.to_string()).or_insert(0) += 1;
        }
        tables.push(TableSummary {
            name: table.name.clone(),
            ticker: hint,
            headers: table.headers.clone(),
            rows: table.row_count(),
            records: normalized.records.len(),
            skipped: normalized.skipped.len(),
            skip_reasons,
        });
        records.extend(normalized.records);
    }
    fill_locations(&mut records);
    let records_stored = state.store.insert_records(&records).await?;

    let report = if params.save_report && kind == DocumentKind::Pdf && !extracted.text.trim().is_empty() {
        let summary = summarize(&extracted.text, state.summary_sentences);
        Some(state.store.insert_report(&params.filename, &extracted.text, &summary).await?)
    } else {
        None
    };

    let source_file = if params.save_metadata || report.is_some() {
        let metadata = document_metadata(kind, &extracted);
        Some(state.store.insert_source_file(&params.filename, kind, &metadata).await?)
    } else {
        None
    };

    info!(
        filename = %params.filename,
        kind = %kind,
        tables = tables.len(),
        records = records_stored,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Upload ingested"
    );

    Ok(UploadResponse {
        filename: params.filename,
        kind,
        text_preview: extracted.text.chars().take(TEXT_PREVIEW_CHARS).collect(),
        tables,
        records_stored,
        report,
        source_file,
    })
}

fn document_metadata(kind: DocumentKind, extracted: &Extracted) -> serde_json::Value {
    match kind {
        DocumentKind::Excel => serde_json::json!({
            "sheets": extracted.tables.iter().filter_map(|t| t.name.clone()).collect::<Vec<_>>(),
        }),
        DocumentKind::Csv => serde_json::json!({
            "columns": extracted.tables.first().map(|t| t.headers.clone()).unwrap_or_default(),
            "rows": extracted.tables.first().map(|t| t.row_count()).unwrap_or(0),
        }),
        DocumentKind::Pdf => serde_json::json!({
            "tables": extracted.tables.len(),
            "text_chars": extracted.text.chars().count(),
        }),
    }
}

async fn get_recent_records(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<FinancialRecord>>, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_RECENT_RECORDS);
    Ok(Json(state.store.recent_records(limit).await?))
}

async fn get_ticker_records(
    State(state): State<ApiState>,
    Query(params): Query<TickerRecordsQuery>,
) -> Result<Json<Vec<FinancialRecord>>, AppError> {
    let ticker = ticker_param(Some(params.ticker.as_str()))
        .ok_or_else(|| AppError::InvalidInput("ticker must not be empty".to_string()))?;
    let limit = clamp_limit(params.limit, DEFAULT_TICKER_RECORDS);
    Ok(Json(state.store.records_for_ticker(&ticker, limit).await?))
}

async fn get_tickers(State(state): State<ApiState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.store.distinct_tickers().await?))
}

async fn get_recent_reports(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<Report>>, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_RECENT_REPORTS);
    Ok(Json(state.store.recent_reports(limit).await?))
}

async fn post_report(
    State(state): State<ApiState>,
    Json(body): Json<NewReport>,
) -> Result<(StatusCode, Json<Report>), AppError> {
    let title = body.title.trim();
    if title.is_empty() || body.content.trim().is_empty() {
        return Err(AppError::InvalidInput("report needs a title and content".to_string()));
    }
    let summary = match body.summary {
        Some(s) if !s.trim().is_empty() => s,
        _ => summarize(&body.content, state.summary_sentences),
    };
    let report = state.store.insert_report(title, &body.content, &summary).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_source_files(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<SourceFile>>, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_RECENT_SOURCE_FILES);
    Ok(Json(state.store.recent_source_files(limit).await?))
}

async fn post_source_file(
    State(state): State<ApiState>,
    Json(body): Json<NewSourceFile>,
) -> Result<(StatusCode, Json<SourceFile>), AppError> {
    let kind = DocumentKind::from_filename(&body.filename)?;
    let metadata = match body.metadata {
        None | Some(serde_json::Value::Null) => serde_json::json!({}),
        Some(v @ serde_json::Value::Object(_)) => v,
        Some(_) => {
            return Err(AppError::InvalidInput("metadata must be a JSON object".to_string()));
        }
    };
    let file = state.store.insert_source_file(&body.filename, kind, &metadata).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

async fn get_stats_summary(
    State(state): State<ApiState>,
) -> Result<Json<SummaryResponse>, AppError> {
    Ok(Json(SummaryResponse {
        reports: state.store.count_reports().await?,
        tickers: state.store.distinct_tickers().await?.len(),
        records: state.store.count_records().await?,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

async fn get_market(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
    Query(params): Query<MarketQuery>,
) -> Result<Json<MarketResponse>, AppError> {
    let ticker = ticker_param(Some(ticker.as_str()))
        .ok_or_else(|| AppError::InvalidInput("ticker must not be empty".to_string()))?;
    let period = params.period.unwrap_or_default();
    let interval = params.interval.unwrap_or_default();

    let started = Instant::now();
    let bars = state.quotes.fetch_history(&ticker, period, interval).await?;
    state.latency.record(started.elapsed());

    if bars.is_empty() {
        return Ok(Json(MarketResponse {
            ticker,
            status: "unavailable",
            period,
            interval,
            bars,
            records_stored: 0,
        }));
    }

    let records_stored = if params.save {
        let mut records = state.normalizer.normalize(Some(&ticker), &bars_to_table(&bars));
        fill_locations(&mut records);
        state.store.insert_records(&records).await?
    } else {
        0
    };

    Ok(Json(MarketResponse {
        ticker,
        status: "ok",
        period,
        interval,
        bars,
        records_stored,
    }))
}

async fn get_news(
    State(state): State<ApiState>,
    Query(params): Query<NewsQuery>,
) -> Result<Json<NewsOutcome>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_NEWS_LIMIT);
    Ok(Json(state.news.fetch_news(&params.q, limit).await?))
}

async fn get_map(State(state): State<ApiState>) -> Result<Json<Vec<MapPoint>>, AppError> {
    let points = state
        .store
        .latest_locations()
        .await?
        .into_iter()
        .map(|(ticker, stored)| {
            let location = stored
                .filter(|l| parse_location(l).is_some())
                .unwrap_or_else(|| location_for(&ticker).to_string());
            let coords = parse_location(&location);
            MapPoint {
                ticker,
                lat: coords.map(|c| c.0),
                lon: coords.map(|c| c.1),
                location,
            }
        })
        .collect();
    Ok(Json(points))
}

async fn get_scheduler(State(state): State<ApiState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

async fn post_scheduler_start(
    State(state): State<ApiState>,
    Json(body): Json<StartScheduler>,
) -> Result<Json<RefreshPlan>, AppError> {
    let plan = state.scheduler.start(body.tickers, body.interval_minutes).await?;
    Ok(Json(plan))
}

async fn post_scheduler_stop(State(state): State<ApiState>) -> Json<StopResponse> {
    Json(StopResponse { stopped: state.scheduler.stop().await })
}
