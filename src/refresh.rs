//! Scheduled quote refresh: a stoppable background loop that re-fetches
//! history for a fixed ticker list and persists it through the normalizer.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::latency::LatencyStats;
use crate::config::{MAX_REFRESH_INTERVAL_MINUTES, MIN_REFRESH_INTERVAL_MINUTES};
use crate::db::RecordStore;
use crate::error::{AppError, Result};
use crate::fetcher::QuoteFetcher;
use crate::geo::fill_locations;
use crate::normalizer::{bars_to_table, Normalizer};
use crate::types::{BarInterval, Period};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickerOutcome {
    Stored { records: u64 },
    /// Provider had no data for the ticker; nothing written.
    Unavailable,
    Failed { error: String },
}

impl std::fmt::Display for TickerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickerOutcome::Stored { records } => write!(f, "stored {records}"),
            TickerOutcome::Unavailable => write!(f, "unavailable"),
            TickerOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Outcome of one tick, one entry per ticker in plan order.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub outcomes: Vec<(String, TickerOutcome)>,
}

impl TickReport {
    pub fn stored(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                TickerOutcome::Stored { records } => *records,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TickerOutcome::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TickerStatus {
    #[serde(flatten)]
    pub outcome: TickerOutcome,
    pub at: NaiveDateTime,
}

/// Counters and per-ticker results shared with the status endpoint.
#[derive(Default)]
pub struct RefreshStatus {
    last_outcomes: DashMap<String, TickerStatus>,
    ticks_completed: AtomicU64,
    records_stored: AtomicU64,
    last_tick_at: StdMutex<Option<NaiveDateTime>>,
}

impl RefreshStatus {
    fn record_tick(&self, report: &TickReport) {
        let at = Utc::now().naive_utc();
        for (ticker, outcome) in &report.outcomes {
            self.last_outcomes
                .insert(ticker.clone(), TickerStatus { outcome: outcome.clone(), at });
        }
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        self.records_stored.fetch_add(report.stored(), Ordering::Relaxed);
        if let Ok(mut last) = self.last_tick_at.lock() {
            *last = Some(at);
        }
    }

    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    pub fn records_stored(&self) -> u64 {
        self.records_stored.load(Ordering::Relaxed)
    }

    pub fn last_tick_at(&self) -> Option<NaiveDateTime> {
        self.last_tick_at.lock().ok().and_then(|g| *g)
    }

    /// Sorted by ticker.
    pub fn last_outcomes(&self) -> BTreeMap<String, TickerStatus> {
        self.last_outcomes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RefreshJob: one tick's worth of work
// ---------------------------------------------------------------------------

pub struct RefreshJob {
    store: Arc<dyn RecordStore>,
    quotes: Arc<dyn QuoteFetcher>,
    normalizer: Normalizer,
    period: Period,
    status: Arc<RefreshStatus>,
    latency: Arc<LatencyStats>,
}

impl RefreshJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        quotes: Arc<dyn QuoteFetcher>,
        normalizer: Normalizer,
        period: Period,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            store,
            quotes,
            normalizer,
            period,
            status: Arc::new(RefreshStatus::default()),
            latency,
        }
    }

    pub fn status(&self) -> &Arc<RefreshStatus> {
        &self.status
    }

    /// Refresh every ticker in order. A failure or panic for one ticker is
    /// logged and does not stop the rest.
    pub async fn run_tick(&self, tickers: &[String]) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        for ticker in tickers {
            let outcome = match AssertUnwindSafe(self.refresh_ticker(ticker)).catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!(ticker = %ticker, "Refresh failed: {e}");
                    TickerOutcome::Failed { error: e.to_string() }
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    error!(ticker = %ticker, "Refresh panicked: {msg}");
                    TickerOutcome::Failed { error: format!("panic: {msg}") }
                }
            };
            report.outcomes.push((ticker.clone(), outcome));
        }

        self.status.record_tick(&report);
        info!(
            tickers = tickers.len(),
            stored = report.stored(),
            failed = report.failed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh tick complete: {} records from {} tickers",
            report.stored(),
            tickers.len(),
        );
        report
    }

    async fn refresh_ticker(&self, ticker: &str) -> Result<TickerOutcome> {
        let started = Instant::now();
        let bars = self
            .quotes
            .fetch_history(ticker, self.period, BarInterval::OneDay)
            .await?;
        self.latency.record(started.elapsed());

        if bars.is_empty() {
            warn!(ticker = %ticker, "No data from quote provider, skipping");
            return Ok(TickerOutcome::Unavailable);
        }

        let mut records = self.normalizer.normalize(Some(ticker), &bars_to_table(&bars));
        fill_locations(&mut records);
        let written = self.store.insert_records(&records).await?;
        Ok(TickerOutcome::Stored { records: written })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// RefreshScheduler: owns the background task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshPlan {
    pub tickers: Vec<String>,
    pub interval_minutes: u64,
}

impl RefreshPlan {
    /// Trim and upper-case tickers, drop blanks, keep the interval in bounds.
    pub fn new(tickers: Vec<String>, interval_minutes: u64) -> Result<Self> {
        let tickers: Vec<String> = tickers
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tickers.is_empty() {
            return Err(AppError::InvalidInput("at least one ticker is required".to_string()));
        }
        if !(MIN_REFRESH_INTERVAL_MINUTES..=MAX_REFRESH_INTERVAL_MINUTES).contains(&interval_minutes) {
            return Err(AppError::InvalidInput(format!(
                "interval must be between {MIN_REFRESH_INTERVAL_MINUTES} and \
                 {MAX_REFRESH_INTERVAL_MINUTES} minutes, got {interval_minutes}"
            )));
        }
        Ok(Self { tickers, interval_minutes })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

struct Running {
    plan: RefreshPlan,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Forget a loop whose task has already exited, so it no longer reads as running.
fn reap(running: &mut Option<Running>) {
    if running.as_ref().is_some_and(|r| r.handle.is_finished()) {
        if let Some(dead) = running.take() {
            warn!(tickers = %dead.plan.tickers.join(","), "Refresh task exited on its own");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub plan: Option<RefreshPlan>,
    pub ticks_completed: u64,
    pub records_stored: u64,
    pub last_tick_at: Option<NaiveDateTime>,
    pub last_outcomes: BTreeMap<String, TickerStatus>,
}

/// Idle or Running. At most one background task exists at a time.
pub struct RefreshScheduler {
    job: Arc<RefreshJob>,
    running: Mutex<Option<Running>>,
}

impl RefreshScheduler {
    pub fn new(job: RefreshJob) -> Self {
        Self { job: Arc::new(job), running: Mutex::new(None) }
    }

    /// Start the loop. The first tick fires one full interval from now.
    /// Rejected while already running; stop first to change the plan.
    pub async fn start(&self, tickers: Vec<String>, interval_minutes: u64) -> Result<RefreshPlan> {
        let plan = RefreshPlan::new(tickers, interval_minutes)?;

        let mut running = self.running.lock().await;
        reap(&mut running);
        if let Some(current) = running.as_ref() {
            return Err(AppError::InvalidInput(format!(
                "refresh already running for {} every {}m; stop it first",
                current.plan.tickers.join(","),
                current.plan.interval_minutes
            )));
        }

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.job), plan.clone(), stop_rx));
        info!(
            tickers = %plan.tickers.join(","),
            interval_minutes = plan.interval_minutes,
            "Refresh loop started"
        );
        *running = Some(Running { plan: plan.clone(), stop_tx, handle });
        Ok(plan)
    }

    /// Stop the loop, letting an in-flight tick finish. Returns false if idle.
    pub async fn stop(&self) -> bool {
        let current = {
            let mut running = self.running.lock().await;
            reap(&mut running);
            running.take()
        };
        let Some(current) = current else {
            return false;
        };
        let _ = current.stop_tx.send(());
        if let Err(e) = current.handle.await {
            error!("Refresh task ended abnormally: {e}");
        }
        info!("Refresh loop stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.plan().await.is_some()
    }

    pub async fn plan(&self) -> Option<RefreshPlan> {
        let mut running = self.running.lock().await;
        reap(&mut running);
        running.as_ref().map(|r| r.plan.clone())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let plan = self.plan().await;
        let status = self.job.status();
        SchedulerStatus {
            running: plan.is_some(),
            plan,
            ticks_completed: status.ticks_completed(),
            records_stored: status.records_stored(),
            last_tick_at: status.last_tick_at(),
            last_outcomes: status.last_outcomes(),
        }
    }
}

async fn run_loop(job: Arc<RefreshJob>, plan: RefreshPlan, mut stop_rx: oneshot::Receiver<()>) {
    let mut ticker = interval(plan.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // skip immediate first tick

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                job.run_tick(&plan.tickers).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::types::{DocumentKind, FinancialRecord, OhlcvBar, Report, SourceFile};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;

    /// Fails for "B", panics for "BOOM", has no data for "ZZZZ".
    #[derive(Default)]
    struct StubQuotes {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl QuoteFetcher for StubQuotes {
        async fn fetch_history(
            &self,
            ticker: &str,
            _period: Period,
            _interval: BarInterval,
        ) -> Result<Vec<OhlcvBar>> {
            self.calls.lock().unwrap().push(ticker.to_string());
            match ticker {
                "B" => Err(AppError::Fetch("connection reset".into())),
                "BOOM" => panic!("provider exploded"),
                "ZZZZ" => Ok(vec![]),
                _ => Ok(vec![OhlcvBar {
                    timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    open: Some(100.0),
                    high: Some(105.0),
                    low: Some(95.0),
                    close: Some(102.0),
                    volume: Some(1_000_000.0),
                }]),
            }
        }
    }

    /// Counts inserts without touching SQLite, for paused-clock tests.
    #[derive(Default)]
    struct CountingStore {
        inserted: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for CountingStore {
        async fn insert_records(&self, records: &[FinancialRecord]) -> Result<u64> {
            self.inserted.fetch_add(records.len(), Ordering::SeqCst);
            Ok(records.len() as u64)
        }
        async fn recent_records(&self, _limit: i64) -> Result<Vec<FinancialRecord>> {
            Ok(vec![])
        }
        async fn records_for_ticker(&self, _t: &str, _limit: i64) -> Result<Vec<FinancialRecord>> {
            Ok(vec![])
        }
        async fn distinct_tickers(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn latest_locations(&self) -> Result<Vec<(String, Option<String>)>> {
            Ok(vec![])
        }
        async fn count_records(&self) -> Result<i64> {
            Ok(self.inserted.load(Ordering::SeqCst) as i64)
        }
        async fn insert_report(&self, _t: &str, _c: &str, _s: &str) -> Result<Report> {
            Err(AppError::InvalidInput("unused".into()))
        }
        async fn recent_reports(&self, _limit: i64) -> Result<Vec<Report>> {
            Ok(vec![])
        }
        async fn count_reports(&self) -> Result<i64> {
            Ok(0)
        }
        async fn insert_source_file(
            &self,
            _f: &str,
            _k: DocumentKind,
            _m: &serde_json::Value,
        ) -> Result<SourceFile> {
            Err(AppError::InvalidInput("unused".into()))
        }
        async fn recent_source_files(&self, _limit: i64) -> Result<Vec<SourceFile>> {
            Ok(vec![])
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn job(store: Arc<dyn RecordStore>, quotes: Arc<StubQuotes>) -> RefreshJob {
        RefreshJob::new(
            store,
            quotes,
            Normalizer::default(),
            Period::OneMonth,
            Arc::new(LatencyStats::new()),
        )
    }

    fn tickers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn failing_ticker_does_not_stop_the_rest() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let quotes = Arc::new(StubQuotes::default());
        let job = job(store.clone(), quotes.clone());

        let report = job.run_tick(&tickers(&["A", "B", "C"])).await;

        assert_eq!(*quotes.calls.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(report.outcomes[0].1, TickerOutcome::Stored { records: 1 });
        assert!(matches!(report.outcomes[1].1, TickerOutcome::Failed { .. }));
        assert_eq!(report.outcomes[2].1, TickerOutcome::Stored { records: 1 });
        assert_eq!(store.distinct_tickers().await.unwrap(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn panicking_ticker_is_isolated() {
        let store = Arc::new(CountingStore::default());
        let quotes = Arc::new(StubQuotes::default());
        let job = job(store.clone(), quotes.clone());

        let report = job.run_tick(&tickers(&["A", "BOOM", "C"])).await;

        match &report.outcomes[1].1 {
            TickerOutcome::Failed { error } => assert!(error.contains("provider exploded")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.inserted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_ticker_writes_nothing() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let quotes = Arc::new(StubQuotes::default());
        let job = job(store.clone(), quotes.clone());

        let report = job.run_tick(&tickers(&["ZZZZ", "AAPL"])).await;

        assert_eq!(report.outcomes[0].1, TickerOutcome::Unavailable);
        assert_eq!(report.outcomes[1].1, TickerOutcome::Stored { records: 1 });
        let stored = store.recent_records(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ticker, "AAPL");
        assert_eq!(stored[0].location.as_deref(), Some("37.3349,-122.0090"));
        assert_eq!(stored[0].close, 102.0);

        let status = job.status().last_outcomes();
        assert_eq!(status["ZZZZ"].outcome, TickerOutcome::Unavailable);
        assert_eq!(job.status().ticks_completed(), 1);
    }

    #[test]
    fn plan_validation() {
        assert!(matches!(
            RefreshPlan::new(tickers(&["AAPL"]), 5),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            RefreshPlan::new(tickers(&[" ", ""]), 60),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            RefreshPlan::new(tickers(&["AAPL"]), u64::MAX / 2),
            Err(AppError::InvalidInput(_))
        ));
        assert!(RefreshPlan::new(tickers(&["AAPL"]), MAX_REFRESH_INTERVAL_MINUTES).is_ok());
        let plan = RefreshPlan::new(tickers(&[" aapl ", "", "msft"]), 10).unwrap();
        assert_eq!(plan.tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(plan.period(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_fires_after_one_interval() {
        let store = Arc::new(CountingStore::default());
        let quotes = Arc::new(StubQuotes::default());
        let scheduler = RefreshScheduler::new(job(store.clone(), quotes.clone()));

        scheduler.start(tickers(&["AAPL"]), 10).await.unwrap();
        assert!(scheduler.is_running().await);

        tokio::time::sleep(Duration::from_secs(9 * 60)).await;
        assert!(quotes.calls.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(quotes.calls.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(quotes.calls.lock().unwrap().len(), 2);
        assert_eq!(store.inserted.load(Ordering::SeqCst), 2);

        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running().await);

        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(quotes.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_rejected() {
        let scheduler = RefreshScheduler::new(job(
            Arc::new(CountingStore::default()),
            Arc::new(StubQuotes::default()),
        ));
        scheduler.start(tickers(&["AAPL"]), 30).await.unwrap();
        let err = scheduler.start(tickers(&["MSFT"]), 30).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(scheduler.plan().await.unwrap().tickers, vec!["AAPL"]);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);
        scheduler.start(tickers(&["MSFT"]), 30).await.unwrap();
        assert_eq!(scheduler.status().await.plan.unwrap().tickers, vec!["MSFT"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exited_task_no_longer_reads_as_running() {
        let scheduler = RefreshScheduler::new(job(
            Arc::new(CountingStore::default()),
            Arc::new(StubQuotes::default()),
        ));
        scheduler.start(tickers(&["AAPL"]), 30).await.unwrap();
        if let Some(r) = scheduler.running.lock().await.as_ref() {
            r.handle.abort();
        }
        loop {
            let finished = scheduler
                .running
                .lock()
                .await
                .as_ref()
                .map_or(true, |r| r.handle.is_finished());
            if finished {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!scheduler.is_running().await);
        assert!(!scheduler.status().await.running);
        assert!(!scheduler.stop().await);
        scheduler.start(tickers(&["MSFT"]), 30).await.unwrap();
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
    }
}
