//! Inserts five days of sample bars for every ticker with a known
//! headquarters, so the dashboard has something to draw on a fresh database.

use chrono::{Duration, Utc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use findash::config::Config;
use findash::db::{RecordStore, SqliteStore};
use findash::error::Result;
use findash::geo::known_tickers;
use findash::types::FinancialRecord;

const SAMPLE_DAYS: i64 = 5;

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

    if let Err(e) = run(&cfg).await {
        error!("Seeding failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: &Config) -> Result<()> {
    let store = SqliteStore::connect(&cfg.db_path).await?;
    let records = sample_records();
    let written = store.insert_records(&records).await?;
    info!(records = written, db = %cfg.db_path, "Sample data inserted");
    Ok(())
}

fn sample_records() -> Vec<FinancialRecord> {
    let today = Utc::now().date_naive();
    let mut records = Vec::new();

    for (i, (ticker, location)) in known_tickers().enumerate() {
        let base = 100.0 + 50.0 * i as f64;
        for day in 0..SAMPLE_DAYS {
            let Some(timestamp) = (today - Duration::days(SAMPLE_DAYS - day)).and_hms_opt(0, 0, 0)
            else {
                continue;
            };
            let open = base + day as f64;
            records.push(FinancialRecord {
                ticker: ticker.to_string(),
                timestamp,
                open,
                high: open + 5.0,
                low: open - 5.0,
                close: open + 2.0,
                volume: 1_000_000.0 + 10_000.0 * day as f64,
                location: Some(location.to_string()),
            });
        }
    }
    records
}
