pub mod models;
mod store;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentKind, FinancialRecord, Report, SourceFile};

pub use store::SqliteStore;

/// Everything the service reads from or writes to storage.
/// Handlers and the refresh loop hold an `Arc<dyn RecordStore>`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a batch in one transaction. Returns the number of rows written.
    async fn insert_records(&self, records: &[FinancialRecord]) -> Result<u64>;

    /// Most recent records across all tickers, newest first.
    async fn recent_records(&self, limit: i64) -> Result<Vec<FinancialRecord>>;

    async fn records_for_ticker(&self, ticker: &str, limit: i64) -> Result<Vec<FinancialRecord>>;

    async fn distinct_tickers(&self) -> Result<Vec<String>>;

    /// Location of the most recently inserted record per ticker.
    async fn latest_locations(&self) -> Result<Vec<(String, Option<String>)>>;

    async fn count_records(&self) -> Result<i64>;

    async fn insert_report(&self, title: &str, content: &str, summary: &str) -> Result<Report>;

    async fn recent_reports(&self, limit: i64) -> Result<Vec<Report>>;

    async fn count_reports(&self) -> Result<i64>;

    async fn insert_source_file(
        &self,
        filename: &str,
        kind: DocumentKind,
        metadata: &serde_json::Value,
    ) -> Result<SourceFile>;

    async fn recent_source_files(&self, limit: i64) -> Result<Vec<SourceFile>>;

    /// Cheap reachability check for /health.
    async fn ping(&self) -> Result<()>;
}
