use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::models::{FinancialDataRow, ReportRow, SourceFileRow, TickerLocationRow};
use super::RecordStore;
use crate::error::Result;
use crate::types::{DocumentKind, FinancialRecord, Report, SourceFile};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. One connection, since each SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_records(&self, records: &[FinancialRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO financial_data (ticker, timestamp, open, high, low, close, volume, location)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.ticker)
            .bind(r.timestamp)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.close)
            .bind(r.volume)
            .bind(&r.location)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(rows = records.len(), "Inserted financial records");
        Ok(records.len() as u64)
    }

    async fn recent_records(&self, limit: i64) -> Result<Vec<FinancialRecord>> {
        let rows = sqlx::query_as::<_, FinancialDataRow>(
            r#"
            SELECT ticker, timestamp, open, high, low, close, volume, location
            FROM financial_data
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FinancialRecord::from).collect())
    }

    async fn records_for_ticker(&self, ticker: &str, limit: i64) -> Result<Vec<FinancialRecord>> {
        let rows = sqlx::query_as::<_, FinancialDataRow>(
            r#"
            SELECT ticker, timestamp, open, high, low, close, volume, location
            FROM financial_data
            WHERE ticker = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(ticker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FinancialRecord::from).collect())
    }

    async fn distinct_tickers(&self) -> Result<Vec<String>> {
        let tickers = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT ticker FROM financial_data ORDER BY ticker",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tickers)
    }

    async fn latest_locations(&self) -> Result<Vec<(String, Option<String>)>> {
        let rows = sqlx::query_as::<_, TickerLocationRow>(
            r#"
            SELECT f.ticker, f.location
            FROM financial_data f
            JOIN (SELECT ticker, MAX(id) AS id FROM financial_data GROUP BY ticker) latest
              ON f.id = latest.id
            ORDER BY f.ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.ticker, r.location)).collect())
    }

    async fn count_records(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM financial_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn insert_report(&self, title: &str, content: &str, summary: &str) -> Result<Report> {
        let created_at = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO reports (title, content, summary, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(content)
        .bind(summary)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Report {
            id,
            title: title.to_string(),
            content: content.to_string(),
            summary: summary.to_string(),
            created_at,
        })
    }

    async fn recent_reports(&self, limit: i64) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT id, title, content, summary, created_at
            FROM reports
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Report::from).collect())
    }

    async fn count_reports(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reports")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn insert_source_file(
        &self,
        filename: &str,
        kind: DocumentKind,
        metadata: &serde_json::Value,
    ) -> Result<SourceFile> {
        let uploaded_at = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO source_files (filename, kind, uploaded_at, metadata) VALUES (?, ?, ?, ?)",
        )
        .bind(filename)
        .bind(kind.to_string())
        .bind(uploaded_at)
        .bind(serde_json::to_string(metadata)?)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(SourceFile {
            id,
            filename: filename.to_string(),
            kind,
            uploaded_at,
            metadata: metadata.clone(),
        })
    }

    async fn recent_source_files(&self, limit: i64) -> Result<Vec<SourceFile>> {
        let rows = sqlx::query_as::<_, SourceFileRow>(
            r#"
            SELECT id, filename, kind, uploaded_at, metadata
            FROM source_files
            ORDER BY uploaded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                let file = row.into_source_file();
                if file.is_none() {
                    warn!(id, "Skipping source file with unknown kind");
                }
                file
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
