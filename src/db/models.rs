//! Row types for the tables in `migrations/0001_init.sql`.

use chrono::NaiveDateTime;

use crate::types::{FinancialRecord, Report, SourceFile};

#[derive(Debug, sqlx::FromRow)]
pub struct FinancialDataRow {
    pub ticker: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub location: Option<String>,
}

impl From<FinancialDataRow> for FinancialRecord {
    fn from(r: FinancialDataRow) -> Self {
        FinancialRecord {
            ticker: r.ticker,
            timestamp: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            location: r.location,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ReportRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub created_at: NaiveDateTime,
}

impl From<ReportRow> for Report {
    fn from(r: ReportRow) -> Self {
        Report {
            id: r.id,
            title: r.title,
            content: r.content,
            summary: r.summary,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SourceFileRow {
    pub id: i64,
    pub filename: String,
    pub kind: String,
    pub uploaded_at: NaiveDateTime,
    pub metadata: String,
}

impl SourceFileRow {
    /// Unknown kinds and unparseable metadata are tolerated; the catalog is
    /// informational only.
    pub fn into_source_file(self) -> Option<SourceFile> {
        let kind = self.kind.parse().ok()?;
        let metadata = serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null);
        Some(SourceFile {
            id: self.id,
            filename: self.filename,
            kind,
            uploaded_at: self.uploaded_at,
            metadata,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TickerLocationRow {
    pub ticker: String,
    pub location: Option<String>,
}
