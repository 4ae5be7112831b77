use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Canonical financial record
// ---------------------------------------------------------------------------

/// One OHLCV observation for one ticker at one instant, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub ticker: String,
    /// Timezone-naive; offsets are folded into UTC before this is built.
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// "lat,lon" used by the map view.
    pub location: Option<String>,
}

// ---------------------------------------------------------------------------
// Source documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Excel,
    Csv,
}

impl DocumentKind {
    /// Dispatch on the filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(DocumentKind::Csv),
            "xls" | "xlsx" => Ok(DocumentKind::Excel),
            "pdf" => Ok(DocumentKind::Pdf),
            _ => Err(AppError::UnsupportedFormat(format!(
                "'{filename}': please upload .pdf, .csv, .xls or .xlsx"
            ))),
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Excel => "excel",
            DocumentKind::Csv => "csv",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "excel" => Ok(DocumentKind::Excel),
            "csv" => Ok(DocumentKind::Csv),
            other => Err(format!("unknown document kind '{other}'")),
        }
    }
}

/// Catalog entry for an ingested file.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    pub id: i64,
    pub filename: String,
    pub kind: DocumentKind,
    pub uploaded_at: NaiveDateTime,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub created_at: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// Raw tables (extractor output, normalizer input)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
    Blank,
    /// Multi-valued cell, e.g. a spreadsheet index carrying several levels.
    Many(Vec<RawCell>),
}

impl RawCell {
    /// Classify a text field the way a CSV reader would.
    pub fn from_text(s: &str) -> Self {
        let t = s.trim();
        if t.is_empty() {
            return RawCell::Blank;
        }
        match t.parse::<f64>() {
            Ok(n) if n.is_finite() => RawCell::Number(n),
            _ => RawCell::Text(t.to_string()),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Blank => true,
            RawCell::Text(s) => s.trim().is_empty(),
            RawCell::Many(v) => v.iter().all(RawCell::is_blank),
            _ => false,
        }
    }
}

static BLANK: RawCell = RawCell::Blank;

/// Ordered rows of positionally-labelled cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Sheet name for spreadsheets; None for CSV and PDF tables.
    pub name: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

impl RawTable {
    pub fn new(name: Option<String>, headers: Vec<String>, rows: Vec<Vec<RawCell>>) -> Self {
        Self { name, headers, rows }
    }

    /// Cell at (row, col); short rows read as blank.
    pub fn cell(&self, row: usize, col: usize) -> &RawCell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&BLANK)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Coercion policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionMode {
    /// Missing or non-numeric OHLCV fields become 0.0.
    #[default]
    Lenient,
    /// Rows with a missing or non-numeric OHLCV field are skipped.
    Strict,
}

impl std::str::FromStr for CoercionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(CoercionMode::Lenient),
            "strict" => Ok(CoercionMode::Strict),
            other => Err(format!("COERCION_MODE must be 'lenient' or 'strict', got '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Quote provider types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[default]
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "1mo" => Ok(Period::OneMonth),
            "3mo" => Ok(Period::ThreeMonths),
            "6mo" => Ok(Period::SixMonths),
            "1y" => Ok(Period::OneYear),
            "2y" => Ok(Period::TwoYears),
            "5y" => Ok(Period::FiveYears),
            other => Err(format!("unsupported period '{other}' (1mo, 3mo, 6mo, 1y, 2y, 5y)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarInterval {
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1wk")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
}

impl BarInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarInterval::OneDay => "1d",
            BarInterval::FiveDays => "5d",
            BarInterval::OneWeek => "1wk",
            BarInterval::OneMonth => "1mo",
        }
    }
}

impl std::fmt::Display for BarInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bar as returned by the quote provider. Any field may be null upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvBar {
    pub timestamp: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

// ---------------------------------------------------------------------------
// News provider types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
}

/// Either a bounded list of articles or an explicit error object.
/// Serializes as `{"articles": [...]}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NewsOutcome {
    Articles { articles: Vec<Article> },
    Error { error: String },
}

impl NewsOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, NewsOutcome::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_kind_dispatches_on_extension() {
        assert_eq!(DocumentKind::from_filename("prices.CSV").unwrap(), DocumentKind::Csv);
        assert_eq!(DocumentKind::from_filename("book.xls").unwrap(), DocumentKind::Excel);
        assert_eq!(DocumentKind::from_filename("book.xlsx").unwrap(), DocumentKind::Excel);
        assert_eq!(DocumentKind::from_filename("q3.pdf").unwrap(), DocumentKind::Pdf);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        for name in ["report.docx", "noext", "archive.pdf.zip"] {
            match DocumentKind::from_filename(name) {
                Err(AppError::UnsupportedFormat(msg)) => assert!(msg.contains(name)),
                other => panic!("expected UnsupportedFormat for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn raw_cell_from_text_classifies() {
        assert_eq!(RawCell::from_text("  "), RawCell::Blank);
        assert_eq!(RawCell::from_text("102.5"), RawCell::Number(102.5));
        assert_eq!(RawCell::from_text("2024-01-02"), RawCell::Text("2024-01-02".into()));
        assert_eq!(RawCell::from_text("NaN"), RawCell::Text("NaN".into()));
    }

    #[test]
    fn short_rows_read_as_blank() {
        let table = RawTable::new(
            None,
            vec!["a".into(), "b".into()],
            vec![vec![RawCell::Number(1.0)]],
        );
        assert_eq!(table.cell(0, 0), &RawCell::Number(1.0));
        assert_eq!(table.cell(0, 1), &RawCell::Blank);
        assert_eq!(table.cell(5, 0), &RawCell::Blank);
    }

    #[test]
    fn news_outcome_serializes_as_error_key() {
        let v = serde_json::to_value(NewsOutcome::Error { error: "none".into() }).unwrap();
        assert_eq!(v, serde_json::json!({ "error": "none" }));
        let v = serde_json::to_value(NewsOutcome::Articles { articles: vec![] }).unwrap();
        assert_eq!(v, serde_json::json!({ "articles": [] }));
    }

    #[test]
    fn period_round_trips_through_str() {
        for p in ["1mo", "3mo", "6mo", "1y", "2y", "5y"] {
            assert_eq!(p.parse::<Period>().unwrap().as_str(), p);
        }
        assert!("10y".parse::<Period>().is_err());
    }
}
