//! Maps loosely-shaped raw tables onto the canonical financial record.
//!
//! Column labels are resolved once per table through an explicit alias table,
//! so row processing only ever works with a fixed column map.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::types::{CoercionMode, FinancialRecord, OhlcvBar, RawCell, RawTable};

// ---------------------------------------------------------------------------
// Column alias resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Timestamp,
    Open,
    High,
    Low,
    Close,
    Volume,
    Ticker,
    Location,
}

/// Canonical field → accepted labels (compared after [`canonical_label`]).
pub const COLUMN_ALIASES: &[(Field, &[&str])] = &[
    (Field::Timestamp, &["date", "datetime", "timestamp", "time"]),
    (Field::Open, &["open", "open price"]),
    (Field::High, &["high", "high price"]),
    (Field::Low, &["low", "low price"]),
    (Field::Close, &["close", "close price", "last"]),
    (Field::Volume, &["volume", "vol"]),
    (Field::Ticker, &["ticker", "symbol"]),
    (Field::Location, &["location"]),
];

/// Lower-case, treat `_` as a space, collapse whitespace.
pub fn canonical_label(label: &str) -> String {
    label
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Column index for each canonical field. The first matching header wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub timestamp: Option<usize>,
    pub open: Option<usize>,
    pub high: Option<usize>,
    pub low: Option<usize>,
    pub close: Option<usize>,
    pub volume: Option<usize>,
    pub ticker: Option<usize>,
    pub location: Option<usize>,
}

impl ColumnMap {
    pub fn resolve(headers: &[String]) -> Self {
        let labels: Vec<String> = headers.iter().map(|h| canonical_label(h)).collect();
        let mut map = ColumnMap::default();

        for (field, aliases) in COLUMN_ALIASES {
            let idx = labels.iter().position(|l| aliases.contains(&l.as_str()));
            let slot = match field {
                Field::Timestamp => &mut map.timestamp,
                Field::Open => &mut map.open,
                Field::High => &mut map.high,
                Field::Low => &mut map.low,
                Field::Close => &mut map.close,
                Field::Volume => &mut map.volume,
                Field::Ticker => &mut map.ticker,
                Field::Location => &mut map.location,
            };
            *slot = idx;
        }
        map
    }

}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Timestamp cell blank or not parseable as a date-time.
    BadTimestamp,
    /// No ticker hint and no ticker column value.
    MissingTicker,
    /// Strict mode only: the named OHLCV field is absent or non-numeric.
    MissingField(&'static str),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::BadTimestamp => write!(f, "bad_timestamp"),
            SkipReason::MissingTicker => write!(f, "missing_ticker"),
            SkipReason::MissingField(name) => write!(f, "missing_{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<FinancialRecord>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    mode: CoercionMode,
}

impl Normalizer {
    pub fn new(mode: CoercionMode) -> Self {
        Self { mode }
    }

    /// Records for every eligible row, in input order. Never fails.
    pub fn normalize(&self, ticker_hint: Option<&str>, table: &RawTable) -> Vec<FinancialRecord> {
        self.normalize_table(ticker_hint, table).records
    }

    /// Like [`normalize`](Self::normalize) but also reports why rows were dropped.
    pub fn normalize_table(&self, ticker_hint: Option<&str>, table: &RawTable) -> Normalized {
        let columns = ColumnMap::resolve(&table.headers);
        let Some(ts_col) = columns.timestamp else {
            debug!(
                table = ?table.name,
                headers = ?table.headers,
                "No timestamp column; nothing to normalize"
            );
            return Normalized::default();
        };

        let hint = ticker_hint.map(str::trim).filter(|h| !h.is_empty());
        let mut out = Normalized::default();

        for row in 0..table.row_count() {
            match self.convert_row(table, row, ts_col, &columns, hint) {
                Ok(record) => out.records.push(record),
                Err(reason) => out.skipped.push(SkippedRow { row, reason }),
            }
        }

        if !out.skipped.is_empty() {
            debug!(
                table = ?table.name,
                kept = out.records.len(),
                skipped = out.skipped.len(),
                "Rows skipped during normalization"
            );
        }
        out
    }

    fn convert_row(
        &self,
        table: &RawTable,
        row: usize,
        ts_col: usize,
        columns: &ColumnMap,
        hint: Option<&str>,
    ) -> Result<FinancialRecord, SkipReason> {
        let timestamp = coerce_timestamp(table.cell(row, ts_col)).ok_or(SkipReason::BadTimestamp)?;

        // Stored upper-case so lookups by ticker are case-insensitive.
        let ticker = match hint {
            Some(h) => h.to_uppercase(),
            None => columns
                .ticker
                .and_then(|c| cell_text(table.cell(row, c)))
                .map(|t| t.to_uppercase())
                .ok_or(SkipReason::MissingTicker)?,
        };

        let field = |col: Option<usize>, name: &'static str| -> Result<f64, SkipReason> {
            match (col.and_then(|c| coerce_number(table.cell(row, c))), self.mode) {
                (Some(v), _) => Ok(v),
                (None, CoercionMode::Lenient) => Ok(0.0),
                (None, CoercionMode::Strict) => Err(SkipReason::MissingField(name)),
            }
        };

        Ok(FinancialRecord {
            ticker,
            timestamp,
            open: field(columns.open, "open")?,
            high: field(columns.high, "high")?,
            low: field(columns.low, "low")?,
            close: field(columns.close, "close")?,
            volume: field(columns.volume, "volume")?,
            location: columns.location.and_then(|c| cell_text(table.cell(row, c))),
        })
    }
}

// ---------------------------------------------------------------------------
// Cell coercion
// ---------------------------------------------------------------------------

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
];

/// Epoch values above this are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Parse a cell as a timezone-naive instant. Offsets are converted to UTC first.
pub fn coerce_timestamp(cell: &RawCell) -> Option<NaiveDateTime> {
    match cell {
        RawCell::DateTime(dt) => Some(*dt),
        RawCell::Text(s) => parse_timestamp_text(s),
        RawCell::Number(n) if n.is_finite() => {
            let millis = if n.abs() > EPOCH_MILLIS_THRESHOLD { *n } else { n * 1000.0 };
            DateTime::from_timestamp_millis(millis.round() as i64).map(|dt| dt.naive_utc())
        }
        RawCell::Many(values) => values.first().and_then(coerce_timestamp),
        _ => None,
    }
}

fn parse_timestamp_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a cell as a finite float. Accepts thousands separators, a leading
/// currency sign and accounting-style negatives like `(1,250)`.
pub fn coerce_number(cell: &RawCell) -> Option<f64> {
    match cell {
        RawCell::Number(n) if n.is_finite() => Some(*n),
        RawCell::Text(s) => {
            let mut t: String = s.trim().chars().filter(|c| *c != ',' && *c != '$').collect();
            let negative = t.len() >= 2 && t.starts_with('(') && t.ends_with(')');
            if negative {
                t = t[1..t.len() - 1].trim().to_string();
            }
            let v = t.parse::<f64>().ok().filter(|v| v.is_finite())?;
            Some(if negative { -v } else { v })
        }
        RawCell::Many(values) => values.first().and_then(coerce_number),
        _ => None,
    }
}

fn cell_text(cell: &RawCell) -> Option<String> {
    match cell {
        RawCell::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        RawCell::Many(values) => values.first().and_then(cell_text),
        _ => None,
    }
}

/// Present provider bars as a raw table so they flow through the normalizer.
pub fn bars_to_table(bars: &[OhlcvBar]) -> RawTable {
    let num = |v: Option<f64>| v.map(RawCell::Number).unwrap_or(RawCell::Blank);
    let rows = bars
        .iter()
        .map(|b| {
            vec![
                RawCell::DateTime(b.timestamp),
                num(b.open),
                num(b.high),
                num(b.low),
                num(b.close),
                num(b.volume),
            ]
        })
        .collect();

    RawTable::new(
        None,
        ["Date", "Open", "High", "Low", "Close", "Volume"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        rows,
    )
}
