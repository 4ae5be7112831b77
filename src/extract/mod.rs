//! Turns uploaded document bytes into raw tables and free text.
//!
//! Extraction is blocking, CPU-bound work; async callers run it on
//! `spawn_blocking`.

mod delimited;
mod pdf;
mod spreadsheet;

use tracing::debug;

use crate::error::Result;
use crate::types::{DocumentKind, RawTable};

pub use pdf::detect_text_tables;

/// Output of a single extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    /// Free text; empty for CSV and spreadsheets.
    pub text: String,
    pub tables: Vec<RawTable>,
}

/// Dispatch on the filename extension, then parse.
/// Unsupported extensions fail before any bytes are read.
pub fn extract(bytes: &[u8], filename: &str) -> Result<Extracted> {
    let kind = DocumentKind::from_filename(filename)?;
    extract_kind(kind, bytes)
}

pub fn extract_kind(kind: DocumentKind, bytes: &[u8]) -> Result<Extracted> {
    let extracted = match kind {
        DocumentKind::Csv => Extracted {
            text: String::new(),
            tables: vec![delimited::parse_csv(bytes)?],
        },
        DocumentKind::Excel => Extracted {
            text: String::new(),
            tables: spreadsheet::parse_workbook(bytes)?,
        },
        DocumentKind::Pdf => pdf::parse_pdf(bytes)?,
    };
    debug!(
        kind = %kind,
        tables = extracted.tables.len(),
        text_chars = extracted.text.len(),
        "Extraction complete"
    );
    Ok(extracted)
}
