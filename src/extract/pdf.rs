use std::panic::{self, AssertUnwindSafe};

use crate::error::{AppError, Result};
use crate::types::{RawCell, RawTable};

use super::Extracted;

/// Smallest run of aligned lines treated as a table (header + one row).
const MIN_TABLE_LINES: usize = 2;

pub fn parse_pdf(bytes: &[u8]) -> Result<Extracted> {
    // pdf-extract panics on some malformed inputs.
    let text = match panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    })) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return Err(AppError::Extraction(format!("unreadable PDF: {e}"))),
        Err(_) => return Err(AppError::Extraction("PDF parser aborted on this file".to_string())),
    };

    let tables = detect_text_tables(&text);
    Ok(Extracted { text, tables })
}

/// Recover table regions from laid-out text: consecutive lines that split
/// into the same number (at least 2) of cells on tabs or runs of 2+ spaces.
/// The first line of each run is the header.
pub fn detect_text_tables(text: &str) -> Vec<RawTable> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        let cells = split_columns(line);
        let continues = cells.len() >= 2 && run.first().map_or(true, |h| h.len() == cells.len());
        if continues {
            run.push(cells);
            continue;
        }
        flush_run(&mut run, &mut tables);
        if cells.len() >= 2 {
            run.push(cells);
        }
    }
    flush_run(&mut run, &mut tables);
    tables
}

fn flush_run(run: &mut Vec<Vec<String>>, tables: &mut Vec<RawTable>) {
    if run.len() >= MIN_TABLE_LINES {
        let mut lines = run.drain(..);
        if let Some(headers) = lines.next() {
            let rows = lines
                .map(|cells| cells.iter().map(|c| RawCell::from_text(c)).collect())
                .collect();
            tables.push(RawTable::new(None, headers, rows));
        }
    }
    run.clear();
}

fn split_columns(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;

    for ch in line.trim().chars() {
        match ch {
            '\t' => {
                push_cell(&mut cells, &mut current);
                spaces = 0;
            }
            ' ' => spaces += 1,
            _ => {
                if spaces >= 2 {
                    push_cell(&mut cells, &mut current);
                } else if spaces == 1 {
                    current.push(' ');
                }
                spaces = 0;
                current.push(ch);
            }
        }
    }
    push_cell(&mut cells, &mut current);
    cells
}

fn push_cell(cells: &mut Vec<String>, current: &mut String) {
    let cell = current.trim();
    if !cell.is_empty() {
        cells.push(cell.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_tabs_and_wide_gaps() {
        assert_eq!(split_columns("Open Price\t101.5"), vec!["Open Price", "101.5"]);
        assert_eq!(split_columns("Date    Close   Volume"), vec!["Date", "Close", "Volume"]);
        assert_eq!(split_columns("just a sentence here"), vec!["just a sentence here"]);
    }

    #[test]
    fn finds_table_between_prose() {
        let text = "Quarterly results were strong.\n\
                    Date        Close     Volume\n\
                    2024-01-02  102.0     1000\n\
                    2024-01-03  103.5     1200\n\
                    Outlook remains positive.\n";
        let tables = detect_text_tables(text);
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.headers, vec!["Date", "Close", "Volume"]);
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.cell(1, 1), &RawCell::Number(103.5));
    }

    #[test]
    fn header_only_run_is_dropped() {
        let text = "Date    Close\nno table here\n";
        assert!(detect_text_tables(text).is_empty());
    }

    #[test]
    fn column_count_change_starts_a_new_run() {
        let text = "A  B\n1  2\nX  Y  Z\n7  8  9\n";
        let tables = detect_text_tables(text);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].headers, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn prose_has_no_tables() {
        assert!(detect_text_tables("One line.\nAnother line.\n").is_empty());
    }
}
