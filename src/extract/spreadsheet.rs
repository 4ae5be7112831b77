use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::types::{RawCell, RawTable};

/// One table per sheet, named after the sheet. The first non-empty row of a
/// sheet is its header; sheets with nothing in them are dropped.
pub fn parse_workbook(bytes: &[u8]) -> Result<Vec<RawTable>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| AppError::Extraction(format!("unreadable workbook: {e}")))?;

    let mut tables = Vec::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(r) => r,
            Err(e) => {
                return Err(AppError::Extraction(format!("sheet '{name}': {e}")));
            }
        };

        let mut rows = range
            .rows()
            .map(|r| r.iter().map(to_raw_cell).collect::<Vec<_>>())
            .skip_while(|r| r.iter().all(RawCell::is_blank));

        let Some(header_row) = rows.next() else {
            warn!(sheet = %name, "Skipping empty sheet");
            continue;
        };
        let headers = header_row.iter().map(header_label).collect();
        let body = rows
            .filter(|r| !r.iter().all(RawCell::is_blank))
            .collect();

        tables.push(RawTable::new(Some(name), headers, body));
    }
    Ok(tables)
}

fn to_raw_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Float(f) if f.is_finite() => RawCell::Number(*f),
        Data::Float(_) => RawCell::Blank,
        Data::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                RawCell::Blank
            } else {
                RawCell::Text(t.to_string())
            }
        }
        Data::Bool(b) => RawCell::Text(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(dt) => RawCell::DateTime(dt),
            None => RawCell::Text(cell.to_string()),
        },
        Data::DurationIso(s) => RawCell::Text(s.clone()),
        Data::Error(_) | Data::Empty => RawCell::Blank,
    }
}

fn header_label(cell: &RawCell) -> String {
    match cell {
        RawCell::Text(s) => s.clone(),
        RawCell::Number(n) => n.to_string(),
        RawCell::DateTime(dt) => dt.to_string(),
        RawCell::Blank | RawCell::Many(_) => String::new(),
    }
}
