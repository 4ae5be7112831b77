use crate::error::Result;
use crate::types::{RawCell, RawTable};

/// Parse CSV bytes into a single unnamed table. The first record is the header.
pub fn parse_csv(bytes: &[u8]) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(RawCell::from_text).collect());
    }

    Ok(RawTable::new(None, headers, rows))
}
