//! Append path: ndjson decoding and batch ingest.

pub mod ndjson;

pub use ndjson::decode_row;

use crate::error::AppendError;
use crate::storage::table::Table;
use std::io::BufRead;
use tracing::warn;

/// Outcome of ingesting one ndjson stream.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub appended: u64,
    /// `(1-based line number, error)` of every rejected line.
    pub failures: Vec<(u64, AppendError)>,
}

/// Ingest an ndjson stream into one partition. A failed line is reported
/// and skipped; the partition stays consistent throughout.
pub fn ingest_ndjson(
    table: &mut Table,
    partition_id: usize,
    reader: impl BufRead,
) -> std::io::Result<IngestReport> {
    let mut report = IngestReport::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index as u64 + 1;
        let result = decode_row(table.schema(), &line)
            .and_then(|row| table.append(partition_id, &row));
        match result {
            Ok(()) => report.appended += 1,
            Err(error) => {
                warn!(line = line_number, %error, "rejected input line");
                report.failures.push((line_number, error));
            }
        }
    }
    Ok(report)
}
