use crate::error::Result;
use crate::types::MeterRecord;
use csv::ReaderBuilder;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub parse_errors: usize,
    pub with_coordinates: usize,
    pub undated_disconnections: usize,
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<(Vec<MeterRecord>, LoadReport)> {
    let file = std::fs::File::open(path.as_ref())?;
    info!(path = %path.as_ref().display(), "loading meter records");
    load_from_reader(file)
}

/// Read a header-first CSV into typed records.
///
/// Headers are matched through the alias table once per file; rows that the
/// CSV reader cannot decode are counted and skipped. Cell contents are never
/// rejected: bad dates and coordinates simply come out as `None`.
pub fn load_from_reader<R: Read>(reader: R) -> Result<(Vec<MeterRecord>, LoadReport)> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut report = LoadReport::default();
    let mut records: Vec<MeterRecord> = Vec::new();
    for result in rdr.records() {
        report.total_rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(row = report.total_rows, error = %e, "skipping unreadable row");
                report.parse_errors += 1;
                continue;
            }
        };
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let record = MeterRecord::from_pairs(headers.iter().zip(row.iter()));
        if record.coordinates().is_some() {
            report.with_coordinates += 1;
        }
        if record.disconnection_date.is_none() {
            report.undated_disconnections += 1;
        }
        records.push(record);
    }

    report.loaded_rows = records.len();
    info!(
        total = report.total_rows,
        loaded = report.loaded_rows,
        errors = report.parse_errors,
        "meter records loaded"
    );
    Ok((records, report))
}
