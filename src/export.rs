use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::{PortResult, ScanReport};

/// Write results as CSV with a `Port,Status,Service` header.
pub fn write_csv<W: Write>(writer: W, results: &[PortResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Port", "Status", "Service"])?;
    for r in results {
        let port = r.port.to_string();
        wtr.write_record([
            port.as_str(),
            r.state.as_str(),
            r.service.as_deref().unwrap_or(""),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the whole report as pretty JSON.
pub fn write_json<W: Write>(writer: W, report: &ScanReport) -> Result<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

pub fn write_csv_file(path: &Path, results: &[PortResult]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create CSV file: {}", path.display()))?;
    write_csv(file, results)
}

pub fn write_json_file(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create JSON file: {}", path.display()))?;
    write_json(file, report)
}

/// Case-insensitive substring match over port, status and service.
pub fn filter_results<'a>(results: &'a [PortResult], query: &str) -> Vec<&'a PortResult> {
    let q = query.trim().to_lowercase();
    results
        .iter()
        .filter(|r| {
            if q.is_empty() {
                return true;
            }
            let row = format!(
                "{} {} {}",
                r.port,
                r.state.as_str(),
                r.service.as_deref().unwrap_or("")
            )
            .to_lowercase();
            row.contains(&q)
        })
        .collect()
}
