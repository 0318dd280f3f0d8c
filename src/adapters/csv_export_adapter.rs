//! Long-format CSV export.

use crate::domain::error::BarscopeError;
use crate::domain::metric::Metric;
use crate::domain::record::{format_timestamp, Record};
use crate::ports::export_port::ExportPort;

/// Render `records` as CSV: `Time,Symbol,<Metric>...`, one row per record.
///
/// Absent metric values are empty fields. Empty input yields the header only.
pub fn to_csv(records: &[Record], metrics: &[Metric]) -> Result<String, BarscopeError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["Time", "Symbol"];
    header.extend(metrics.iter().map(|m| m.header_name()));
    wtr.write_record(&header).map_err(export_error)?;

    for record in records {
        let mut row = Vec::with_capacity(metrics.len() + 2);
        row.push(format_timestamp(&record.time));
        row.push(record.symbol.clone());
        for &metric in metrics {
            row.push(record.get(metric).map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&row).map_err(export_error)?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| export_error(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| BarscopeError::Export {
        reason: e.to_string(),
    })
}

fn export_error(e: impl std::fmt::Display) -> BarscopeError {
    BarscopeError::Export {
        reason: format!("CSV write error: {e}"),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvExporter;

impl ExportPort for CsvExporter {
    fn render(&self, records: &[Record], metrics: &[Metric]) -> Result<String, BarscopeError> {
        to_csv(records, metrics)
    }

    fn extension(&self) -> &'static str {
        "csv"
    }
}
