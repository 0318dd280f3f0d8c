//! Result export port.

use crate::domain::error::BarscopeError;
use crate::domain::metric::Metric;
use crate::domain::record::Record;

pub trait ExportPort {
    /// Render `records` restricted to `metrics`, in that column order.
    fn render(&self, records: &[Record], metrics: &[Metric]) -> Result<String, BarscopeError>;

    /// Filename extension of the rendered artifact.
    fn extension(&self) -> &'static str;
}
