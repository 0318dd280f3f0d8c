//! Range scan port over per-symbol, per-interval stores.

use crate::domain::error::BarscopeError;
use crate::domain::manifest::Locator;
use crate::domain::metric::Metric;
use crate::domain::record::Record;
use chrono::NaiveDateTime;

/// Lazy, forward-only record sequence. Ends after the first `Err` item.
pub type RecordStream = Box<dyn Iterator<Item = Result<Record, BarscopeError>> + Send>;

pub trait RangeScanner {
    /// Stream the records of `locator` with `from <= time <= to`, populating only `metrics`.
    ///
    /// `from > to` yields an empty stream. Opening failures surface as
    /// `StorageUnavailable`; a metric missing from the store as `UnknownMetric`.
    fn scan(
        &self,
        locator: &Locator,
        from: NaiveDateTime,
        to: NaiveDateTime,
        metrics: &[Metric],
    ) -> Result<RecordStream, BarscopeError>;
}
