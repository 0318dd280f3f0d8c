//! Manifest metadata port.

use crate::domain::error::BarscopeError;

/// An unvalidated manifest row as published by ingestion.
///
/// Validation into locators happens once, in
/// [`ManifestSnapshot::from_raw`](crate::domain::manifest::ManifestSnapshot::from_raw),
/// so every source applies the same rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawManifestEntry {
    pub symbol: String,
    pub interval: String,
    pub path: String,
    pub row_count: Option<u64>,
    pub min_time: Option<String>,
    pub max_time: Option<String>,
}

pub trait ManifestSource {
    /// Human-readable origin, used in logs and errors.
    fn name(&self) -> String;

    /// Read every candidate entry. Fails with `ManifestUnavailable` when the
    /// backing metadata cannot be read or parsed at all.
    fn read_entries(&self) -> Result<Vec<RawManifestEntry>, BarscopeError>;
}
