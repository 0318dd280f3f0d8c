//! Rollup resolution: (symbol, interval) to storage locator.

use crate::domain::error::BarscopeError;
use crate::domain::interval::Interval;
use crate::domain::manifest::{Locator, ManifestSnapshot};

/// Resolve against a snapshot. Performs no I/O against data files.
///
/// `NotFound` is per-symbol information, not a request failure; the executor
/// turns it into "zero rows" for that symbol.
pub fn resolve(
    snapshot: &ManifestSnapshot,
    symbol: &str,
    interval: Interval,
) -> Result<Locator, BarscopeError> {
    snapshot
        .lookup(symbol, interval)
        .cloned()
        .ok_or_else(|| BarscopeError::NotFound {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        })
}

/// Resolve each symbol, splitting hits from misses. Input order is kept in both lists.
pub fn resolve_all<'a, I>(
    snapshot: &ManifestSnapshot,
    symbols: I,
    interval: Interval,
) -> (Vec<Locator>, Vec<String>)
where
    I: IntoIterator<Item = &'a String>,
{
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for symbol in symbols {
        match resolve(snapshot, symbol, interval) {
            Ok(locator) => found.push(locator),
            Err(_) => missing.push(symbol.clone()),
        }
    }
    (found, missing)
}
