//! Deterministic stride downsampling for chart payloads.
//!
//! Uniform positional sampling: keeps positions `0, stride, 2*stride, ...`
//! with `stride = ceil(len / max_points)`. Local extrema are not guaranteed
//! to survive; latency is bounded instead.

use crate::domain::record::{sort_canonical, Record, ResultSet};
use std::collections::BTreeMap;

/// Default point budget for chart responses.
pub const DEFAULT_MAX_POINTS: usize = 3000;

pub fn stride_for(len: usize, max_points: usize) -> usize {
    if max_points == 0 || len <= max_points {
        1
    } else {
        len.div_ceil(max_points)
    }
}

/// Bound `items` to at most `max_points` entries. Input is returned untouched when it already fits.
///
/// A budget of zero yields an empty output.
pub fn reduce<T>(items: Vec<T>, max_points: usize) -> Vec<T> {
    if max_points == 0 {
        return Vec::new();
    }
    if items.len() <= max_points {
        return items;
    }
    let stride = stride_for(items.len(), max_points);
    items.into_iter().step_by(stride).collect()
}

/// Apply [`reduce`] to each symbol's series independently with the same budget,
/// then restore canonical (time, symbol) order.
pub fn reduce_per_series(records: ResultSet, max_points: usize) -> ResultSet {
    let mut by_symbol: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in records {
        by_symbol.entry(record.symbol.clone()).or_default().push(record);
    }
    let mut out: ResultSet = by_symbol
        .into_values()
        .flat_map(|series| reduce(series, max_points))
        .collect();
    sort_canonical(&mut out);
    out
}
