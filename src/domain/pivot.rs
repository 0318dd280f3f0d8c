//! Long-to-wide reshape onto a shared time axis.
//!
//! Rows are keyed by exact timestamp equality; there is no bucketing. A symbol
//! with no record at a row's instant gets `None` there. Values are never
//! interpolated or carried forward.

use crate::domain::metric::Metric;
use crate::domain::query::normalize_symbols;
use crate::domain::record::{serialize_time, Record};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    #[serde(serialize_with = "serialize_time")]
    pub time: NaiveDateTime,
    /// Aligned with [`SeriesTable::series`].
    pub values: Vec<Option<f64>>,
}

/// Wide table for one plotted metric: one column per surviving symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesTable {
    pub metric: Metric,
    pub series: Vec<String>,
    pub rows: Vec<SeriesRow>,
}

impl SeriesTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, symbol: &str) -> Option<usize> {
        self.series.iter().position(|s| s == symbol)
    }

    pub fn value(&self, row: usize, symbol: &str) -> Option<f64> {
        let col = self.column_index(symbol)?;
        self.rows.get(row)?.values.get(col).copied().flatten()
    }

    /// Values of one symbol down the whole time axis.
    pub fn column(&self, symbol: &str) -> Option<Vec<Option<f64>>> {
        let col = self.column_index(symbol)?;
        Some(self.rows.iter().map(|r| r.values[col]).collect())
    }

    pub fn timeline(&self) -> Vec<NaiveDateTime> {
        self.rows.iter().map(|r| r.time).collect()
    }
}

/// Pivot `records` into a [`SeriesTable`] for `metric`.
///
/// Series order follows `symbols`. Records of other symbols are ignored. A
/// symbol contributing no value for `metric` anywhere is dropped from the
/// series list. If one symbol has several records at the same instant, the
/// first one seen wins.
pub fn pivot(records: &[Record], symbols: &[String], metric: Metric) -> SeriesTable {
    let requested = normalize_symbols(symbols);
    let column_of: HashMap<&str, usize> = requested
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let mut grid: BTreeMap<NaiveDateTime, Vec<Option<f64>>> = BTreeMap::new();
    for record in records {
        let Some(&col) = column_of.get(record.symbol.as_str()) else {
            continue;
        };
        let row = grid
            .entry(record.time)
            .or_insert_with(|| vec![None; requested.len()]);
        if row[col].is_none() {
            row[col] = record.get(metric).map(|v| v.as_f64());
        }
    }

    let kept: Vec<usize> = (0..requested.len())
        .filter(|&col| grid.values().any(|row| row[col].is_some()))
        .collect();

    let rows = grid
        .into_iter()
        .map(|(time, values)| SeriesRow {
            time,
            values: kept.iter().map(|&col| values[col]).collect(),
        })
        .collect();

    SeriesTable {
        metric,
        series: kept.iter().map(|&col| requested[col].clone()).collect(),
        rows,
    }
}
