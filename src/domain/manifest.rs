//! Manifest snapshot and the process-wide manifest store.
//!
//! A [`ManifestSnapshot`] is immutable once built. [`ManifestStore`] owns the
//! current snapshot behind an `Arc` and replaces it wholesale on reload, so a
//! query that cloned the `Arc` keeps reading the snapshot it started with.

use crate::domain::error::BarscopeError;
use crate::domain::interval::Interval;
use crate::domain::record::parse_timestamp;
use crate::ports::manifest_port::{ManifestSource, RawManifestEntry};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Physical location of one (symbol, interval) store plus rejection metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub symbol: String,
    pub interval: Interval,
    pub path: PathBuf,
    pub row_count: Option<u64>,
    pub time_bounds: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl Locator {
    pub fn new(symbol: impl Into<String>, interval: Interval, path: impl Into<PathBuf>) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            path: path.into(),
            row_count: None,
            time_bounds: None,
        }
    }

    /// False only when metadata proves the store holds nothing in `[from, to]`.
    pub fn may_overlap(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        if from > to || self.row_count == Some(0) {
            return false;
        }
        match self.time_bounds {
            Some((min, max)) => min <= to && max >= from,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ManifestSnapshot {
    source_name: String,
    entries: BTreeMap<String, BTreeMap<Interval, Locator>>,
    dropped: usize,
}

impl ManifestSnapshot {
    /// Validate raw rows into a snapshot. Invalid rows are logged and dropped.
    pub fn from_raw(source_name: &str, raw: Vec<RawManifestEntry>) -> Self {
        let mut entries: BTreeMap<String, BTreeMap<Interval, Locator>> = BTreeMap::new();
        let mut dropped = 0;

        for row in raw {
            let locator = match validate_entry(&row) {
                Ok(l) => l,
                Err(reason) => {
                    warn!(
                        source = source_name,
                        symbol = %row.symbol,
                        interval = %row.interval,
                        path = %row.path,
                        "dropping manifest entry: {reason}"
                    );
                    dropped += 1;
                    continue;
                }
            };

            let by_interval = entries.entry(locator.symbol.clone()).or_default();
            if let Some(existing) = by_interval.get(&locator.interval) {
                warn!(
                    source = source_name,
                    symbol = %locator.symbol,
                    interval = %locator.interval,
                    kept = %existing.path.display(),
                    ignored = %locator.path.display(),
                    "dropping duplicate manifest entry"
                );
                dropped += 1;
                continue;
            }
            by_interval.insert(locator.interval, locator);
        }

        Self {
            source_name: source_name.to_string(),
            entries,
            dropped,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Every symbol with at least one valid entry, ascending.
    pub fn list_symbols(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn lookup(&self, symbol: &str, interval: Interval) -> Option<&Locator> {
        self.entries.get(symbol)?.get(&interval)
    }

    /// All locators for `symbol`, finest interval first.
    pub fn intervals_for(&self, symbol: &str) -> Vec<&Locator> {
        self.entries
            .get(symbol)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped
    }
}

fn validate_entry(row: &RawManifestEntry) -> Result<Locator, String> {
    let symbol = row.symbol.trim();
    if symbol.is_empty() {
        return Err("empty symbol".into());
    }
    if row.path.trim().is_empty() {
        return Err("empty path".into());
    }
    let interval: Interval = row.interval.parse().map_err(|e: BarscopeError| e.to_string())?;

    let parse_bound = |value: &Option<String>| -> Result<Option<NaiveDateTime>, String> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| e.to_string())
    };
    let time_bounds = match (parse_bound(&row.min_time)?, parse_bound(&row.max_time)?) {
        (Some(min), Some(max)) if min > max => {
            return Err(format!("min_time {min} is after max_time {max}"));
        }
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    };

    Ok(Locator {
        symbol: symbol.to_string(),
        interval,
        path: PathBuf::from(row.path.trim()),
        row_count: row.row_count,
        time_bounds,
    })
}

/// Process-wide manifest holder with copy-on-write reload.
pub struct ManifestStore {
    source: Box<dyn ManifestSource + Send + Sync>,
    current: RwLock<Arc<ManifestSnapshot>>,
    generation: AtomicU64,
}

impl ManifestStore {
    /// Initial load. A failure here is fatal for the caller: there is no prior snapshot to serve.
    pub fn load(source: Box<dyn ManifestSource + Send + Sync>) -> Result<Self, BarscopeError> {
        let snapshot = Self::read_snapshot(source.as_ref())?;
        Ok(Self {
            source,
            current: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(1),
        })
    }

    /// The snapshot in effect right now. Hold on to it for the whole request.
    pub fn snapshot(&self) -> Arc<ManifestSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the source and swap in a fresh snapshot.
    ///
    /// On failure the previous snapshot stays in service and the error is returned.
    pub fn reload(&self) -> Result<Arc<ManifestSnapshot>, BarscopeError> {
        let snapshot = match Self::read_snapshot(self.source.as_ref()) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!(source = %self.source.name(), "manifest reload failed, keeping stale snapshot: {e}");
                return Err(e);
            }
        };
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&snapshot);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(snapshot)
    }

    /// Number of snapshots installed so far, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn list_symbols(&self) -> Vec<String> {
        self.snapshot().list_symbols()
    }

    pub fn lookup(&self, symbol: &str, interval: Interval) -> Option<Locator> {
        self.snapshot().lookup(symbol, interval).cloned()
    }

    fn read_snapshot(source: &(dyn ManifestSource + Send + Sync)) -> Result<ManifestSnapshot, BarscopeError> {
        let name = source.name();
        let raw = source.read_entries()?;
        let snapshot = ManifestSnapshot::from_raw(&name, raw);
        info!(
            source = %name,
            symbols = snapshot.entries.len(),
            entries = snapshot.entry_count(),
            dropped = snapshot.dropped_count(),
            "manifest loaded"
        );
        Ok(snapshot)
    }
}
