#![allow(dead_code)]

use barscope::domain::error::BarscopeError;
use barscope::domain::manifest::{Locator, ManifestStore};
use barscope::domain::metric::Metric;
use barscope::domain::record::{parse_timestamp, Record};
use barscope::ports::manifest_port::{ManifestSource, RawManifestEntry};
use barscope::ports::storage_port::{RangeScanner, RecordStream};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory scanner with scripted failures, latency and call accounting.
#[derive(Default)]
pub struct MockScanner {
    pub data: HashMap<String, Vec<Record>>,
    /// Symbol → number of leading `scan` calls that fail with `StorageUnavailable`.
    pub open_failures: Mutex<HashMap<String, usize>>,
    /// Symbols whose stream yields one row and then a corrupt-row error, on every call.
    pub broken_streams: HashSet<String>,
    /// Symbols whose `scan` panics.
    pub panicking: HashSet<String>,
    /// Symbol → metric its store lacks.
    pub missing_metric: HashMap<String, Metric>,
    /// Blocking sleep before the stream opens.
    pub open_delay: HashMap<String, std::time::Duration>,
    /// Blocking sleep before every row.
    pub row_delay: HashMap<String, std::time::Duration>,
    pub calls: Mutex<HashMap<String, usize>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, symbol: &str, records: Vec<Record>) -> Self {
        self.data.insert(symbol.to_string(), records);
        self
    }

    pub fn failing_opens(self, symbol: &str, times: usize) -> Self {
        self.open_failures
            .lock()
            .unwrap()
            .insert(symbol.to_string(), times);
        self
    }

    pub fn with_broken_stream(mut self, symbol: &str) -> Self {
        self.broken_streams.insert(symbol.to_string());
        self
    }

    pub fn panicking_on(mut self, symbol: &str) -> Self {
        self.panicking.insert(symbol.to_string());
        self
    }

    pub fn without_metric(mut self, symbol: &str, metric: Metric) -> Self {
        self.missing_metric.insert(symbol.to_string(), metric);
        self
    }

    pub fn with_open_delay(mut self, symbol: &str, millis: u64) -> Self {
        self.open_delay
            .insert(symbol.to_string(), std::time::Duration::from_millis(millis));
        self
    }

    pub fn with_row_delay(mut self, symbol: &str, millis: u64) -> Self {
        self.row_delay
            .insert(symbol.to_string(), std::time::Duration::from_millis(millis));
        self
    }

    pub fn calls_for(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RangeScanner for MockScanner {
    fn scan(
        &self,
        locator: &Locator,
        from: NaiveDateTime,
        to: NaiveDateTime,
        metrics: &[Metric],
    ) -> Result<RecordStream, BarscopeError> {
        let symbol = locator.symbol.as_str();
        *self
            .calls
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.in_flight));

        if let Some(delay) = self.open_delay.get(symbol) {
            std::thread::sleep(*delay);
        }

        if self.panicking.contains(symbol) {
            panic!("scanner for {symbol} panicked");
        }

        if let Some(remaining) = self.open_failures.lock().unwrap().get_mut(symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BarscopeError::storage(
                    locator.path.display(),
                    "connection reset",
                ));
            }
        }

        if let Some(metric) = self.missing_metric.get(symbol) {
            if metrics.contains(metric) {
                return Err(BarscopeError::UnknownMetric(metric.as_str().to_string()));
            }
        }

        let rows: Vec<Record> = if from > to {
            Vec::new()
        } else {
            self.data
                .get(symbol)
                .map(|all| {
                    all.iter()
                        .filter(|r| r.time >= from && r.time <= to)
                        .map(|r| project(r, metrics))
                        .collect()
                })
                .unwrap_or_default()
        };

        let row_delay = self.row_delay.get(symbol).copied();
        let path = locator.path.display().to_string();
        let mut items: Vec<Result<Record, BarscopeError>> = rows.into_iter().map(Ok).collect();
        if self.broken_streams.contains(symbol) {
            items.truncate(1);
            items.push(Err(BarscopeError::storage(&path, "corrupt row at byte 42")));
        }

        // The in-flight count covers the whole stream lifetime, not just the open.
        Ok(Box::new(items.into_iter().inspect(move |_| {
            let _held = &guard;
            if let Some(delay) = row_delay {
                std::thread::sleep(delay);
            }
        })))
    }
}

fn project(record: &Record, metrics: &[Metric]) -> Record {
    let mut out = Record::new(record.time, record.symbol.clone());
    for &metric in metrics {
        if let Some(value) = record.get(metric) {
            out.set(metric, value);
        }
    }
    out
}

/// Manifest source whose contents and availability can change after it is handed to a store.
#[derive(Clone, Default)]
pub struct MockManifestSource {
    pub entries: Arc<Mutex<Vec<RawManifestEntry>>>,
    pub unavailable: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
}

impl MockManifestSource {
    pub fn new(entries: Vec<RawManifestEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            ..Default::default()
        }
    }

    pub fn set_entries(&self, entries: Vec<RawManifestEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl ManifestSource for MockManifestSource {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn read_entries(&self) -> Result<Vec<RawManifestEntry>, BarscopeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BarscopeError::ManifestUnavailable {
                source_name: self.name(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.entries.lock().unwrap().clone())
    }
}

pub fn ts(s: &str) -> NaiveDateTime {
    parse_timestamp(s).unwrap()
}

pub fn entry(symbol: &str, interval: &str) -> RawManifestEntry {
    RawManifestEntry {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        path: format!("{interval}/{symbol}_full_{interval}.txt"),
        ..Default::default()
    }
}

pub fn manifest_store(entries: Vec<RawManifestEntry>) -> Arc<ManifestStore> {
    Arc::new(ManifestStore::load(Box::new(MockManifestSource::new(entries))).unwrap())
}

/// A fully populated bar.
pub fn bar(symbol: &str, time: NaiveDateTime, close: f64) -> Record {
    let mut r = Record::new(time, symbol);
    r.open = Some(close - 0.5);
    r.high = Some(close + 1.0);
    r.low = Some(close - 1.0);
    r.close = Some(close);
    r.volume = Some(1_000);
    r
}

/// `n` consecutive bars starting at `start`, `step_minutes` apart, closes 100, 101, ...
pub fn series(symbol: &str, start: &str, n: usize, step_minutes: i64) -> Vec<Record> {
    let start = ts(start);
    (0..n)
        .map(|i| bar(symbol, start + Duration::minutes(step_minutes * i as i64), 100.0 + i as f64))
        .collect()
}

/// Headerless store file in the on-disk layout ingestion produces.
pub fn write_store(dir: &Path, relative: &str, records: &[Record]) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let body: String = records
        .iter()
        .map(|r| {
            format!(
                "{},{},{},{},{},{}\n",
                r.time.format("%Y-%m-%d %H:%M:%S"),
                r.open.unwrap(),
                r.high.unwrap(),
                r.low.unwrap(),
                r.close.unwrap(),
                r.volume.unwrap()
            )
        })
        .collect();
    std::fs::write(path, body).unwrap();
}

/// `manifest.json` listing one file per (symbol, interval, relative path).
pub fn write_manifest(dir: &Path, files: &[(&str, &str, &str)]) -> std::path::PathBuf {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(symbol, interval, path)| {
            serde_json::json!({"path": path, "interval": interval, "tags": [symbol]})
        })
        .collect();
    let path = dir.join("manifest.json");
    std::fs::write(&path, serde_json::json!({ "files": files }).to_string()).unwrap();
    path
}

pub fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("barscope.ini");
    std::fs::write(&path, content).unwrap();
    path
}
