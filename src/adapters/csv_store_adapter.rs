//! Range scanner over time-ascending CSV rollup files.
//!
//! The first row with `time >= from` is located by binary search over byte
//! offsets: each probe seeks, skips to the next line start and parses a
//! single row. A `csv::Reader` then streams forward from that offset until
//! `time > to`.

use crate::domain::error::BarscopeError;
use crate::domain::manifest::Locator;
use crate::domain::metric::Metric;
use crate::domain::record::{parse_timestamp, MetricValue, Record};
use crate::ports::storage_port::{RangeScanner, RecordStream};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

const TIME_COLUMN_NAMES: [&str; 5] = ["time", "timestamp", "ts", "date", "datetime"];

pub struct CsvStoreAdapter {
    root: PathBuf,
}

impl CsvStoreAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve_path(&self, locator: &Locator) -> PathBuf {
        if locator.path.is_absolute() {
            locator.path.clone()
        } else {
            self.root.join(&locator.path)
        }
    }
}

impl RangeScanner for CsvStoreAdapter {
    fn scan(
        &self,
        locator: &Locator,
        from: NaiveDateTime,
        to: NaiveDateTime,
        metrics: &[Metric],
    ) -> Result<RecordStream, BarscopeError> {
        let path = self.resolve_path(locator);
        let display = path.display().to_string();

        let file = File::open(&path).map_err(|e| BarscopeError::storage(&display, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| BarscopeError::storage(&display, e))?
            .len();
        let mut reader = BufReader::new(file);

        let Some((layout, data_start)) = read_layout(&mut reader, &display, metrics)? else {
            return Ok(Box::new(std::iter::empty()));
        };
        if from > to {
            return Ok(Box::new(std::iter::empty()));
        }

        let mut probe = Probe {
            reader: &mut reader,
            data_start,
            layout: &layout,
            path: &display,
        };
        let start = probe.first_at_or_after(from, file_len)?;
        reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| BarscopeError::storage(&display, e))?;

        Ok(Box::new(RowStream {
            rows: csv_reader().from_reader(reader),
            record: StringRecord::new(),
            base: start,
            from,
            to,
            layout,
            metrics: metrics.to_vec(),
            symbol: locator.symbol.clone(),
            path: display,
            done: false,
        }))
    }
}

/// Stores have no header flag, so header detection is done by hand on the first record.
fn csv_reader() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(false).flexible(true).trim(Trim::All);
    builder
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

/// Column positions of the time field and of each metric.
#[derive(Debug, Clone, PartialEq)]
struct ColumnLayout {
    time: usize,
    metrics: [Option<usize>; 5],
}

impl ColumnLayout {
    fn headerless() -> Self {
        Self {
            time: 0,
            metrics: Metric::ALL.map(|m| Some(m.default_column())),
        }
    }

    fn from_header(header: &StringRecord, path: &str) -> Result<Self, BarscopeError> {
        let names: Vec<String> = header.iter().map(str::to_lowercase).collect();
        let time = names
            .iter()
            .position(|n| TIME_COLUMN_NAMES.contains(&n.as_str()))
            .ok_or_else(|| BarscopeError::storage(path, "header has no time column"))?;
        let metrics = Metric::ALL.map(|m| names.iter().position(|n| n == m.as_str()));
        Ok(Self { time, metrics })
    }

    fn column(&self, metric: Metric) -> Option<usize> {
        self.metrics[metric as usize]
    }

    fn time_of(&self, record: &StringRecord) -> Option<NaiveDateTime> {
        parse_timestamp(record.get(self.time)?).ok()
    }
}

/// Read the first non-blank record to decide between a header row and data.
///
/// Returns `None` for a file with no rows at all, otherwise the layout and
/// the byte offset where data rows begin.
fn read_layout(
    reader: &mut BufReader<File>,
    path: &str,
    metrics: &[Metric],
) -> Result<Option<(ColumnLayout, u64)>, BarscopeError> {
    let mut rows = csv_reader().from_reader(&mut *reader);
    let mut first = StringRecord::new();
    loop {
        let more = rows
            .read_record(&mut first)
            .map_err(|e| BarscopeError::storage(path, e))?;
        if !more {
            return Ok(None);
        }
        if !is_blank(&first) {
            break;
        }
    }

    let (layout, data_start) = match first.get(0).map(parse_timestamp) {
        Some(Ok(_)) => (
            ColumnLayout::headerless(),
            first.position().map_or(0, |p| p.byte()),
        ),
        _ => (ColumnLayout::from_header(&first, path)?, rows.position().byte()),
    };

    for &metric in metrics {
        if layout.column(metric).is_none() {
            return Err(BarscopeError::UnknownMetric(metric.as_str().to_string()));
        }
    }
    Ok(Some((layout, data_start)))
}

/// Next non-blank line at or after the reader's position, which must be `offset`.
fn next_line(reader: &mut BufReader<File>, mut offset: u64) -> std::io::Result<Option<(u64, Vec<u8>)>> {
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        let start = offset;
        offset += n as u64;
        if !raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some((start, raw)));
        }
    }
}

struct Probe<'a> {
    reader: &'a mut BufReader<File>,
    data_start: u64,
    layout: &'a ColumnLayout,
    path: &'a str,
}

impl Probe<'_> {
    /// Start offset of the first data line beginning at or after `pos`, with its timestamp.
    fn line_at(&mut self, pos: u64) -> Result<Option<(u64, NaiveDateTime)>, BarscopeError> {
        let mut offset = pos;
        if pos > self.data_start {
            // Step back one byte so a `pos` that is already a line start is kept.
            self.reader
                .seek(SeekFrom::Start(pos - 1))
                .map_err(|e| BarscopeError::storage(self.path, e))?;
            let mut skipped = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut skipped)
                .map_err(|e| BarscopeError::storage(self.path, e))?;
            offset = pos - 1 + n as u64;
        } else {
            self.reader
                .seek(SeekFrom::Start(pos))
                .map_err(|e| BarscopeError::storage(self.path, e))?;
        }

        match next_line(self.reader, offset).map_err(|e| BarscopeError::storage(self.path, e))? {
            None => Ok(None),
            Some((start, line)) => {
                let time = csv_reader()
                    .from_reader(line.as_slice())
                    .records()
                    .next()
                    .and_then(Result::ok)
                    .and_then(|record| self.layout.time_of(&record))
                    .ok_or_else(|| corrupt(self.path, start, "unparsable timestamp"))?;
                Ok(Some((start, time)))
            }
        }
    }

    /// Offset of the first line whose time is `>= from`, or `file_len` if none is.
    fn first_at_or_after(&mut self, from: NaiveDateTime, file_len: u64) -> Result<u64, BarscopeError> {
        let mut lo = self.data_start;
        let mut hi = file_len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.line_at(mid)? {
                Some((_, time)) if time < from => lo = mid + 1,
                _ => hi = mid,
            }
        }
        Ok(self.line_at(lo)?.map_or(file_len, |(start, _)| start))
    }
}

fn corrupt(path: &str, offset: u64, reason: &str) -> BarscopeError {
    BarscopeError::storage(path, format!("corrupt row at byte {offset}: {reason}"))
}

struct RowStream {
    rows: csv::Reader<BufReader<File>>,
    record: StringRecord,
    /// File offset the reader started at; record positions are relative to it.
    base: u64,
    from: NaiveDateTime,
    to: NaiveDateTime,
    layout: ColumnLayout,
    metrics: Vec<Metric>,
    symbol: String,
    path: String,
    done: bool,
}

impl RowStream {
    fn parse_row(&self, offset: u64) -> Result<Record, BarscopeError> {
        let time = self
            .record
            .get(self.layout.time)
            .ok_or_else(|| corrupt(&self.path, offset, "missing time field"))
            .and_then(|field| {
                parse_timestamp(field).map_err(|_| corrupt(&self.path, offset, "unparsable timestamp"))
            })?;

        let mut record = Record::new(time, self.symbol.clone());
        for &metric in &self.metrics {
            let raw = self
                .layout
                .column(metric)
                .and_then(|col| self.record.get(col))
                .ok_or_else(|| corrupt(&self.path, offset, &format!("missing {metric} field")))?;
            let value = parse_value(metric, raw)
                .ok_or_else(|| corrupt(&self.path, offset, &format!("invalid {metric} value {raw:?}")))?;
            record.set(metric, value);
        }
        Ok(record)
    }
}

fn parse_value(metric: Metric, raw: &str) -> Option<MetricValue> {
    match metric {
        Metric::Volume => parse_volume(raw).map(MetricValue::Volume),
        _ => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(MetricValue::Price),
    }
}

/// Integer volume, or an integral float such as `128.0`.
fn parse_volume(raw: &str) -> Option<u64> {
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
        Some(v as u64)
    } else {
        None
    }
}

impl Iterator for RowStream {
    type Item = Result<Record, BarscopeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.rows.read_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    let at = e.position().map_or(self.rows.position().byte(), |p| p.byte());
                    return Some(Err(corrupt(&self.path, self.base + at, &e.to_string())));
                }
            }
            if is_blank(&self.record) {
                continue;
            }
            let offset = self.base + self.record.position().map_or(0, |p| p.byte());

            match self.parse_row(offset) {
                Ok(record) if record.time > self.to => {
                    self.done = true;
                    return None;
                }
                Ok(record) if record.time < self.from => continue,
                Ok(record) => return Some(Ok(record)),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
