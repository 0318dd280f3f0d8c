//! Long-format OHLCV records and timestamp handling.

use crate::domain::error::BarscopeError;
use crate::domain::metric::Metric;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Canonical textual timestamp form used in every exported artifact.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_DATETIME_FORMATS: [&str; 3] =
    [TIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a storage or request timestamp. Date-only values map to midnight.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, BarscopeError> {
    let trimmed = value.trim();
    for format in ACCEPTED_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| BarscopeError::InvalidTimestamp {
            value: value.to_string(),
        })
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIME_FORMAT).to_string()
}

/// A single metric reading. Volume stays integral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Price(f64),
    Volume(u64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Price(p) => p,
            MetricValue::Volume(v) => v as f64,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Price(p) => write!(f, "{p}"),
            MetricValue::Volume(v) => write!(f, "{v}"),
        }
    }
}

/// One (time, symbol) observation. Metrics that were not requested or not stored are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Record {
    #[serde(serialize_with = "serialize_time", deserialize_with = "deserialize_time")]
    pub time: NaiveDateTime,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
}

/// Time-ascending sequence of records, ties ordered by symbol.
pub type ResultSet = Vec<Record>;

impl Record {
    pub fn new(time: NaiveDateTime, symbol: impl Into<String>) -> Self {
        Self {
            time,
            symbol: symbol.into(),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<MetricValue> {
        match metric {
            Metric::Open => self.open.map(MetricValue::Price),
            Metric::High => self.high.map(MetricValue::Price),
            Metric::Low => self.low.map(MetricValue::Price),
            Metric::Close => self.close.map(MetricValue::Price),
            Metric::Volume => self.volume.map(MetricValue::Volume),
        }
    }

    pub fn set(&mut self, metric: Metric, value: MetricValue) {
        match (metric, value) {
            (Metric::Open, v) => self.open = Some(v.as_f64()),
            (Metric::High, v) => self.high = Some(v.as_f64()),
            (Metric::Low, v) => self.low = Some(v.as_f64()),
            (Metric::Close, v) => self.close = Some(v.as_f64()),
            (Metric::Volume, MetricValue::Volume(v)) => self.volume = Some(v),
            (Metric::Volume, MetricValue::Price(p)) => self.volume = Some(p.max(0.0) as u64),
        }
    }

    /// Ordering key of the canonical ResultSet form.
    pub fn sort_key(&self) -> (NaiveDateTime, &str) {
        (self.time, self.symbol.as_str())
    }
}

/// Sort into canonical order: time ascending, then symbol ascending.
pub fn sort_canonical(records: &mut ResultSet) {
    records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

pub(crate) fn serialize_time<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn deserialize_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}
