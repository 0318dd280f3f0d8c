//! The fixed OHLCV metric set.

use crate::domain::error::BarscopeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Open,
        Metric::High,
        Metric::Low,
        Metric::Close,
        Metric::Volume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Open => "open",
            Metric::High => "high",
            Metric::Low => "low",
            Metric::Close => "close",
            Metric::Volume => "volume",
        }
    }

    /// Capitalized column name used in exported headers.
    pub fn header_name(self) -> &'static str {
        match self {
            Metric::Open => "Open",
            Metric::High => "High",
            Metric::Low => "Low",
            Metric::Close => "Close",
            Metric::Volume => "Volume",
        }
    }

    /// Position of the column in a headerless store row (after the time column).
    pub fn default_column(self) -> usize {
        match self {
            Metric::Open => 1,
            Metric::High => 2,
            Metric::Low => 3,
            Metric::Close => 4,
            Metric::Volume => 5,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = BarscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| BarscopeError::UnknownMetric(s.trim().to_string()))
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a metric list, keeping first-occurrence order and dropping repeats.
///
/// An empty input selects every metric.
pub fn parse_metrics<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>, BarscopeError> {
    if names.is_empty() {
        return Ok(Metric::ALL.to_vec());
    }
    let mut metrics = Vec::with_capacity(names.len());
    for name in names {
        let metric: Metric = name.as_ref().parse()?;
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }
    Ok(metrics)
}
