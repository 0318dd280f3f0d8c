//! Query request validation at the core boundary.

use crate::domain::error::BarscopeError;
use crate::domain::interval::Interval;
use crate::domain::metric::{parse_metrics, Metric};
use crate::domain::record::parse_timestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Query as received from a transport layer, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawQuery {
    pub symbols: Vec<String>,
    pub interval: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Unique, in first-seen order.
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    /// Unique, in requested order. Never empty.
    pub metrics: Vec<Metric>,
}

impl QueryRequest {
    /// Validate a raw query. Runs before any manifest or storage access.
    pub fn parse(raw: &RawQuery) -> Result<Self, BarscopeError> {
        let symbols = normalize_symbols(&raw.symbols);
        if symbols.is_empty() {
            return Err(BarscopeError::EmptySymbolSet);
        }
        let metrics = parse_metrics(&raw.metrics)?;
        let interval: Interval = raw.interval.parse()?;
        let from = parse_timestamp(&raw.from)?;
        let to = parse_timestamp(&raw.to)?;

        Ok(Self {
            symbols,
            interval,
            from,
            to,
            metrics,
        })
    }

    /// Whether the window is empty by construction (`from > to`).
    pub fn is_empty_window(&self) -> bool {
        self.from > self.to
    }

    /// `<joined-symbols-or-"stock">_data.<extension>`
    pub fn export_filename(&self, extension: &str) -> String {
        export_filename(&self.symbols, extension)
    }
}

pub fn export_filename(symbols: &[String], extension: &str) -> String {
    let stem = if symbols.is_empty() {
        "stock".to_string()
    } else {
        symbols.join("_")
    };
    format!("{stem}_data.{extension}")
}

/// Trim, drop blanks, and collapse repeats (first occurrence wins). Case is preserved.
pub fn normalize_symbols<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        let trimmed = s.as_ref().trim();
        if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Read-only symbol discovery payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolListing {
    pub all_tags: Vec<String>,
}
