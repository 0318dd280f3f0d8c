//! `manifest.json` reader.

use crate::domain::error::BarscopeError;
use crate::ports::manifest_port::{ManifestSource, RawManifestEntry};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Files stay untyped until each one is converted on its own, so one
/// malformed file cannot fail the whole document.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    files: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    path: String,
    #[serde(default)]
    interval: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    row_count: Option<u64>,
    #[serde(default)]
    min_time: Option<String>,
    #[serde(default)]
    max_time: Option<String>,
}

impl ManifestFile {
    /// One raw entry per distinct tag/symbol. A file naming no symbol at all
    /// still yields one entry with an empty symbol so validation can report it.
    fn into_entries(self) -> Vec<RawManifestEntry> {
        let mut symbols: Vec<String> = Vec::new();
        for s in self.symbol.iter().chain(self.tags.iter()) {
            if !symbols.contains(s) {
                symbols.push(s.clone());
            }
        }
        if symbols.is_empty() {
            symbols.push(String::new());
        }

        symbols
            .into_iter()
            .map(|symbol| RawManifestEntry {
                symbol,
                interval: self.interval.clone(),
                path: self.path.clone(),
                row_count: self.row_count,
                min_time: self.min_time.clone(),
                max_time: self.max_time.clone(),
            })
            .collect()
    }
}

pub struct JsonManifestAdapter {
    path: PathBuf,
}

impl JsonManifestAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse a manifest document held in memory.
    pub fn parse(source_name: &str, content: &str) -> Result<Vec<RawManifestEntry>, BarscopeError> {
        let doc: ManifestDocument =
            serde_json::from_str(content).map_err(|e| BarscopeError::ManifestUnavailable {
                source_name: source_name.to_string(),
                reason: format!("invalid manifest JSON: {e}"),
            })?;

        let mut entries = Vec::new();
        for (index, file) in doc.files.into_iter().enumerate() {
            match serde_json::from_value::<ManifestFile>(file) {
                Ok(file) => entries.extend(file.into_entries()),
                Err(e) => warn!(
                    source = source_name,
                    index,
                    error = %e,
                    "dropping malformed manifest file"
                ),
            }
        }
        Ok(entries)
    }
}

impl ManifestSource for JsonManifestAdapter {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read_entries(&self) -> Result<Vec<RawManifestEntry>, BarscopeError> {
        let content = fs::read_to_string(&self.path).map_err(|e| BarscopeError::ManifestUnavailable {
            source_name: self.name(),
            reason: format!("failed to read {}: {}", self.path.display(), e),
        })?;
        Self::parse(&self.name(), &content)
    }
}
