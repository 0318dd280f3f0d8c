//! Engine configuration assembled from a [`ConfigPort`].
//!
//! All values are validated here, before any manifest or storage access.

use crate::domain::downsample::DEFAULT_MAX_POINTS;
use crate::domain::error::BarscopeError;
use crate::domain::executor::{ExecutorOptions, DEFAULT_MAX_CONCURRENCY};
use crate::domain::metric::Metric;
use crate::ports::config_port::ConfigPort;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Sqlite,
}

impl ManifestFormat {
    /// Guess from the file extension: `.db`, `.sqlite` and `.sqlite3` mean SQLite.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("db" | "sqlite" | "sqlite3") => ManifestFormat::Sqlite,
            _ => ManifestFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub manifest_path: PathBuf,
    pub manifest_format: ManifestFormat,
    /// Relative rollup paths are resolved against this directory.
    pub storage_root: PathBuf,
    pub executor: ExecutorOptions,
    pub max_points: usize,
    pub plot_metric: Metric,
    pub log_level: String,
}

pub fn build_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, BarscopeError> {
    let base_dir = config.base_dir();
    let resolve = |p: PathBuf| match &base_dir {
        Some(base) if p.is_relative() => base.join(p),
        _ => p,
    };

    let manifest_path = config
        .get_string("manifest", "path")
        .map(PathBuf::from)
        .map(&resolve)
        .ok_or_else(|| BarscopeError::ConfigMissing {
            section: "manifest".to_string(),
            key: "path".to_string(),
        })?;

    let manifest_format = match config.get_string("manifest", "format") {
        None => ManifestFormat::from_path(&manifest_path),
        Some(s) => match s.to_lowercase().as_str() {
            "json" => ManifestFormat::Json,
            "sqlite" => ManifestFormat::Sqlite,
            _ => return Err(invalid("manifest", "format", "expected json or sqlite")),
        },
    };

    let storage_root = match config.get_string("storage", "root") {
        Some(root) => resolve(PathBuf::from(root)),
        None => manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let max_concurrency = positive(config, "query", "max_concurrency")?
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MAX_CONCURRENCY);
    let symbol_timeout = positive(config, "query", "symbol_timeout_ms")?.map(Duration::from_millis);
    let query_timeout = positive(config, "query", "query_timeout_ms")?.map(Duration::from_millis);
    let row_limit = positive(config, "query", "row_limit")?.map(|v| v as usize);

    let max_points = match config.get_int("query", "max_points")? {
        None => DEFAULT_MAX_POINTS,
        Some(v) if v >= 0 => v as usize,
        Some(_) => return Err(invalid("query", "max_points", "must be non-negative")),
    };

    let plot_metric = match config.get_string("query", "plot_metric") {
        None => Metric::Close,
        Some(s) => s
            .parse()
            .map_err(|_| invalid("query", "plot_metric", &format!("unknown metric {s:?}")))?,
    };

    let log_level = config
        .get_string("logging", "level")
        .unwrap_or_else(|| "info".to_string());

    Ok(EngineConfig {
        manifest_path,
        manifest_format,
        storage_root,
        executor: ExecutorOptions {
            max_concurrency,
            symbol_timeout,
            query_timeout,
            row_limit,
        },
        max_points,
        plot_metric,
        log_level,
    })
}

fn positive(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<u64>, BarscopeError> {
    match config.get_int(section, key)? {
        None => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as u64)),
        Some(_) => Err(invalid(section, key, &format!("{key} must be positive"))),
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> BarscopeError {
    BarscopeError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
