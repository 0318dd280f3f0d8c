//! Query service: the boundary a transport layer (CLI, HTTP) talks to.
//!
//! Validates raw requests, runs them through the executor and shapes the
//! result for tabular, chart or export consumers.

use crate::adapters::csv_export_adapter::CsvExporter;
use crate::adapters::csv_store_adapter::CsvStoreAdapter;
use crate::adapters::json_manifest_adapter::JsonManifestAdapter;
use crate::domain::downsample::reduce_per_series;
use crate::domain::engine_config::{EngineConfig, ManifestFormat};
use crate::domain::error::BarscopeError;
use crate::domain::executor::{ExecutorOptions, QueryExecutor, QueryOutcome};
use crate::domain::manifest::{Locator, ManifestStore};
use crate::domain::metric::Metric;
use crate::domain::pivot::{pivot, SeriesTable};
use crate::domain::query::{QueryRequest, RawQuery, SymbolListing};
use crate::ports::export_port::ExportPort;
use crate::ports::manifest_port::ManifestSource;
use crate::ports::storage_port::RangeScanner;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pivoted chart payload plus the long-format outcome it was built from.
#[derive(Debug)]
pub struct Chart {
    pub table: SeriesTable,
    /// `records` here are the downsampled rows.
    pub outcome: QueryOutcome,
}

#[derive(Debug)]
pub struct ExportArtifact {
    pub filename: String,
    pub body: String,
    pub outcome: QueryOutcome,
}

pub struct QueryService {
    executor: QueryExecutor,
    exporter: Box<dyn ExportPort + Send + Sync>,
}

impl QueryService {
    pub fn new(
        manifest: Arc<ManifestStore>,
        scanner: Arc<dyn RangeScanner + Send + Sync>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            executor: QueryExecutor::new(manifest, scanner, options),
            exporter: Box::new(CsvExporter),
        }
    }

    /// Load the manifest named by `config` and wire the CSV store under its storage root.
    pub fn from_config(config: &EngineConfig) -> Result<Self, BarscopeError> {
        let source = manifest_source(config)?;
        let manifest = Arc::new(ManifestStore::load(source)?);
        let scanner = Arc::new(CsvStoreAdapter::new(&config.storage_root));
        info!(
            manifest = %config.manifest_path.display(),
            storage_root = %config.storage_root.display(),
            "query service ready"
        );
        Ok(Self::new(manifest, scanner, config.executor.clone()))
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        self.executor.manifest()
    }

    pub fn list_symbols(&self) -> SymbolListing {
        SymbolListing {
            all_tags: self.manifest().list_symbols(),
        }
    }

    /// Every stored interval for `symbol`, finest first.
    pub fn intervals(&self, symbol: &str) -> Vec<Locator> {
        self.manifest()
            .snapshot()
            .intervals_for(symbol)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Swap in a freshly read manifest. The previous one stays live on failure.
    pub fn reload(&self) -> Result<usize, BarscopeError> {
        let snapshot = self.manifest().reload()?;
        info!(
            source = snapshot.source_name(),
            entries = snapshot.entry_count(),
            "manifest reloaded"
        );
        Ok(snapshot.entry_count())
    }

    /// Long-format rows for a raw request. Validation runs before any storage access.
    pub async fn query(
        &self,
        raw: &RawQuery,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, BarscopeError> {
        let request = QueryRequest::parse(raw)?;
        self.executor.query(&request, cancel).await
    }

    /// Downsample each series to `max_points`, then pivot `metric` onto a shared time axis.
    ///
    /// The request's own metric list is replaced by `metric`.
    pub async fn chart(
        &self,
        raw: &RawQuery,
        metric: Metric,
        max_points: usize,
        cancel: &CancellationToken,
    ) -> Result<Chart, BarscopeError> {
        let mut request = QueryRequest::parse(raw)?;
        request.metrics = vec![metric];

        let mut outcome = self.executor.query(&request, cancel).await?;
        let scanned = outcome.records.len();
        outcome.records = reduce_per_series(std::mem::take(&mut outcome.records), max_points);
        debug!(scanned, kept = outcome.records.len(), max_points, "downsampled chart rows");

        let table = pivot(&outcome.records, &request.symbols, metric);
        Ok(Chart { table, outcome })
    }

    /// Render the result of `raw` with the configured exporter.
    pub async fn export(
        &self,
        raw: &RawQuery,
        cancel: &CancellationToken,
    ) -> Result<ExportArtifact, BarscopeError> {
        let request = QueryRequest::parse(raw)?;
        let outcome = self.executor.query(&request, cancel).await?;
        let body = self.exporter.render(&outcome.records, &request.metrics)?;
        Ok(ExportArtifact {
            filename: request.export_filename(self.exporter.extension()),
            body,
            outcome,
        })
    }
}

fn manifest_source(
    config: &EngineConfig,
) -> Result<Box<dyn ManifestSource + Send + Sync>, BarscopeError> {
    match config.manifest_format {
        ManifestFormat::Json => Ok(Box::new(JsonManifestAdapter::new(&config.manifest_path))),
        #[cfg(feature = "sqlite")]
        ManifestFormat::Sqlite => {
            use crate::adapters::sqlite_catalog_adapter::SqliteCatalogAdapter;
            Ok(Box::new(SqliteCatalogAdapter::open(&config.manifest_path)?))
        }
        #[cfg(not(feature = "sqlite"))]
        ManifestFormat::Sqlite => Err(BarscopeError::ConfigInvalid {
            section: "manifest".to_string(),
            key: "format".to_string(),
            reason: "sqlite feature is required for sqlite manifests".to_string(),
        }),
    }
}
