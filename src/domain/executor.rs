//! Multi-symbol fan-out over the range scanner.
//!
//! Each resolved symbol is scanned on a blocking worker, at most
//! `max_concurrency` at a time. Failures stay scoped to their symbol, except
//! `UnknownMetric`, which invalidates the whole request. Output order is
//! canonical (time, then symbol) no matter which scan finishes first.

use crate::domain::error::BarscopeError;
use crate::domain::locator::resolve_all;
use crate::domain::manifest::{Locator, ManifestStore};
use crate::domain::metric::Metric;
use crate::domain::query::QueryRequest;
use crate::domain::record::{sort_canonical, Record, ResultSet};
use crate::ports::storage_port::RangeScanner;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    pub max_concurrency: usize,
    /// Degrades a slow symbol to a `Timeout` failure instead of stalling the query.
    pub symbol_timeout: Option<Duration>,
    pub query_timeout: Option<Duration>,
    /// Cap on rows kept per symbol; earliest rows win.
    pub row_limit: Option<usize>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            symbol_timeout: None,
            query_timeout: None,
            row_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Rows returned and every symbol scanned cleanly.
    Complete,
    /// Nothing in range; not an error.
    NoData,
    /// At least one symbol failed; `records` holds what the others produced.
    PartialFailure,
}

#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub records: ResultSet,
    pub failures: BTreeMap<String, BarscopeError>,
    /// Symbols with no manifest entry for the requested interval.
    pub not_found: Vec<String>,
}

impl QueryOutcome {
    pub fn status(&self) -> QueryStatus {
        if !self.failures.is_empty() {
            QueryStatus::PartialFailure
        } else if self.records.is_empty() {
            QueryStatus::NoData
        } else {
            QueryStatus::Complete
        }
    }
}

pub struct QueryExecutor {
    manifest: Arc<ManifestStore>,
    scanner: Arc<dyn RangeScanner + Send + Sync>,
    options: ExecutorOptions,
}

impl QueryExecutor {
    pub fn new(
        manifest: Arc<ManifestStore>,
        scanner: Arc<dyn RangeScanner + Send + Sync>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            manifest,
            scanner,
            options,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        &self.manifest
    }

    /// Run `request` across its symbol set.
    ///
    /// Cancelling `cancel` stops in-flight scans and returns `Cancelled`; no partial rows escape.
    pub async fn query(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, BarscopeError> {
        if request.symbols.is_empty() {
            return Err(BarscopeError::EmptySymbolSet);
        }

        let token = cancel.child_token();
        // Stops blocking scans if this future is dropped or times out.
        let _guard = token.clone().drop_guard();

        match self.options.query_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(request, &token))
                .await
                .unwrap_or(Err(BarscopeError::Timeout {
                    millis: limit.as_millis() as u64,
                })),
            None => self.run(request, &token).await,
        }
    }

    async fn run(
        &self,
        request: &QueryRequest,
        token: &CancellationToken,
    ) -> Result<QueryOutcome, BarscopeError> {
        let snapshot = self.manifest.snapshot();
        let (locators, not_found) = resolve_all(&snapshot, &request.symbols, request.interval);
        for symbol in &not_found {
            debug!(symbol = %symbol, interval = %request.interval, "no rollup for symbol");
        }
        let mut outcome = QueryOutcome {
            not_found,
            ..Default::default()
        };
        if request.is_empty_window() {
            debug!(from = %request.from, to = %request.to, "inverted window, nothing to scan");
            return Ok(outcome);
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let metrics: Arc<[Metric]> = request.metrics.clone().into();
        let mut tasks = JoinSet::new();
        // Symbol to store path for every scan that has not reported back yet.
        let mut pending: BTreeMap<String, String> = BTreeMap::new();

        for locator in locators {
            if !locator.may_overlap(request.from, request.to) {
                debug!(symbol = %locator.symbol, "window outside stored range, skipping scan");
                continue;
            }
            pending.insert(locator.symbol.clone(), locator.path.display().to_string());
            tasks.spawn(scan_symbol(ScanJob {
                locator,
                scanner: Arc::clone(&self.scanner),
                semaphore: Arc::clone(&semaphore),
                token: token.child_token(),
                from: request.from,
                to: request.to,
                metrics: Arc::clone(&metrics),
                symbol_timeout: self.options.symbol_timeout,
                row_limit: self.options.row_limit,
            }));
        }

        let mut abnormal = Vec::new();
        loop {
            let joined = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tasks.abort_all();
                    return Err(BarscopeError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };

            if let Some(Ok((symbol, _))) = &joined {
                pending.remove(symbol);
            }
            match joined {
                None => break,
                Some(Ok((symbol, Ok(rows)))) => {
                    debug!(symbol = %symbol, rows = rows.len(), "symbol scan complete");
                    outcome.records.extend(rows);
                }
                Some(Ok((_, Err(e @ BarscopeError::UnknownMetric(_))))) => {
                    token.cancel();
                    tasks.abort_all();
                    return Err(e);
                }
                Some(Ok((_, Err(BarscopeError::Cancelled)))) if token.is_cancelled() => {
                    tasks.abort_all();
                    return Err(BarscopeError::Cancelled);
                }
                Some(Ok((symbol, Err(e)))) => {
                    warn!(symbol = %symbol, "symbol scan failed: {e}");
                    outcome.failures.insert(symbol, e);
                }
                Some(Err(e)) => {
                    warn!("scan task ended abnormally: {e}");
                    abnormal.push(e.to_string());
                }
            }
        }
        record_unfinished(&mut outcome, pending, &abnormal);

        sort_canonical(&mut outcome.records);
        Ok(outcome)
    }
}

/// Symbols whose task ended without reporting a result fail with the task's error.
fn record_unfinished(outcome: &mut QueryOutcome, pending: BTreeMap<String, String>, abnormal: &[String]) {
    let reason = match abnormal {
        [only] => format!("scan task ended abnormally: {only}"),
        _ => "scan task ended abnormally".to_string(),
    };
    for (symbol, path) in pending {
        outcome
            .failures
            .insert(symbol, BarscopeError::storage(path, &reason));
    }
}

struct ScanJob {
    locator: Locator,
    scanner: Arc<dyn RangeScanner + Send + Sync>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    from: NaiveDateTime,
    to: NaiveDateTime,
    metrics: Arc<[Metric]>,
    symbol_timeout: Option<Duration>,
    row_limit: Option<usize>,
}

async fn scan_symbol(job: ScanJob) -> (String, Result<Vec<Record>, BarscopeError>) {
    let ScanJob {
        locator,
        scanner,
        semaphore,
        token,
        from,
        to,
        metrics,
        symbol_timeout,
        row_limit,
    } = job;
    let symbol = locator.symbol.clone();
    let path = locator.path.display().to_string();

    let permit = tokio::select! {
        _ = token.cancelled() => return (symbol, Err(BarscopeError::Cancelled)),
        permit = semaphore.acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return (symbol, Err(BarscopeError::Cancelled)),
        },
    };

    let worker_token = token.clone();
    let handle = tokio::task::spawn_blocking(move || {
        // Held until the scan finishes so the file-handle bound is honoured.
        let _permit = permit;
        collect_with_retry(scanner.as_ref(), &locator, from, to, &metrics, row_limit, &worker_token)
    });

    let joined = match symbol_timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                token.cancel();
                return (
                    symbol,
                    Err(BarscopeError::Timeout {
                        millis: limit.as_millis() as u64,
                    }),
                );
            }
        },
        None => handle.await,
    };

    let result = joined
        .unwrap_or_else(|e| Err(BarscopeError::storage(&path, format!("scan worker failed: {e}"))));
    (symbol, result)
}

/// One retry, with no backoff, when the store is unavailable. Rows from the failed attempt are discarded.
fn collect_with_retry(
    scanner: &(dyn RangeScanner + Send + Sync),
    locator: &Locator,
    from: NaiveDateTime,
    to: NaiveDateTime,
    metrics: &[Metric],
    row_limit: Option<usize>,
    token: &CancellationToken,
) -> Result<Vec<Record>, BarscopeError> {
    match collect_rows(scanner, locator, from, to, metrics, row_limit, token) {
        Err(e @ BarscopeError::StorageUnavailable { .. }) => {
            warn!(symbol = %locator.symbol, "retrying scan after: {e}");
            collect_rows(scanner, locator, from, to, metrics, row_limit, token)
        }
        other => other,
    }
}

fn collect_rows(
    scanner: &(dyn RangeScanner + Send + Sync),
    locator: &Locator,
    from: NaiveDateTime,
    to: NaiveDateTime,
    metrics: &[Metric],
    row_limit: Option<usize>,
    token: &CancellationToken,
) -> Result<Vec<Record>, BarscopeError> {
    let limit = row_limit.unwrap_or(usize::MAX);
    if limit == 0 {
        return Ok(Vec::new());
    }
    let stream = scanner.scan(locator, from, to, metrics)?;
    let mut rows = Vec::new();
    for item in stream {
        if token.is_cancelled() {
            return Err(BarscopeError::Cancelled);
        }
        rows.push(item?);
        if rows.len() >= limit {
            debug!(symbol = %locator.symbol, rows = rows.len(), "row limit reached, truncating");
            break;
        }
    }
    Ok(rows)
}
