//! CLI definition and dispatch.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::engine_config::{build_engine_config, EngineConfig};
use crate::domain::error::BarscopeError;
use crate::domain::executor::{QueryOutcome, QueryStatus};
use crate::domain::metric::{parse_metrics, Metric};
use crate::domain::query::RawQuery;
use crate::domain::record::{format_timestamp, Record};
use crate::logging::init_tracing;
use crate::service::QueryService;

/// Exit code for a query that matched no rows.
pub const EXIT_NO_DATA: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "barscope", about = "Range queries over precomputed OHLCV rollups")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Symbol set, interval and inclusive time window shared by the query commands.
#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    /// Comma-separated symbols
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,
    /// One of 1min, 5min, 30min, 1hour, 1day, 1week
    #[arg(long)]
    pub interval: String,
    #[arg(long)]
    pub from: String,
    #[arg(long)]
    pub to: String,
}

impl WindowArgs {
    fn to_raw(&self, metrics: &[String]) -> RawQuery {
        RawQuery {
            symbols: self.symbols.clone(),
            interval: self.interval.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            metrics: metrics.to_vec(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every symbol in the manifest
    Symbols {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show stored intervals for a symbol
    Intervals {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
    },
    /// Print long-format rows
    Query {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        window: WindowArgs,
        /// Comma-separated metrics (default: all)
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Print a downsampled, pivoted series table as JSON
    Chart {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        window: WindowArgs,
        /// Metric to plot (default from config)
        #[arg(long)]
        metric: Option<String>,
        #[arg(long)]
        max_points: Option<usize>,
    },
    /// Write rows as CSV
    Export {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
        /// Defaults to <symbols>_data.csv in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let config_path = match &cli.command {
        Command::Symbols { config }
        | Command::Intervals { config, .. }
        | Command::Query { config, .. }
        | Command::Chart { config, .. }
        | Command::Export { config, .. } => config.clone(),
    };

    let engine = match load_engine_config(&config_path) {
        Ok(e) => e,
        Err(code) => return code,
    };
    init_tracing(&engine.log_level);

    let service = match QueryService::from_config(&engine) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };

    match cli.command {
        Command::Symbols { .. } => run_symbols(&service),
        Command::Intervals { symbol, .. } => run_intervals(&service, &symbol),
        Command::Query {
            window,
            metrics,
            format,
            ..
        } => with_runtime(|cancel| run_query(&service, window.to_raw(&metrics), format, cancel)),
        Command::Chart {
            window,
            metric,
            max_points,
            ..
        } => with_runtime(|cancel| {
            run_chart(&service, &engine, window.to_raw(&[]), metric, max_points, cancel)
        }),
        Command::Export {
            window,
            metrics,
            output,
            ..
        } => with_runtime(|cancel| run_export(&service, window.to_raw(&metrics), output, cancel)),
    }
}

pub fn load_engine_config(path: &Path) -> Result<EngineConfig, ExitCode> {
    let adapter = FileConfigAdapter::from_file(path).map_err(|e| report_error(&e))?;
    build_engine_config(&adapter).map_err(|e| report_error(&e))
}

fn report_error(err: &BarscopeError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

/// Drive the future built by `task` on a fresh runtime. Ctrl-C cancels the running query.
fn with_runtime<F, Fut>(task: F) -> ExitCode
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = ExitCode>,
{
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(r) => r,
        Err(e) => return report_error(&BarscopeError::from(e)),
    };
    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        task(cancel).await
    })
}

fn run_symbols(service: &QueryService) -> ExitCode {
    let listing = service.list_symbols();
    if listing.all_tags.is_empty() {
        eprintln!("No symbols in manifest");
        return ExitCode::from(EXIT_NO_DATA);
    }
    for symbol in &listing.all_tags {
        println!("{symbol}");
    }
    ExitCode::SUCCESS
}

fn run_intervals(service: &QueryService, symbol: &str) -> ExitCode {
    let locators = service.intervals(symbol);
    if locators.is_empty() {
        eprintln!("No rollups for {symbol}");
        return ExitCode::from(EXIT_NO_DATA);
    }

    println!("{:<8} {:>10}  {:<19}  {:<19}", "Interval", "Rows", "First", "Last");
    for loc in &locators {
        let rows = loc
            .row_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let (first, last) = match loc.time_bounds {
            Some((min, max)) => (format_timestamp(&min), format_timestamp(&max)),
            None => ("-".to_string(), "-".to_string()),
        };
        println!("{:<8} {:>10}  {:<19}  {:<19}", loc.interval, rows, first, last);
    }
    ExitCode::SUCCESS
}

async fn run_query(
    service: &QueryService,
    raw: RawQuery,
    format: OutputFormat,
    cancel: CancellationToken,
) -> ExitCode {
    let outcome = match service.query(&raw, &cancel).await {
        Ok(o) => o,
        Err(e) => return report_error(&e),
    };
    report_skipped(&outcome);
    if let Some(code) = no_data_exit(&outcome) {
        return code;
    }

    match format {
        OutputFormat::Table => print_table(&outcome.records, &requested_metrics(&raw)),
        OutputFormat::Json => match serde_json::to_string_pretty(&outcome.records) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                return report_error(&BarscopeError::Export {
                    reason: e.to_string(),
                });
            }
        },
    }
    ExitCode::SUCCESS
}

async fn run_chart(
    service: &QueryService,
    engine: &EngineConfig,
    raw: RawQuery,
    metric: Option<String>,
    max_points: Option<usize>,
    cancel: CancellationToken,
) -> ExitCode {
    let metric = match metric.as_deref().map(str::parse::<Metric>).transpose() {
        Ok(m) => m.unwrap_or(engine.plot_metric),
        Err(e) => return report_error(&e),
    };
    let max_points = max_points.unwrap_or(engine.max_points);

    let chart = match service.chart(&raw, metric, max_points, &cancel).await {
        Ok(c) => c,
        Err(e) => return report_error(&e),
    };
    report_skipped(&chart.outcome);
    if let Some(code) = no_data_exit(&chart.outcome) {
        return code;
    }

    match serde_json::to_string(&chart.table) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&BarscopeError::Export {
            reason: e.to_string(),
        }),
    }
}

/// The file is written even when empty (header only); the exit code still reports no data.
async fn run_export(
    service: &QueryService,
    raw: RawQuery,
    output: Option<PathBuf>,
    cancel: CancellationToken,
) -> ExitCode {
    let artifact = match service.export(&raw, &cancel).await {
        Ok(a) => a,
        Err(e) => return report_error(&e),
    };
    report_skipped(&artifact.outcome);

    let path = output.unwrap_or_else(|| PathBuf::from(&artifact.filename));
    if let Err(e) = fs::write(&path, &artifact.body) {
        return report_error(&BarscopeError::Export {
            reason: format!("failed to write {}: {}", path.display(), e),
        });
    }
    eprintln!(
        "Wrote {} rows to {}",
        artifact.outcome.records.len(),
        path.display()
    );
    no_data_exit(&artifact.outcome).unwrap_or(ExitCode::SUCCESS)
}

/// Per-symbol problems go to stderr; the query itself still succeeds.
fn report_skipped(outcome: &QueryOutcome) {
    for symbol in &outcome.not_found {
        eprintln!("warning: no rollup for {symbol} at this interval");
    }
    for (symbol, err) in &outcome.failures {
        eprintln!("warning: {symbol}: {err}");
    }
}

/// `Some(exit code)` when nothing was returned. If every symbol failed, the
/// first failure decides the code.
fn no_data_exit(outcome: &QueryOutcome) -> Option<ExitCode> {
    if !outcome.records.is_empty() {
        return None;
    }
    if outcome.status() == QueryStatus::PartialFailure {
        return outcome.failures.values().next().map(ExitCode::from);
    }
    eprintln!("No data in range");
    Some(ExitCode::from(EXIT_NO_DATA))
}

fn requested_metrics(raw: &RawQuery) -> Vec<Metric> {
    parse_metrics(&raw.metrics).unwrap_or_else(|_| Metric::ALL.to_vec())
}

fn print_table(records: &[Record], metrics: &[Metric]) {
    let mut header = format!("{:<19}  {:<10}", "Time", "Symbol");
    for metric in metrics {
        header.push_str(&format!("  {:>14}", metric.header_name()));
    }
    println!("{header}");

    for record in records {
        let mut line = format!("{:<19}  {:<10}", format_timestamp(&record.time), record.symbol);
        for &metric in metrics {
            let cell = record
                .get(metric)
                .map(|v| v.to_string())
                .unwrap_or_default();
            line.push_str(&format!("  {cell:>14}"));
        }
        println!("{line}");
    }
}
