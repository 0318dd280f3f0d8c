//! Multi-symbol executor tests against the in-memory scanner.
//!
//! Tests cover:
//! - Missing symbols resolve NotFound without failing the query
//! - Sorted merge of per-symbol scans, symbol removal
//! - Per-symbol failure isolation and the single storage retry
//! - Request-level UnknownMetric raised by a store
//! - Bounded concurrency, cancellation, per-symbol and whole-query timeouts
//! - Row limits and metadata-driven scan skipping
//! - Panicking scans recorded as per-symbol failures

mod common;

use barscope::domain::error::BarscopeError;
use barscope::domain::executor::{ExecutorOptions, QueryExecutor, QueryStatus};
use barscope::domain::interval::Interval;
use barscope::domain::metric::Metric;
use barscope::domain::query::QueryRequest;
use barscope::ports::storage_port::RangeScanner;
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn request(symbols: &[&str], interval: Interval, from: &str, to: &str) -> QueryRequest {
    QueryRequest {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        interval,
        from: ts(from),
        to: ts(to),
        metrics: Metric::ALL.to_vec(),
    }
}

fn executor(
    entries: Vec<barscope::ports::manifest_port::RawManifestEntry>,
    scanner: Arc<MockScanner>,
    options: ExecutorOptions,
) -> QueryExecutor {
    let scanner: Arc<dyn RangeScanner + Send + Sync> = scanner;
    QueryExecutor::new(manifest_store(entries), scanner, options)
}

mod resolution {
    use super::*;

    #[tokio::test]
    async fn absent_symbol_is_not_found_and_query_succeeds() {
        // AAPL exists at 1hour and 1day only; MSFT is not in the manifest at all.
        let mut aapl = series("AAPL", "2024-01-02 09:00:00", 3, 60);
        aapl.extend(series("AAPL", "2024-02-01 09:00:00", 2, 60));
        let scanner = Arc::new(MockScanner::new().with_records("AAPL", aapl));
        let exec = executor(
            vec![entry("AAPL", "1hour"), entry("AAPL", "1day")],
            Arc::clone(&scanner),
            ExecutorOptions::default(),
        );

        let outcome = exec
            .query(
                &request(&["AAPL", "MSFT"], Interval::OneHour, "2024-01-02", "2024-01-02 23:59:59"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records.iter().all(|r| r.symbol == "AAPL"));
        assert_eq!(outcome.not_found, vec!["MSFT"]);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.status(), QueryStatus::Complete);
        assert_eq!(scanner.calls_for("MSFT"), 0);
    }

    #[tokio::test]
    async fn interval_not_stored_is_not_found() {
        let scanner = Arc::new(MockScanner::new());
        let exec = executor(vec![entry("AAPL", "1day")], scanner, ExecutorOptions::default());
        let outcome = exec
            .query(
                &request(&["AAPL"], Interval::FiveMinutes, "2024-01-01", "2024-01-31"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.not_found, vec!["AAPL"]);
        assert_eq!(outcome.status(), QueryStatus::NoData);
    }

    #[tokio::test]
    async fn empty_symbol_set_is_rejected() {
        let exec = executor(vec![], Arc::new(MockScanner::new()), ExecutorOptions::default());
        let err = exec
            .query(
                &request(&[], Interval::OneDay, "2024-01-01", "2024-01-31"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BarscopeError::EmptySymbolSet));
    }
}

mod merge {
    use super::*;

    fn three_symbol_scanner() -> Arc<MockScanner> {
        Arc::new(
            MockScanner::new()
                .with_records("MSFT", series("MSFT", "2024-01-01 09:00:00", 5, 60))
                .with_records("AAPL", series("AAPL", "2024-01-01 09:30:00", 5, 60))
                .with_records("TSLA", series("TSLA", "2024-01-01 09:00:00", 5, 120)),
        )
    }

    fn entries() -> Vec<barscope::ports::manifest_port::RawManifestEntry> {
        vec![entry("AAPL", "1hour"), entry("MSFT", "1hour"), entry("TSLA", "1hour")]
    }

    #[tokio::test]
    async fn output_is_sorted_merge_of_per_symbol_scans() {
        let scanner = three_symbol_scanner();
        let exec = executor(entries(), Arc::clone(&scanner), ExecutorOptions::default());
        let outcome = exec
            .query(
                &request(&["TSLA", "MSFT", "AAPL"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 15);
        assert!(outcome
            .records
            .windows(2)
            .all(|w| w[0].sort_key() <= w[1].sort_key()));
        // Ties on time are broken by symbol.
        assert_eq!(outcome.records[0].symbol, "MSFT");
        assert_eq!(outcome.records[1].symbol, "TSLA");
        assert_eq!(outcome.records[2].symbol, "AAPL");
    }

    #[tokio::test]
    async fn removing_a_symbol_removes_only_its_rows() {
        let scanner = three_symbol_scanner();
        let exec = executor(entries(), scanner, ExecutorOptions::default());
        let token = CancellationToken::new();

        let all = exec
            .query(
                &request(&["AAPL", "MSFT", "TSLA"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &token,
            )
            .await
            .unwrap();
        let without_msft = exec
            .query(
                &request(&["AAPL", "TSLA"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &token,
            )
            .await
            .unwrap();

        let expected: Vec<_> = all
            .records
            .iter()
            .filter(|r| r.symbol != "MSFT")
            .cloned()
            .collect();
        assert_eq!(without_msft.records, expected);
    }

    #[tokio::test]
    async fn inverted_window_is_empty_not_an_error() {
        let scanner = three_symbol_scanner();
        let exec = executor(entries(), Arc::clone(&scanner), ExecutorOptions::default());
        let outcome = exec
            .query(
                &request(&["AAPL", "MSFT"], Interval::OneHour, "2024-01-02", "2024-01-01"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.status(), QueryStatus::NoData);
        assert_eq!(scanner.total_calls(), 0);
    }

    #[tokio::test]
    async fn only_requested_metrics_are_returned() {
        let scanner = three_symbol_scanner();
        let exec = executor(entries(), scanner, ExecutorOptions::default());
        let mut req = request(&["AAPL"], Interval::OneHour, "2024-01-01", "2024-01-02");
        req.metrics = vec![Metric::Close, Metric::Volume];
        let outcome = exec.query(&req, &CancellationToken::new()).await.unwrap();
        for r in &outcome.records {
            assert!(r.close.is_some() && r.volume.is_some());
            assert!(r.open.is_none() && r.high.is_none() && r.low.is_none());
        }
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn storage_failure_is_scoped_to_its_symbol() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 09:00:00", 4, 60))
                .with_records("MSFT", series("MSFT", "2024-01-01 09:00:00", 4, 60))
                .with_broken_stream("MSFT"),
        );
        let exec = executor(
            vec![entry("AAPL", "1hour"), entry("MSFT", "1hour")],
            Arc::clone(&scanner),
            ExecutorOptions::default(),
        );
        let outcome = exec
            .query(
                &request(&["AAPL", "MSFT"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status(), QueryStatus::PartialFailure);
        assert_eq!(outcome.records.len(), 4);
        assert!(outcome.records.iter().all(|r| r.symbol == "AAPL"));
        assert!(matches!(
            outcome.failures.get("MSFT"),
            Some(BarscopeError::StorageUnavailable { .. })
        ));
        // No partial MSFT rows leak from the failed attempts.
        assert!(!outcome.records.iter().any(|r| r.symbol == "MSFT"));
        assert_eq!(scanner.calls_for("MSFT"), 2);
    }

    #[tokio::test]
    async fn transient_open_failure_is_retried_once() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 09:00:00", 3, 60))
                .failing_opens("AAPL", 1),
        );
        let exec = executor(vec![entry("AAPL", "1hour")], Arc::clone(&scanner), ExecutorOptions::default());
        let outcome = exec
            .query(
                &request(&["AAPL"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status(), QueryStatus::Complete);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(scanner.calls_for("AAPL"), 2);
    }

    #[tokio::test]
    async fn persistent_failure_gives_up_after_one_retry() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 09:00:00", 3, 60))
                .failing_opens("AAPL", 5),
        );
        let exec = executor(vec![entry("AAPL", "1hour")], Arc::clone(&scanner), ExecutorOptions::default());
        let outcome = exec
            .query(
                &request(&["AAPL"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status(), QueryStatus::PartialFailure);
        assert_eq!(scanner.calls_for("AAPL"), 2);
    }

    #[tokio::test]
    async fn panicking_scan_is_a_failure_not_missing_data() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 00:00:00", 3, 60))
                .with_records("MSFT", series("MSFT", "2024-01-01 00:00:00", 3, 60))
                .panicking_on("MSFT"),
        );
        let exec = executor(
            vec![entry("AAPL", "1hour"), entry("MSFT", "1hour")],
            Arc::clone(&scanner),
            ExecutorOptions::default(),
        );
        let outcome = exec
            .query(
                &request(&["AAPL", "MSFT"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status(), QueryStatus::PartialFailure);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records.iter().all(|r| r.symbol == "AAPL"));
        assert!(matches!(
            outcome.failures.get("MSFT"),
            Some(BarscopeError::StorageUnavailable { .. })
        ));
        assert!(outcome.not_found.is_empty());
    }

    #[tokio::test]
    async fn store_missing_a_metric_fails_the_whole_query() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 09:00:00", 3, 60))
                .with_records("MSFT", series("MSFT", "2024-01-01 09:00:00", 3, 60))
                .without_metric("MSFT", Metric::Volume),
        );
        let exec = executor(
            vec![entry("AAPL", "1hour"), entry("MSFT", "1hour")],
            scanner,
            ExecutorOptions::default(),
        );
        let err = exec
            .query(
                &request(&["AAPL", "MSFT"], Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BarscopeError::UnknownMetric(ref m) if m == "volume"));
    }
}

mod resources {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_scans_are_bounded() {
        let symbols = ["A", "B", "C", "D", "E", "F"];
        let mut scanner = MockScanner::new();
        for s in symbols {
            scanner = scanner
                .with_records(s, series(s, "2024-01-01 00:00:00", 2, 60))
                .with_open_delay(s, 40);
        }
        let scanner = Arc::new(scanner);
        let exec = executor(
            symbols.iter().map(|s| entry(s, "1hour")).collect(),
            Arc::clone(&scanner),
            ExecutorOptions {
                max_concurrency: 2,
                ..Default::default()
            },
        );

        let outcome = exec
            .query(
                &request(&symbols, Interval::OneHour, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 12);
        let peak = scanner.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_stops_scans_and_discards_rows() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 00:00:00", 500, 1))
                .with_row_delay("AAPL", 10),
        );
        let exec = executor(vec![entry("AAPL", "1min")], Arc::clone(&scanner), ExecutorOptions::default());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = exec
            .query(
                &request(&["AAPL"], Interval::OneMinute, "2024-01-01", "2024-01-02"),
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BarscopeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_symbol_times_out_alone() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("SLOW", series("SLOW", "2024-01-01 00:00:00", 300, 1))
                .with_row_delay("SLOW", 10)
                .with_records("FAST", series("FAST", "2024-01-01 00:00:00", 5, 1)),
        );
        let exec = executor(
            vec![entry("SLOW", "1min"), entry("FAST", "1min")],
            scanner,
            ExecutorOptions {
                symbol_timeout: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        );
        let outcome = exec
            .query(
                &request(&["SLOW", "FAST"], Interval::OneMinute, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status(), QueryStatus::PartialFailure);
        assert_eq!(outcome.records.len(), 5);
        assert!(matches!(
            outcome.failures.get("SLOW"),
            Some(BarscopeError::Timeout { millis: 100 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_timeout_fails_the_query() {
        let scanner = Arc::new(
            MockScanner::new()
                .with_records("AAPL", series("AAPL", "2024-01-01 00:00:00", 300, 1))
                .with_row_delay("AAPL", 10),
        );
        let exec = executor(
            vec![entry("AAPL", "1min")],
            scanner,
            ExecutorOptions {
                query_timeout: Some(Duration::from_millis(80)),
                ..Default::default()
            },
        );
        let err = exec
            .query(
                &request(&["AAPL"], Interval::OneMinute, "2024-01-01", "2024-01-02"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BarscopeError::Timeout { millis: 80 }));
    }

    #[tokio::test]
    async fn row_limit_keeps_earliest_rows() {
        let scanner = Arc::new(
            MockScanner::new().with_records("AAPL", series("AAPL", "2024-01-01 00:00:00", 50, 60)),
        );
        let exec = executor(
            vec![entry("AAPL", "1hour")],
            scanner,
            ExecutorOptions {
                row_limit: Some(10),
                ..Default::default()
            },
        );
        let outcome = exec
            .query(
                &request(&["AAPL"], Interval::OneHour, "2024-01-01", "2024-02-01"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 10);
        assert_eq!(outcome.records[0].time, ts("2024-01-01 00:00:00"));
        assert_eq!(outcome.records[9].time, ts("2024-01-01 09:00:00"));
    }

    #[tokio::test]
    async fn zero_row_limit_returns_nothing() {
        let scanner = Arc::new(
            MockScanner::new().with_records("AAPL", series("AAPL", "2024-01-01 00:00:00", 5, 60)),
        );
        let exec = executor(
            vec![entry("AAPL", "1hour")],
            Arc::clone(&scanner),
            ExecutorOptions {
                row_limit: Some(0),
                ..Default::default()
            },
        );
        let outcome = exec
            .query(
                &request(&["AAPL"], Interval::OneHour, "2024-01-01", "2024-02-01"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.status(), QueryStatus::NoData);
        assert_eq!(scanner.total_calls(), 0);
    }

    #[tokio::test]
    async fn manifest_bounds_skip_disjoint_scans() {
        let mut bounded = entry("AAPL", "1day");
        bounded.min_time = Some("2020-01-01".into());
        bounded.max_time = Some("2020-12-31".into());
        let mut empty = entry("MSFT", "1day");
        empty.row_count = Some(0);

        let scanner = Arc::new(MockScanner::new());
        let exec = executor(vec![bounded, empty], Arc::clone(&scanner), ExecutorOptions::default());
        let outcome = exec
            .query(
                &request(&["AAPL", "MSFT"], Interval::OneDay, "2024-01-01", "2024-12-31"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status(), QueryStatus::NoData);
        assert_eq!(scanner.total_calls(), 0);
    }
}
