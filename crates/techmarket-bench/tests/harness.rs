//! Harness behaviour observed through its sink and its log output.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::fmt::MakeWriter;

use techmarket_bench::harness::REPORT_BANNER;
use techmarket_bench::{BackendKind, BenchHarness, Error, Measurement, OperationKind};

/// In-memory writer shared between the code under test and the assertions.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuf {
    type Writer = SharedBuf;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Sink that accepts `limit` bytes, then fails; counts how often it is dropped.
struct FailingSink {
    written: usize,
    limit: usize,
    fail_flush: bool,
    drops: Arc<AtomicUsize>,
}

impl FailingSink {
    fn new(limit: usize, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            written: 0,
            limit,
            fail_flush: false,
            drops: Arc::clone(drops),
        }
    }
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail_flush {
            return Err(io::Error::new(io::ErrorKind::Other, "flush failed"));
        }
        Ok(())
    }
}

impl Drop for FailingSink {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn ok() -> Result<(), String> {
    Ok(())
}

fn failing() -> Result<(), String> {
    Err("connection refused".to_string())
}

fn measurement(backend: BackendKind, label: &str, millis: u64, records: usize) -> Measurement {
    Measurement::new(
        backend,
        OperationKind::Insert,
        label,
        Duration::from_millis(millis),
        records,
    )
}

#[test]
fn test_failed_operation_is_logged_not_recorded() {
    let logs = SharedBuf::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();

    let harness = tracing::subscriber::with_default(subscriber, || {
        let mut harness = BenchHarness::new(Vec::new());
        harness.measure(BackendKind::Postgres, OperationKind::Insert, "Client", 20_000, ok);
        harness.measure(BackendKind::Postgres, OperationKind::Insert, "Client", 5_000, failing);
        harness
    });

    assert_eq!(harness.results().len(), 1);
    assert_eq!(harness.results()[0].record_count, 20_000);
    assert_eq!(harness.failures(), 1);

    let output = logs.contents();
    let errors: Vec<&str> = output.lines().filter(|l| l.contains("ERROR")).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("operation failed"));
    assert!(errors[0].contains("PostgreSQL"));
    assert!(errors[0].contains("INSERT"));
    assert!(errors[0].contains("Client"));
    assert!(errors[0].contains("connection refused"));
}

#[test]
fn test_one_row_per_backend() {
    let sink = SharedBuf::default();
    let mut harness = BenchHarness::new(sink.clone());
    for backend in BackendKind::ALL {
        harness.measure(backend, OperationKind::Insert, "Client", 1, ok);
    }
    harness.close().unwrap();

    let report = sink.contents();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines[0], "");
    assert_eq!(lines[1], REPORT_BANNER);
    assert_eq!(lines[2], "");
    assert!(lines[3].contains("Database"));
    assert!(lines[3].contains("Records/s"));
    assert!(lines[4].trim().starts_with("--"));

    let rows = &lines[5..];
    assert_eq!(rows.len(), 3);
    for (row, backend) in rows.iter().zip(BackendKind::ALL) {
        let cells: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cells[0], backend.as_str());
        assert_eq!(cells[1], "INSERT");
        assert_eq!(cells[2], "Client");
        assert_eq!(cells[3], "1");
    }
}

#[test]
fn test_report_rows_follow_record_order() {
    let sink = SharedBuf::default();
    let mut harness = BenchHarness::new(sink.clone());
    harness.record(measurement(BackendKind::Cassandra, "Payment", 250, 10_000));
    harness.record(measurement(BackendKind::Postgres, "Client", 1_000, 20_000));
    harness.close().unwrap();

    let report = sink.contents();
    let rows: Vec<&str> = report.lines().skip(5).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].contains("Cassandra"));
    assert!(rows[0].contains("250ms"));
    assert!(rows[0].contains("40000.00"));
    assert!(rows[1].contains("PostgreSQL"));
    assert!(rows[1].contains("1s"));
    assert!(rows[1].contains("20000.00"));
}

#[test]
fn test_close_releases_sink_when_report_fails_midway() {
    let drops = Arc::new(AtomicUsize::new(0));
    // Banner fits, the table does not.
    let sink = FailingSink::new(REPORT_BANNER.len() + 3, &drops);
    let mut harness = BenchHarness::new(sink);
    harness.record(measurement(BackendKind::Postgres, "Client", 10, 100));
    harness.record(measurement(BackendKind::MongoDb, "Client", 10, 100));

    let result = harness.close();
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_with_no_results_still_releases_sink() {
    let drops = Arc::new(AtomicUsize::new(0));
    let harness = BenchHarness::new(FailingSink::new(usize::MAX, &drops));

    assert!(matches!(harness.close(), Err(Error::NoResults)));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_surfaces_flush_failure() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut sink = FailingSink::new(usize::MAX, &drops);
    sink.fail_flush = true;
    let mut harness = BenchHarness::new(sink);
    harness.record(measurement(BackendKind::Cassandra, "Order", 5, 50));

    let err = harness.close().unwrap_err();
    assert!(err.to_string().contains("flush failed"));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_report_file_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("benchmark_results.log");

    for _ in 0..2 {
        let mut harness = BenchHarness::open(&path).unwrap();
        harness.measure(BackendKind::MongoDb, OperationKind::Query, "Client by email", 20_000, ok);
        harness.close().unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.matches(REPORT_BANNER).count(), 2);
    assert_eq!(contents.matches("Client by email").count(), 2);
}
