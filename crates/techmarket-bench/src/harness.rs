//! Benchmark harness: timed operations and the performance report.
//!
//! [`BenchHarness::measure`] runs one operation to completion, times it and
//! keeps a [`Measurement`] when it succeeds. Failures are logged and left out
//! of the report. [`BenchHarness::close`] renders every measurement, in call
//! order, to the report sink and releases it.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use comfy_table::{CellAlignment, Table};

use crate::error::{Error, Result};

/// Title line written above the report table.
pub const REPORT_BANNER: &str = "=== Performance Report ===";

/// Header row of the report table.
pub const REPORT_HEADER: [&str; 6] = [
    "Database",
    "Operation",
    "Entity",
    "Records",
    "Duration",
    "Records/s",
];

/// Table style: no borders, a dashed line under the header.
const REPORT_STYLE: &str = "     --            ";

/// Benchmarked data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Postgres,
    MongoDb,
    Cassandra,
}

impl BackendKind {
    /// Every backend, in report order.
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Postgres,
        BackendKind::MongoDb,
        BackendKind::Cassandra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "PostgreSQL",
            BackendKind::MongoDb => "MongoDB",
            BackendKind::Cassandra => "Cassandra",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of benchmarked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Query,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Query => "QUERY",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One successful timed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub backend: BackendKind,
    pub operation: OperationKind,
    pub label: String,
    pub elapsed: Duration,
    pub record_count: usize,
}

impl Measurement {
    /// Create a measurement.
    pub fn new(
        backend: BackendKind,
        operation: OperationKind,
        label: impl Into<String>,
        elapsed: Duration,
        record_count: usize,
    ) -> Self {
        Self {
            backend,
            operation,
            label: label.into(),
            elapsed,
            record_count,
        }
    }

    /// Elapsed time rounded to the nearest millisecond.
    pub fn duration_ms(&self) -> u64 {
        let rounded = (self.elapsed.as_nanos() + 500_000) / 1_000_000;
        u64::try_from(rounded).unwrap_or(u64::MAX)
    }

    /// Records processed per second of elapsed wall time.
    ///
    /// A zero elapsed time yields `f64::INFINITY`.
    pub fn throughput(&self) -> f64 {
        if self.elapsed.is_zero() {
            return f64::INFINITY;
        }
        self.record_count as f64 / self.elapsed.as_secs_f64()
    }

    /// Cells of this measurement's report row.
    pub fn row(&self) -> [String; 6] {
        [
            self.backend.to_string(),
            self.operation.to_string(),
            self.label.clone(),
            self.record_count.to_string(),
            humantime::format_duration(Duration::from_millis(self.duration_ms())).to_string(),
            format!("{:.2}", self.throughput()),
        ]
    }
}

/// Render measurements as an aligned table, header first, rows in order.
pub fn render_table(results: &[Measurement]) -> String {
    let mut table = Table::new();
    table.load_preset(REPORT_STYLE);
    table.set_header(REPORT_HEADER);

    for measurement in results {
        table.add_row(measurement.row());
    }

    // Numeric columns are right-aligned.
    for index in 3..REPORT_HEADER.len() {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }

    table.to_string()
}

/// Times operations and owns the report sink.
pub struct BenchHarness<W: Write> {
    results: Vec<Measurement>,
    failures: usize,
    sink: W,
}

impl BenchHarness<File> {
    /// Open (or create) a report file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::new(file))
    }
}

impl<W: Write> BenchHarness<W> {
    /// Create a harness writing its report to `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            results: Vec::new(),
            failures: 0,
            sink,
        }
    }

    /// Run `operation` and record its wall-clock duration if it succeeds.
    ///
    /// A failure is logged with its context and produces no measurement; the
    /// operation's success value is discarded.
    pub fn measure<T, E, F>(
        &mut self,
        backend: BackendKind,
        operation: OperationKind,
        label: &str,
        record_count: usize,
        f: F,
    ) where
        F: FnOnce() -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let start = Instant::now();
        let outcome = f();
        let elapsed = start.elapsed();

        match outcome {
            Ok(_) => {
                let measurement =
                    Measurement::new(backend, operation, label, elapsed, record_count);
                tracing::info!(
                    backend = %backend,
                    operation = %operation,
                    entity = label,
                    records = record_count as u64,
                    elapsed_ms = measurement.duration_ms(),
                    "operation completed"
                );
                self.record(measurement);
            }
            Err(e) => {
                self.failures += 1;
                tracing::error!(
                    backend = %backend,
                    operation = %operation,
                    entity = label,
                    error = %e,
                    "operation failed"
                );
            }
        }
    }

    /// Append an already-built measurement.
    pub fn record(&mut self, measurement: Measurement) {
        self.results.push(measurement);
    }

    /// Measurements recorded so far, in call order.
    pub fn results(&self) -> &[Measurement] {
        &self.results
    }

    /// Number of `measure` calls whose operation failed.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Write the banner and the results table to the sink.
    pub fn generate_report(&mut self) -> Result<()> {
        if self.results.is_empty() {
            return Err(Error::NoResults);
        }

        let table = render_table(&self.results);
        write!(self.sink, "\n{}\n\n", REPORT_BANNER)?;
        writeln!(self.sink, "{}", table)?;
        Ok(())
    }

    /// Generate the report, then flush and release the sink.
    ///
    /// The sink is released whether or not the report was written; a report
    /// error takes precedence over a flush error.
    pub fn close(mut self) -> Result<()> {
        let report = self.generate_report();
        let flushed = self.sink.flush();
        drop(self.sink);

        report?;
        flushed?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> std::result::Result<(), String> {
        Ok(())
    }

    fn failing() -> std::result::Result<(), String> {
        Err("connection reset".to_string())
    }

    #[test]
    fn test_measure_records_successes_only() {
        let mut harness = BenchHarness::new(Vec::new());

        harness.measure(BackendKind::Postgres, OperationKind::Insert, "Client", 20_000, ok);
        harness.measure(BackendKind::Postgres, OperationKind::Insert, "Client", 5_000, failing);

        assert_eq!(harness.results().len(), 1);
        assert_eq!(harness.failures(), 1);

        let m = &harness.results()[0];
        assert_eq!(m.backend, BackendKind::Postgres);
        assert_eq!(m.operation, OperationKind::Insert);
        assert_eq!(m.label, "Client");
        assert_eq!(m.record_count, 20_000);
    }

    #[test]
    fn test_zero_elapsed_reports_infinite_throughput() {
        let m = Measurement::new(
            BackendKind::MongoDb,
            OperationKind::Query,
            "Client by email",
            Duration::ZERO,
            20_000,
        );
        assert!(m.throughput().is_infinite());
        assert_eq!(m.duration_ms(), 0);
        assert_eq!(m.row()[5], "inf");

        let empty = Measurement::new(
            BackendKind::MongoDb,
            OperationKind::Query,
            "Client by email",
            Duration::ZERO,
            0,
        );
        assert_eq!(empty.row()[5], "inf");
    }

    #[test]
    fn test_measure_discards_value() {
        let mut harness = BenchHarness::new(Vec::new());
        harness.measure(BackendKind::MongoDb, OperationKind::Query, "Total spent", 10, || {
            Ok::<_, String>(42.5_f64)
        });
        assert_eq!(harness.results().len(), 1);
    }

    #[test]
    fn test_measure_times_operation() {
        let mut harness = BenchHarness::new(Vec::new());
        harness.measure(BackendKind::Cassandra, OperationKind::Query, "Sleep", 1, || {
            std::thread::sleep(Duration::from_millis(20));
            ok()
        });
        assert!(harness.results()[0].elapsed >= Duration::from_millis(20));
    }

    #[test]
    fn test_results_keep_call_order() {
        let mut harness = BenchHarness::new(Vec::new());
        let labels = ["Client", "Product", "Order", "Payment"];
        for (i, label) in labels.iter().enumerate() {
            harness.measure(BackendKind::Postgres, OperationKind::Insert, label, i, ok);
            harness.measure(BackendKind::Postgres, OperationKind::Insert, "skipped", i, failing);
        }

        let recorded: Vec<_> = harness.results().iter().map(|m| m.label.as_str()).collect();
        assert_eq!(recorded, labels);
    }

    #[test]
    fn test_duration_rounds_to_millis() {
        let m = |nanos| {
            Measurement::new(
                BackendKind::Postgres,
                OperationKind::Query,
                "x",
                Duration::from_nanos(nanos),
                1,
            )
        };
        assert_eq!(m(1_499_999).duration_ms(), 1);
        assert_eq!(m(1_500_000).duration_ms(), 2);
        assert_eq!(m(0).duration_ms(), 0);
        assert_eq!(m(2_345_678_901).duration_ms(), 2_346);
    }

    #[test]
    fn test_throughput() {
        let m = Measurement::new(
            BackendKind::MongoDb,
            OperationKind::Insert,
            "Client",
            Duration::from_millis(2_500),
            20_000,
        );
        assert_eq!(m.throughput(), 8_000.0);
        assert_eq!(m.row()[5], "8000.00");

        let third = Measurement::new(
            BackendKind::MongoDb,
            OperationKind::Insert,
            "Client",
            Duration::from_secs(3),
            10,
        );
        assert_eq!(third.row()[5], "3.33");
    }

    #[test]
    fn test_row_cells() {
        let m = Measurement::new(
            BackendKind::Cassandra,
            OperationKind::Insert,
            "Order",
            Duration::from_micros(1_234_400),
            10_000,
        );
        let row = m.row();
        assert_eq!(row[0], "Cassandra");
        assert_eq!(row[1], "INSERT");
        assert_eq!(row[2], "Order");
        assert_eq!(row[3], "10000");
        assert_eq!(row[4], "1s 234ms");
    }

    #[test]
    fn test_empty_report_fails() {
        let mut harness = BenchHarness::new(Vec::new());
        assert!(matches!(harness.generate_report(), Err(Error::NoResults)));

        harness.measure(BackendKind::Postgres, OperationKind::Insert, "Client", 1, ok);
        assert!(harness.generate_report().is_ok());
    }

    #[test]
    fn test_render_table_layout() {
        let results = vec![
            Measurement::new(
                BackendKind::Postgres,
                OperationKind::Insert,
                "Client",
                Duration::from_millis(100),
                100,
            ),
            Measurement::new(
                BackendKind::MongoDb,
                OperationKind::Query,
                "Client by email",
                Duration::from_millis(5),
                20_000,
            ),
        ];
        let table = render_table(&results);
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 4, "header, separator, two rows:\n{}", table);
        for column in REPORT_HEADER {
            assert!(lines[0].contains(column));
        }
        assert!(lines[1].trim().chars().all(|c| c == '-'));
        assert!(lines[2].contains("PostgreSQL") && lines[2].contains("1000.00"));
        assert!(lines[3].contains("Client by email") && lines[3].contains("4000000.00"));
    }

    #[test]
    fn test_backend_names() {
        let names: Vec<_> = BackendKind::ALL.iter().map(|b| b.to_string()).collect();
        assert_eq!(names, ["PostgreSQL", "MongoDB", "Cassandra"]);
        assert_eq!(OperationKind::Query.to_string(), "QUERY");
    }
}
