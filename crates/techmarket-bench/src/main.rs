//! TechMarket benchmark binary.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use techmarket_bench::config::DEFAULT_ENV_FILE;
use techmarket_bench::{
    runner, Backend, BenchConfig, BenchHarness, CassandraBackend, Dataset, MongoBackend,
    PostgresBackend,
};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "techmarket_bench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config =
        BenchConfig::from_env_with_file(DEFAULT_ENV_FILE).context("invalid configuration")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        report = %config.report_path.display(),
        seed = config.seed,
        "starting benchmark"
    );

    let rt = Arc::new(Runtime::new().context("failed to create tokio runtime")?);

    let backends: Vec<Box<dyn Backend>> = vec![
        Box::new(
            PostgresBackend::connect(&config.postgres, Arc::clone(&rt))
                .context("failed to connect to PostgreSQL")?,
        ),
        Box::new(
            MongoBackend::connect(&config.mongo, Arc::clone(&rt))
                .context("failed to connect to MongoDB")?,
        ),
        Box::new(
            CassandraBackend::connect(&config.cassandra, Arc::clone(&rt))
                .context("failed to connect to Cassandra")?,
        ),
    ];

    for backend in &backends {
        backend
            .setup_schema()
            .with_context(|| format!("failed to prepare {} schema", backend.kind()))?;
    }

    let now = Utc::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let dataset = Dataset::generate(&mut rng, config.sizes, now);
    tracing::info!(
        clients = dataset.clients.len(),
        products = dataset.products.len(),
        orders = dataset.orders.len(),
        payments = dataset.payments.len(),
        "dataset generated"
    );

    let mut harness = BenchHarness::open(&config.report_path).with_context(|| {
        format!("failed to open report file {}", config.report_path.display())
    })?;

    runner::run(&mut harness, &backends, &dataset, now);

    tracing::info!(
        measurements = harness.results().len(),
        failures = harness.failures(),
        "benchmark finished"
    );
    harness.close().context("failed to write report")?;
    tracing::info!(report = %config.report_path.display(), "report written");

    Ok(())
}
