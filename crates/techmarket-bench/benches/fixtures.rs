//! Dataset generation and report rendering benchmarks.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use techmarket_bench::fixtures::{generate_cpf, generate_orders};
use techmarket_bench::{render_table, BackendKind, Dataset, Measurement, OperationKind, SeedSizes};

fn bench_generators(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixtures/generate");
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    group.bench_function("cpf", |b| {
        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| black_box(generate_cpf(&mut rng)));
    });

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("orders", count), &count, |b, &count| {
            let mut rng = StdRng::seed_from_u64(42);
            b.iter(|| black_box(generate_orders(&mut rng, count, 20_000, 5_000, now)));
        });
    }

    group.finish();
}

fn bench_dataset(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixtures/dataset");
    group.sample_size(10);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    // Full default dataset, as loaded by the binary
    group.bench_function("default_sizes", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(42);
            black_box(Dataset::generate(&mut rng, SeedSizes::default(), now))
        });
    });

    group.finish();
}

fn bench_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("harness/report");

    // Full matrix: 4 inserts and 6 queries per backend
    let results: Vec<Measurement> = BackendKind::ALL
        .into_iter()
        .flat_map(|backend| {
            (0..10).map(move |i| {
                let operation = if i < 4 {
                    OperationKind::Insert
                } else {
                    OperationKind::Query
                };
                Measurement::new(
                    backend,
                    operation,
                    format!("Operation {}", i),
                    Duration::from_micros(1_500 * (i + 1)),
                    10_000,
                )
            })
        })
        .collect();

    group.bench_function("render_table", |b| {
        b.iter(|| black_box(render_table(black_box(&results))));
    });

    group.finish();
}

criterion_group!(benches, bench_generators, bench_dataset, bench_report);
criterion_main!(benches);
