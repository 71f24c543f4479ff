//! Heatmap reduction benchmark

use keyvisual::decorator::{SeparatorLabelStrategy, TidbLabelStrategy};
use keyvisual::decorator::{DbInfo, SchemaProvider, TableInfo};
use keyvisual::matrix::{Axis, DistanceConfig, DistanceStrategy, Plane, StatTag, Strategy};

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::sync::Arc;

struct NoSchema;

#[async_trait]
impl SchemaProvider for NoSchema {
    async fn databases(&self) -> keyvisual::Result<Vec<DbInfo>> {
        Ok(Vec::new())
    }

    async fn tables(&self, _db: &str) -> keyvisual::Result<Vec<TableInfo>> {
        Ok(Vec::new())
    }
}

/// Deterministic pseudo-random activity so runs are comparable.
fn activity(seed: u64) -> u64 {
    let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 29;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    (x ^ (x >> 32)) % 10_000
}

fn create_plane(columns: usize, buckets: usize) -> Plane {
    let keys: Vec<Vec<u8>> = (0..=buckets)
        .map(|i| format!("t{:04}/r{:08}", i / 256, i).into_bytes())
        .collect();
    let axes = (0..columns)
        .map(|t| {
            let mut values = BTreeMap::new();
            for (n, tag) in StatTag::RAW.iter().enumerate() {
                let row = (0..buckets)
                    .map(|b| activity((t * buckets + b) as u64 * 4 + n as u64))
                    .collect();
                values.insert(*tag, row);
            }
            Axis::new(keys.clone(), values).unwrap()
        })
        .collect();
    let times = (0..=columns as i64).map(|t| t * 60).collect();
    Plane::new(times, axes).unwrap()
}

fn benchmark_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");
    group.sample_size(10);

    let strategy = DistanceStrategy::new(
        Arc::new(SeparatorLabelStrategy::new("/")),
        DistanceConfig::default(),
    );

    for buckets in [2_000usize, 8_000] {
        let plane = create_plane(60, buckets);
        group.throughput(Throughput::Elements((60 * buckets) as u64));
        group.bench_with_input(BenchmarkId::new("written_bytes", buckets), &plane, |b, plane| {
            b.iter(|| {
                let matrix = plane
                    .pixel(&strategy, 1_536, &StatTag::WrittenBytes.display_tags())
                    .unwrap();
                black_box(matrix);
            });
        });
    }

    let plane = create_plane(60, 8_000);
    group.bench_function("integration", |b| {
        b.iter(|| {
            let matrix = plane
                .pixel(&strategy, 1_536, &StatTag::Integration.display_tags())
                .unwrap();
            black_box(matrix);
        });
    });

    group.finish();
}

fn benchmark_compact_axis(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_axis");

    let strategy = DistanceStrategy::new(
        Arc::new(TidbLabelStrategy::new(Arc::new(NoSchema))),
        DistanceConfig::default(),
    );
    let plane = create_plane(1, 20_000);
    let axis = plane.axes()[0].clone();

    group.throughput(Throughput::Elements(20_000));
    group.bench_function("20k_to_1536", |b| {
        b.iter(|| black_box(strategy.compact_axis(&axis, 1_536).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, benchmark_reduce, benchmark_compact_axis);

criterion_main!(benches);
