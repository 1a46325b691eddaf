//! Benchmarks for identity normalization and record inserts.
//!
//! Benchmark targets:
//! - Normalization: <10us per value
//! - Repeat upsert (identity cache hit): <50us
//! - A record insert, relational and graph

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assetdb::identity::normalize;
use assetdb::models::HostRecord;
use assetdb::{AssetType, DatabaseConfig, InsertInfo, OperationContext, Store, open_store};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

// ============================================================================
// Normalization Benchmarks
// ============================================================================

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for (asset_type, raw) in [
        (AssetType::Fqdn, "WWW.Example.CO.UK."),
        (AssetType::Ip, "2001:db8::1"),
        (AssetType::Netblock, "10.1.2.3/8"),
        (AssetType::AutonomousSystem, "AS64496"),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(asset_type), &raw, |b, raw| {
            b.iter(|| normalize(black_box(asset_type), black_box(raw)));
        });
    }

    group.finish();
}

// ============================================================================
// Store Benchmarks
// ============================================================================

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.measurement_time(Duration::from_secs(5));

    let dir = tempfile::tempdir().unwrap();
    let configs = [
        ("sqlite", DatabaseConfig::sqlite(dir.path().join("bench.sqlite"))),
        ("graph", DatabaseConfig::graph()),
    ];

    for (name, config) in configs {
        let store = open_store(&config).unwrap();
        store.create_database_if_not_exists().unwrap();
        store.run_init_migration().unwrap();
        let execution = store
            .insert_execution(&OperationContext::background(), &[])
            .unwrap();
        let info = InsertInfo::new(execution, "bench");
        store
            .upsert(&info, AssetType::Fqdn, "www.example.com")
            .unwrap();

        group.bench_function(BenchmarkId::new("upsert_existing", name), |b| {
            b.iter(|| store.upsert(&info, AssetType::Fqdn, black_box("www.example.com")));
        });

        let mut counter = 0u32;
        group.bench_function(BenchmarkId::new("insert_a_new", name), |b| {
            b.iter(|| {
                counter = counter.wrapping_add(1);
                let record = HostRecord::new(
                    format!("host{counter}.example.com"),
                    std::net::Ipv4Addr::from(counter).to_string(),
                );
                store.insert_a(&info, black_box(&record))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_store);
criterion_main!(benches);
