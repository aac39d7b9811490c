//! Microbenchmarks for the update write path.
//!
//! Measures single-step update latency and the cost of consolidation
//! fan-out into a second archive.
//!
//! Run with: `cargo bench -p rotunda -- update`

#![allow(missing_docs)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rotunda::{CreateSpec, Database};
use tempfile::tempdir;

/// One GAUGE source at 1s resolution with a 60:1 averaged tier.
fn setup_db(dir: &tempfile::TempDir, name: &str) -> Database {
    Database::create(
        dir.path().join(name),
        CreateSpec {
            step: 1,
            start: 1_700_000_000,
            data_sources: vec!["DS:value:GAUGE:300:U:U".parse().unwrap()],
            archives: vec![
                "RRA:AVERAGE:0.5:1:86400".parse().unwrap(),
                "RRA:AVERAGE:0.5:60:10080".parse().unwrap(),
            ],
        },
    )
    .unwrap()
}

fn bench_update_single_step(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut db = setup_db(&dir, "single.rtd");
    let mut ts = 1_700_000_000i64;

    c.bench_function("update/one_step", |b| {
        b.iter(|| {
            ts += 1;
            db.update(black_box(ts), black_box(&["42.5"])).unwrap();
        });
    });
}

fn bench_update_multi_source(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let sources = (0..16)
        .map(|i| format!("DS:s{i}:GAUGE:300:U:U").parse().unwrap())
        .collect();
    let mut db = Database::create(
        dir.path().join("wide.rtd"),
        CreateSpec {
            step: 1,
            start: 1_700_000_000,
            data_sources: sources,
            archives: vec!["RRA:AVERAGE:0.5:1:86400".parse().unwrap()],
        },
    )
    .unwrap();

    let tokens = ["7.25"; 16];
    let mut ts = 1_700_000_000i64;

    c.bench_function("update/sixteen_sources", |b| {
        b.iter(|| {
            ts += 1;
            db.update(black_box(ts), black_box(&tokens)).unwrap();
        });
    });
}

criterion_group!(benches, bench_update_single_step, bench_update_multi_source);
criterion_main!(benches);
