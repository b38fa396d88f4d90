//! Result Encoding Performance Benchmarks
//!
//! Benchmarks for turning materialized rows into tool output:
//! - CSV encoding of narrow and wide result sets
//! - Values that need quoting

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;

use sqlgate::{encode_csv, CellValue};

fn build_rows(columns: usize, rows: usize, quoted: bool) -> (Vec<String>, Vec<HashMap<String, CellValue>>) {
    let headers: Vec<String> = (0..columns).map(|c| format!("col_{c}")).collect();

    let data = (0..rows)
        .map(|r| {
            headers
                .iter()
                .enumerate()
                .map(|(c, name)| {
                    let value = match c % 4 {
                        0 => CellValue::Integer(r as i64),
                        1 if quoted => CellValue::Text(format!("Doe, \"J\" {r}")),
                        1 => CellValue::Text(format!("user_{r}")),
                        2 => CellValue::Float(r as f64 * 0.5),
                        _ => CellValue::Null,
                    };
                    (name.clone(), value)
                })
                .collect()
        })
        .collect();

    (headers, data)
}

fn bench_encode_csv(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_csv");

    for rows in [10, 1_000, 10_000] {
        let (headers, data) = build_rows(6, rows, false);
        group.bench_with_input(BenchmarkId::new("plain", rows), &rows, |b, _| {
            b.iter(|| encode_csv(black_box(&headers), black_box(&data)).unwrap());
        });
    }

    let (headers, data) = build_rows(6, 1_000, true);
    group.bench_function("quoted/1000", |b| {
        b.iter(|| encode_csv(black_box(&headers), black_box(&data)).unwrap());
    });

    let (headers, data) = build_rows(60, 1_000, false);
    group.bench_function("wide/1000", |b| {
        b.iter(|| encode_csv(black_box(&headers), black_box(&data)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_encode_csv);
criterion_main!(benches);
