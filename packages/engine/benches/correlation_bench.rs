// packages/engine/benches/correlation_bench.rs
//! Correlator hot path and export rendering benchmarks

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use netscope_engine::interception::correlator::{Correlator, MonitorState};
use netscope_engine::interception::domain_filter::DomainFilter;
use netscope_engine::interception::phase::{Header, HeadersReceived, RequestCompleted, RequestInitiated};
use netscope_engine::recording::exporter::{to_csv, to_json, to_sql_script};
use netscope_engine::recording::record::RequestRecord;
use std::sync::Arc;
use std::time::Duration;

fn correlator() -> Correlator {
    Correlator::new(
        Arc::new(MonitorState::new(true)),
        Arc::new(DomainFilter::new()),
        Duration::from_secs(300),
    )
}

fn bench_lifecycle(c: &mut Criterion) {
    let correlator = correlator();
    let headers = vec![
        Header::new("Content-Type", "text/html; charset=utf-8"),
        Header::new("Content-Length", "5120"),
        Header::new("Server", "bench"),
    ];
    let mut n = 0u64;

    let mut group = c.benchmark_group("correlator");
    group.throughput(Throughput::Elements(1));
    group.bench_function("three_phases", |b| {
        b.iter(|| {
            n += 1;
            let key = n.to_string();
            correlator.on_phase1(&key, RequestInitiated::new("GET", "https://bench.test/static/app.js"));
            correlator.on_phase2(
                &key,
                HeadersReceived {
                    status_code: Some(200),
                    status_line: "HTTP/1.1 200 OK".to_string(),
                    response_headers: headers.clone(),
                },
            );
            black_box(correlator.on_phase3(&key, RequestCompleted::default().with_body("<html>hello</html>")))
        })
    });
    group.finish();
}

fn records(count: usize) -> Vec<RequestRecord> {
    (0..count)
        .map(|i| {
            let mut record = RequestRecord::pending("GET", format!("https://bench.test/{}.js", i), Utc::now());
            record.id = Some(i as i64 + 1);
            record.domain = Some("bench.test".to_string());
            record.response_code = Some(200);
            record.content_length = Some(1024);
            record
        })
        .collect()
}

fn bench_exports(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    for size in [100usize, 1000] {
        let set = records(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("json", size), &set, |b, set| {
            b.iter(|| to_json(black_box(set)))
        });
        group.bench_with_input(BenchmarkId::new("csv", size), &set, |b, set| {
            b.iter(|| to_csv(black_box(set)))
        });
        group.bench_with_input(BenchmarkId::new("sql", size), &set, |b, set| {
            b.iter(|| to_sql_script(black_box(set)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lifecycle, bench_exports);
criterion_main!(benches);
