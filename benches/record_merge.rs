//! Hot path benchmarks: recording samples and folding records.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loadgen_stats::accumulate::SuccessSample;
use loadgen_stats::{
    fold_parallel, fold_records, BucketScheme, HistogramLayout, MetricsRecord, OpId, RunConfig,
};

const CONFIG: &str = r#"{
    "driver_name": "BenchDriver",
    "response_time_unit": "milliseconds",
    "graph_interval_secs": 10,
    "run_control": { "mode": "time", "ramp_up_secs": 60, "steady_state_secs": 600, "ramp_down_secs": 60 },
    "operations": [
        { "name": "Read", "max_90th": 200.0, "cycle": { "kind": "think_time", "deviation_percent": 5.0, "histogram_max_secs": 10.0 } },
        { "name": "Write", "max_90th": 500.0, "cycle": { "kind": "think_time", "deviation_percent": 5.0, "histogram_max_secs": 10.0 } }
    ],
    "foreground_mix": { "ratios": [0.8, 0.2], "deviation_percent": 2.0 }
}"#;

fn filled_record(config: &RunConfig, samples: usize) -> MetricsRecord {
    let mut record =
        MetricsRecord::new(config.operation_names(), BucketScheme::from_config(config));
    for i in 0..samples {
        record.record_success(&sample(i));
    }
    record
}

fn sample(i: usize) -> SuccessSample {
    let response = ((i * 7_919) % 400) as i64 * 1_000_000;
    SuccessSample {
        op: OpId(i % 2),
        invoke_time: 0,
        respond_time: response,
        pause_time: 0,
        elapsed_since_run_start: i as i64 * 50_000_000,
        in_ramp: false,
    }
}

fn bench_record_success(c: &mut Criterion) {
    let config = RunConfig::from_json(CONFIG).expect("bench config");
    let mut record = filled_record(&config, 0);
    let mut i = 0usize;

    c.bench_function("record_success", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            record.record_success(black_box(&sample(i)));
        });
    });
}

fn bench_fold(c: &mut Criterion) {
    let config = RunConfig::from_json(CONFIG).expect("bench config");
    assert_eq!(config.histogram, HistogramLayout::default());
    let mut group = c.benchmark_group("fold");

    for threads in [16usize, 256].iter() {
        let records: Vec<MetricsRecord> =
            (0..*threads).map(|_| filled_record(&config, 1_000)).collect();

        group.bench_with_input(BenchmarkId::new("sequential", threads), &records, |b, records| {
            b.iter(|| black_box(fold_records(records.clone()).expect("fold")));
        });
        group.bench_with_input(BenchmarkId::new("parallel", threads), &records, |b, records| {
            b.iter(|| black_box(fold_parallel(records.clone(), 4).expect("fold")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_success, bench_fold);
criterion_main!(benches);
