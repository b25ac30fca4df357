#[macro_use]
extern crate criterion;

use criterion::Criterion;

extern crate pingstore;

use pingstore::metric::{CounterMetric, StringMetric};
use pingstore::{CommonMetricData, Config, Database, Lifetime, PingCollector};

fn stores() -> Vec<String> {
    vec!["metrics".into(), "baseline".into()]
}

fn benchmark(c: &mut Criterion) {
    c.bench_function("counter_add", |b| {
        let db = Database::new(Config::default()).unwrap();
        let counter = CounterMetric::new(CommonMetricData::new("bench", "clicks", Lifetime::Ping, stores()));
        b.iter(|| counter.add(&db, 1));
    });

    c.bench_function("string_set_truncated", |b| {
        let db = Database::new(Config::default()).unwrap();
        let string = StringMetric::new(CommonMetricData::new("bench", "engine", Lifetime::Ping, stores()));
        let long = "x".repeat(80);
        b.iter(|| string.set(&db, long.as_str()));
    });

    c.bench_function("collect_100_metrics", |b| {
        let db = Database::new(Config::default()).unwrap();
        let counters: Vec<CounterMetric> = (0..100)
            .map(|i| {
                CounterMetric::new(CommonMetricData::new(
                    "bench",
                    format!("counter{}", i),
                    Lifetime::Ping,
                    stores(),
                ))
            })
            .collect();
        b.iter(|| {
            for counter in counters.iter() {
                counter.add(&db, 1);
            }
            db.collect("metrics").unwrap()
        });
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
