use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::prelude::Rng;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::StandardNormal;

use warmup_rs::{DualAverage, DualAverageOptions, MetricSettings, MetricVariant, ProposalMetric};

fn bench_dual_average(c: &mut Criterion) {
    c.bench_function("dual_average_1000_updates", |b| {
        b.iter(|| {
            let mut adapt = DualAverage::new(DualAverageOptions::default(), 0.1);
            for i in 0..1000u64 {
                let accept = 0.7 + 0.2 * ((i % 10) as f64 / 10.);
                adapt.advance(accept, 0.8);
            }
            adapt.current_step_size_adapted()
        })
    });
}

fn bench_dense_adapt(c: &mut Criterion) {
    let dim = 20;
    let mut rng = SmallRng::seed_from_u64(42);
    let draws: Vec<Vec<f64>> = (0..200)
        .map(|_| (0..dim).map(|_| rng.sample::<f64, _>(StandardNormal)).collect())
        .collect();

    let settings = MetricSettings {
        variant: MetricVariant::Dense,
        shrinkage: 0.05,
        min_samples: 3,
    };

    c.bench_function("dense_metric_adapt_dim20_n200", |b| {
        b.iter_batched(
            || {
                let mut metric = ProposalMetric::new(settings, dim);
                for draw in &draws {
                    metric.observe(draw);
                }
                metric
            },
            |mut metric| {
                metric.adapt().unwrap();
                metric
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_dual_average, bench_dense_adapt);
criterion_main!(benches);
