//! Throughput of the trainer-side hot path: advantage estimation and one
//! gradient computation/apply on a fixed trajectory.

use a3c::algorithms::{A3CBuilder, A3C};
use a3c::env::CartPole;
use a3c::optimizer::OptimizerConfig;
use a3c::policy::PolicyKind;
use a3c::trajectory::{gae, Trajectory};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;

fn gae_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("gae");
    for &n in &[20usize, 200, 2000] {
        let rewards = Array1::from_shape_fn(n, |i| (i % 7) as f32 * 0.1);
        let values = Array1::from_shape_fn(n, |i| (i % 5) as f32 * 0.2);
        let mut dones = vec![false; n];
        dones[n - 1] = true;
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| gae(black_box(rewards.view()), black_box(values.view()), &dones, 0.0, 0.99, 0.95))
        });
    }
    group.finish();
}

fn build(kind: PolicyKind) -> (A3C, Trajectory) {
    let mut a3c = A3CBuilder::new()
        .env(Box::new(CartPole::new()))
        .policy_kind(kind)
        .trajectory_length(20)
        .seed(0)
        .build()
        .expect("benchmark setup");
    a3c.start_producer(None).expect("producer start");
    let trajectory = a3c.next_trajectory().expect("trajectory");
    a3c.stop_producer();
    (a3c, trajectory)
}

fn update_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    for kind in PolicyKind::ALL {
        let (a3c, trajectory) = build(kind);
        let mut optimizer = OptimizerConfig::default().build();
        group.bench_function(kind.as_str(), |b| {
            b.iter(|| {
                a3c.sync().expect("sync");
                let feed = a3c.feed(trajectory.clone(), 0.99, 0.95).expect("feed");
                let mut output = a3c.compute_gradients(&feed).expect("gradients");
                a3c.apply_gradients(&mut output.gradients, &mut optimizer, 1e-4).expect("apply")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, gae_benchmark, update_benchmark);
criterion_main!(benches);
