use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rl::{envs, estimate_advantages, Env, Normalizer, PolicyModel, RolloutCollector};

fn bench_gae(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let n = 4096;
    let rewards: Vec<f32> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let values: Vec<f32> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let masks: Vec<f32> = (0..n).map(|i| if i % 200 == 199 { 0.0 } else { 1.0 }).collect();

    c.bench_function("gae_4096", |b| {
        b.iter(|| estimate_advantages(black_box(&rewards), black_box(&masks), black_box(&values), 0.99, 0.95).unwrap())
    });
}

fn bench_rollout(c: &mut Criterion) {
    let env = envs::make("CartPole-v1").unwrap();
    let policy = PolicyModel::for_space(4, env.action_space(), 0.0, &mut StdRng::seed_from_u64(1)).unwrap();
    let mut collector = RolloutCollector::new(vec![env], 0, 10_000).unwrap();
    let normalizer = Mutex::new(Normalizer::new(4, 5.0));

    c.bench_function("cartpole_rollout_512", |b| {
        b.iter(|| collector.collect(512, &policy, &normalizer).unwrap())
    });
}

criterion_group!(benches, bench_gae, bench_rollout);
criterion_main!(benches);
