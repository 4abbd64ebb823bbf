use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use signal_rl_agent::{DqnAgent, DqnConfig, NetworkConfig, QNetwork, ReplayMemory, ValueLearning};
use signal_rl_core::{Agent, AgentConfig, LaneObservation, Transition};

fn transition(rng: &mut StdRng) -> Transition {
    let mut lanes = || (0..4).map(|_| f32::from(rng.gen_range(0_u8..12))).collect::<Vec<_>>();
    let state = lanes();
    let next_state = lanes();
    Transition::new(state, next_state, rng.gen_range(0..4), -rng.gen_range(0.0..200.0), false)
}

fn forward(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let network = QNetwork::new(NetworkConfig::default(), 0.1, &mut rng).unwrap();
    let mut group = c.benchmark_group("forward");
    for batch in [1_usize, 64, 1024] {
        let input = Array2::from_shape_fn((batch, 4), |(i, j)| ((i + j) % 7) as f32);
        group.bench_with_input(BenchmarkId::from_parameter(batch), &input, |b, input| {
            b.iter(|| network.forward(black_box(input.view())).unwrap());
        });
    }
    group.finish();
}

fn train_step(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let mut network = QNetwork::new(NetworkConfig::default(), 0.001, &mut rng).unwrap();
    let states = Array2::from_shape_fn((1024, 4), |(i, j)| ((i * 3 + j) % 11) as f32);
    let actions: Vec<usize> = (0..1024).map(|i| i % 4).collect();
    let targets = Array1::from_shape_fn(1024, |i| -((i % 50) as f32));

    c.bench_function("train_step_1024", |b| {
        b.iter(|| {
            network
                .train_step(states.view(), &actions, black_box(targets.view()))
                .unwrap()
        });
    });
}

fn replay_sample(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let mut memory = ReplayMemory::new(100_000, 4).unwrap();
    for _ in 0..20_000 {
        memory.store(&transition(&mut rng)).unwrap();
    }
    c.bench_function("replay_sample_1024", |b| {
        b.iter(|| memory.sample(black_box(1024), &mut rng).unwrap());
    });
}

fn learn(c: &mut Criterion) {
    let mut group = c.benchmark_group("learn");
    for variant in [ValueLearning::Dqn, ValueLearning::Ddqn] {
        let mut agent = DqnAgent::new(DqnConfig {
            base: AgentConfig {
                batch_size: 256,
                ..AgentConfig::default()
            },
            variant,
            seed: Some(3),
            ..DqnConfig::default()
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..2_048 {
            agent.store_transition(0, &transition(&mut rng)).unwrap();
        }
        group.bench_function(BenchmarkId::from_parameter(variant), |b| {
            b.iter(|| agent.learn(0).unwrap());
        });
    }
    group.finish();
}

fn choose_action(c: &mut Criterion) {
    let mut agent = DqnAgent::new(DqnConfig {
        seed: Some(5),
        ..DqnConfig::default()
    })
    .unwrap();
    agent.set_epsilon(0.0);
    let observation = LaneObservation::from(vec![3.0, 0.0, 7.0, 1.0]);
    c.bench_function("choose_action_greedy", |b| {
        b.iter(|| agent.choose_action(black_box(&observation)).unwrap());
    });
}

criterion_group!(benches, forward, train_step, replay_sample, learn, choose_action);
criterion_main!(benches);
