//! Benchmarks for articulation stepping and impulse propagation.
//!
//! Run with: `cargo bench -p sim-articulation --features parallel`
//!
//! Measures a full step across chain lengths, the cost of one
//! impulse/velocity round trip through the callbacks, and batch throughput.

#![allow(
    missing_docs,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::unwrap_used,
    clippy::ignored_unit_patterns
)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use sim_articulation::{
    Articulation, ArticulationSolver, BatchArticulations, SpatialVector,
    compute_unconstrained_velocities,
};
use sim_types::{
    ArticulationConfig, ArticulationJoint, JointDrive, LinkBody, MassProperties, Point3, Pose,
    SwingLimit, Twist, Vector3,
};

const DT: f64 = 1.0 / 240.0;

/// Hanging chain of `n` capsule-like links, driven and cone-limited at every
/// joint, under gravity.
fn bench_chain(n: usize) -> Articulation {
    let gravity = Twist::linear(Vector3::new(0.0, 0.0, -9.81));
    let link = |i: usize| {
        LinkBody::new(
            Pose::from_position(Point3::new(i as f64 * 0.5, 0.0, 0.0)),
            MassProperties::box_shape(1.0, Vector3::new(0.25, 0.05, 0.05)),
        )
        .with_acceleration(gravity)
    };
    let config = ArticulationConfig::default().with_fixed_base(true);
    let mut builder = Articulation::builder(link(0)).with_config(config);
    for i in 1..n {
        let joint = ArticulationJoint::new(
            Pose::from_position(Point3::new(0.25, 0.0, 0.0)),
            Pose::from_position(Point3::new(-0.25, 0.0, 0.0)),
        )
        .with_drive(JointDrive::new(50.0, 5.0))
        .with_swing_limit(SwingLimit::symmetric(0.6));
        builder.add_link(i - 1, link(i), joint);
    }
    builder.build().unwrap()
}

fn bench_step(c: &mut Criterion) {
    let solver = ArticulationSolver::new();
    let mut group = c.benchmark_group("articulation_step");

    for &n in &[4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut articulation = bench_chain(n);
            let mut data = articulation.create_data();
            let mut rows = Vec::new();
            b.iter(|| {
                solver
                    .step(&mut articulation, &mut data, DT, &mut rows, |_, _| {})
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_callbacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("impulse_round_trip");

    for &n in &[4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let articulation = bench_chain(n);
            let mut data = articulation.create_data();
            let mut rows = Vec::new();
            compute_unconstrained_velocities(&articulation, &mut data, DT, &mut rows);
            let impulse = SpatialVector::linear(Vector3::new(0.0, 1e-3, 0.0));
            let tip = n - 1;
            b.iter(|| {
                data.apply_impulse(tip, &impulse);
                black_box(data.velocity(tip / 2))
            });
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let steps_per_iter = 10;
    let mut group = c.benchmark_group("batch_step_all");

    for &n_envs in &[1, 16, 64, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(n_envs),
            &n_envs,
            |b, &n_envs| {
                let mut batch = BatchArticulations::new(vec![bench_chain(8); n_envs]);

                // Distinct initial states so the envs diverge
                for (i, env) in batch.envs_mut().enumerate() {
                    let spin = Vector3::new(0.0, 0.0, i as f64 * 0.01);
                    env.articulation_mut().body_mut(1).twist = Twist::new(Vector3::zeros(), spin);
                }

                b.iter(|| {
                    for _ in 0..steps_per_iter {
                        let _errors = batch.step_all(DT);
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_step, bench_callbacks, bench_batch);
criterion_main!(benches);
