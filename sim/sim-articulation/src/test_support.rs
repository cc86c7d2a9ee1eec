//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use nalgebra::{Point3, UnitQuaternion, Vector3};
use proptest::prelude::*;
use sim_types::{
    ArticulationConfig, ArticulationJoint, JointDrive, LinkBody, MassProperties, Pose, SwingLimit,
    Twist, TwistLimit,
};

use crate::articulation::Articulation;
use crate::data::ArticulationData;
use crate::frames::JointFrames;
use crate::limits::LimitRow;
use crate::pipeline::{compute_unconstrained_velocities, prepare_data_block};
use crate::spatial::{SpatialInertia, SpatialVector};
use crate::topology::Topology;

const DT: f64 = 0.01;

/// Geometry the projector tests factor directly.
pub(crate) struct ArticulationFixture {
    pub topology: Topology,
    pub base_inertia: Vec<SpatialInertia>,
    pub poses: Vec<Pose>,
    pub frames: Vec<JointFrames>,
}

/// Offset from a parent to its `link`-th child, varied so no two joints are
/// aligned.
fn link_offset(link: usize) -> Vector3<f64> {
    let t = link as f64;
    Vector3::new(0.8 + 0.1 * (t * 1.3).cos(), 0.4 * (t * 0.7).sin(), 0.3 * (t * 1.9).cos())
}

fn link_body(link: usize, position: Point3<f64>) -> LinkBody {
    let t = link as f64;
    let rotation = UnitQuaternion::from_euler_angles(0.1 * t, -0.05 * t, 0.2 * t);
    let half_extents = Vector3::new(0.2 + 0.02 * t, 0.1, 0.15 + 0.01 * (t * 2.1).sin());
    LinkBody::new(
        Pose::from_position_rotation(position, rotation),
        MassProperties::box_shape(1.0 + 0.25 * t, half_extents),
    )
}

/// Joint at the midpoint of two link poses, with coincident frames.
fn midpoint_joint(parent: &Pose, child: &Pose) -> ArticulationJoint {
    let mid = Point3::from((parent.position.coords + child.position.coords) * 0.5);
    ArticulationJoint::new(
        Pose::from_position(parent.inverse().transform_point(&mid)),
        Pose::from_position(child.inverse().transform_point(&mid)),
    )
}

/// Articulation whose link `i + 1` hangs off `parents[i]`.
pub(crate) fn articulation_from_parents(parents: &[usize], config: ArticulationConfig) -> Articulation {
    let root = link_body(0, Point3::origin());
    let mut poses = vec![root.pose];
    let mut builder = Articulation::builder(root).with_config(config);
    for (i, &parent) in parents.iter().enumerate() {
        let link = i + 1;
        let body = link_body(link, poses[parent].position + link_offset(link));
        let joint = midpoint_joint(&poses[parent], &body.pose);
        poses.push(body.pose);
        builder.add_link(parent, body, joint);
    }
    builder.build().unwrap()
}

/// Free serial chain of `n` links.
pub(crate) fn chain_articulation(n: usize, config: ArticulationConfig) -> Articulation {
    let parents: Vec<usize> = (0..n.saturating_sub(1)).collect();
    articulation_from_parents(&parents, config)
}

/// `0; 1←0; 2←0; 3←1; 4←1; 5←2`
const TREE: [usize; 5] = [0, 0, 1, 1, 2];

fn fixture(articulation: &Articulation) -> ArticulationFixture {
    let mut data = articulation.create_data();
    prepare_data_block(articulation, &mut data);
    ArticulationFixture {
        topology: data.topology.clone(),
        base_inertia: data.base_inertia.clone(),
        poses: data.poses.clone(),
        frames: data.frames.clone(),
    }
}

pub(crate) fn tree_fixture() -> ArticulationFixture {
    fixture(&articulation_from_parents(&TREE, ArticulationConfig::default()))
}

pub(crate) fn random_fixture(parents: &[usize]) -> ArticulationFixture {
    fixture(&articulation_from_parents(parents, ArticulationConfig::default()))
}

/// Random trees of 2 to `max_links` links, as parent lists for links 1..n.
pub(crate) fn parent_strategy(max_links: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(any::<prop::sample::Index>(), 1..max_links).prop_map(|indices| {
        indices
            .iter()
            .enumerate()
            .map(|(i, index)| index.index(i + 1))
            .collect()
    })
}

/// Deterministic, joint-violating velocities.
pub(crate) fn scrambled_velocities(n: usize) -> Vec<SpatialVector> {
    (0..n)
        .map(|i| {
            let t = i as f64 + 1.0;
            SpatialVector::new(
                Vector3::new((t * 0.9).sin(), (t * 1.7).cos(), 0.5 * t.sin()),
                Vector3::new(0.3 * t.cos(), -(t * 0.4).sin(), (t * 2.3).cos()),
            )
        })
        .collect()
}

/// Give every link of `articulation` a different velocity.
pub(crate) fn spin_chain(articulation: &mut Articulation) {
    let velocities = scrambled_velocities(articulation.link_count());
    for (i, v) in velocities.into_iter().enumerate() {
        articulation.body_mut(i).twist = Twist::from(v);
    }
}

fn prepared(articulation: &Articulation) -> ArticulationData {
    let mut data = articulation.create_data();
    let mut rows = vec![];
    compute_unconstrained_velocities(articulation, &mut data, DT, &mut rows);
    data
}

pub(crate) fn prepared_tree() -> ArticulationData {
    let mut articulation = articulation_from_parents(&TREE, ArticulationConfig::default());
    spin_chain(&mut articulation);
    prepared(&articulation)
}

pub(crate) fn prepared_chain(n: usize, fixed_base: bool) -> ArticulationData {
    let config = ArticulationConfig::default().with_fixed_base(fixed_base);
    prepared(&chain_articulation(n, config))
}

pub(crate) fn prepared_random(parents: &[usize]) -> ArticulationData {
    prepared(&articulation_from_parents(parents, ArticulationConfig::default()))
}

/// Fixed root at the origin with a child at `l` along X, joined at the
/// root's center of mass.
pub(crate) fn two_link(l: f64, mass: f64, inertia: f64, config: ArticulationConfig) -> Articulation {
    let root = LinkBody::new(Pose::identity(), MassProperties::sphere(1.0, 0.1));
    let child = LinkBody::new(
        Pose::from_position(Point3::new(l, 0.0, 0.0)),
        MassProperties::new(mass, Vector3::repeat(inertia)),
    );
    let joint = ArticulationJoint::new(
        Pose::identity(),
        Pose::from_position(Point3::new(-l, 0.0, 0.0)),
    );
    let mut builder = Articulation::builder(root).with_config(config);
    builder.add_link(0, child, joint);
    builder.build().unwrap()
}

/// Fixed-base pendulum with the child rotated by `rotation` about the joint
/// point at (0.5, 0, 0), spinning at `spin`.
fn pendulum(rotation: UnitQuaternion<f64>, spin: Vector3<f64>, joint: ArticulationJoint) -> Articulation {
    let anchor = Point3::new(0.5, 0.0, 0.0);
    let arm = rotation * Vector3::new(0.5, 0.0, 0.0);
    let root = LinkBody::new(Pose::identity(), MassProperties::sphere(1.0, 0.1));
    let child = LinkBody::new(
        Pose::from_position_rotation(anchor + arm, rotation),
        MassProperties::sphere(1.0, 0.1),
    )
    .with_twist(Twist::new(spin.cross(&arm), spin));

    let config = ArticulationConfig::default().with_fixed_base(true);
    let mut builder = Articulation::builder(root).with_config(config);
    builder.add_link(0, child, joint);
    builder.build().unwrap()
}

fn pendulum_joint() -> ArticulationJoint {
    ArticulationJoint::new(
        Pose::from_position(Point3::new(0.5, 0.0, 0.0)),
        Pose::from_position(Point3::new(-0.5, 0.0, 0.0)),
    )
}

/// Straight pendulum at rest with `drive` on its joint, prepared for a step.
pub(crate) fn prepared_pendulum(drive: JointDrive) -> (Articulation, ArticulationData) {
    let articulation = pendulum(
        UnitQuaternion::identity(),
        Vector3::zeros(),
        pendulum_joint().with_drive(drive),
    );
    let data = prepared(&articulation);
    (articulation, data)
}

/// Pendulum swung by `angle` about Z and still swinging outward.
pub(crate) fn prepared_swung_pendulum(
    angle: f64,
    swing: SwingLimit,
    twist: Option<TwistLimit>,
    tangential_spring: (f64, f64),
) -> (Articulation, ArticulationData, Vec<LimitRow>) {
    let mut joint = pendulum_joint()
        .with_swing_limit(swing)
        .with_tangential_spring(tangential_spring.0, tangential_spring.1);
    joint.twist_limit = twist;
    let articulation = pendulum(
        UnitQuaternion::from_euler_angles(0.0, 0.0, angle),
        Vector3::new(0.0, 0.0, 2.0),
        joint,
    );
    let mut data = articulation.create_data();
    let mut rows = vec![];
    compute_unconstrained_velocities(&articulation, &mut data, DT, &mut rows);
    (articulation, data, rows)
}

/// Pendulum twisted by `angle` about its own axis.
pub(crate) fn prepared_twisted_pendulum(
    angle: f64,
    limit: TwistLimit,
) -> (Articulation, ArticulationData, Vec<LimitRow>) {
    let articulation = pendulum(
        UnitQuaternion::from_euler_angles(angle, 0.0, 0.0),
        Vector3::zeros(),
        pendulum_joint().with_twist_limit(limit),
    );
    let mut data = articulation.create_data();
    let mut rows = vec![];
    compute_unconstrained_velocities(&articulation, &mut data, DT, &mut rows);
    (articulation, data, rows)
}

/// Projected Gauss-Seidel over limit rows, standing in for the external
/// constraint solver.
pub(crate) fn resolve_rows(data: &mut ArticulationData, rows: &[LimitRow], iterations: usize) {
    let mut applied = vec![0.0; rows.len()];
    for _ in 0..iterations {
        for (row, applied) in rows.iter().zip(applied.iter_mut()) {
            let va = data.velocity(row.parent);
            let vb = data.velocity(row.child);
            let next = row.resolve(*applied, &va, &vb);
            let (impulse_a, impulse_b) = row.impulses(next - *applied);
            data.apply_impulse(row.parent, &impulse_a);
            data.apply_impulse(row.child, &impulse_b);
            *applied = next;
        }
    }
}

/// Spatial momentum about the origin of `velocity` at `data`'s poses.
pub(crate) fn data_momentum(data: &ArticulationData, velocity: &[SpatialVector]) -> SpatialVector {
    data.base_inertia
        .iter()
        .zip(velocity)
        .zip(&data.poses)
        .fold(SpatialVector::zero(), |acc, ((inertia, v), pose)| {
            acc + inertia.mul_vec(v).translate_force(&pose.position.coords)
        })
}
