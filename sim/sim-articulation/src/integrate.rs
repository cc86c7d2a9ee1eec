//! Pose integration and joint-separation projection.
//!
//! Poses are advanced with the motion velocity saved during the step. Since
//! joints are only enforced at the velocity level, integration leaves some
//! separation at the joint points. While the largest separation exceeds the
//! configured tolerance, the projector is refactored at the new poses and
//! solved for the velocity that closes the gaps over one step, and the
//! poses are integrated again with it.

use sim_types::{Pose, Twist};

use crate::articulation::Articulation;
use crate::data::ArticulationData;
use crate::pipeline::{project_velocity, refresh_geometry, setup_projector};
use crate::spatial::SpatialVector;
use crate::topology::MAX_LINKS;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Residual separation above this multiple of the tolerance is reported.
const SEPARATION_WARN_FACTOR: f64 = 10.0;

/// Outcome of the position projection in [`update_bodies`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProjectionReport {
    /// Projection passes run.
    pub iterations: u32,
    /// Largest joint separation after the last pass.
    pub max_separation: f64,
    /// Whether any pass moved the poses.
    pub projected: bool,
}

/// Largest distance between a joint's two attachment points at `poses`.
///
/// Zero for an articulation without joints.
#[must_use]
pub fn max_separation(articulation: &Articulation, poses: &[Pose]) -> f64 {
    articulation
        .joints()
        .map(|(i, joint)| {
            let parent = articulation.topology().parent_of(i);
            let a = poses[parent].compose(&joint.parent_frame).position;
            let b = poses[i].compose(&joint.child_frame).position;
            (a - b).norm()
        })
        .fold(0.0, f64::max)
}

fn integrate_poses(poses: &mut [Pose], velocity: &[SpatialVector], dt: f64) {
    for (pose, v) in poses.iter_mut().zip(velocity) {
        *pose = pose.integrate(&Twist::from(*v), dt);
    }
}

/// Integrate the poses, project out joint separation and write the links.
///
/// Each link receives its new pose and the unbiased solved velocity. The
/// velocity that actually moved it stays available through
/// [`ArticulationData::motion_velocity`].
pub fn update_bodies(
    articulation: &mut Articulation,
    data: &mut ArticulationData,
    dt: f64,
) -> ProjectionReport {
    let n = data.link_count();
    let config = articulation.config().clone();

    data.flush();
    project_velocity(data, false);

    data.old_poses.copy_from_slice(&data.poses);
    debug_assert!(data.motion_velocity.iter().all(SpatialVector::is_finite));
    integrate_poses(&mut data.poses, &data.motion_velocity, dt);

    let recip_dt = 1.0 / dt;
    let mut report = ProjectionReport::default();
    loop {
        report.max_separation = max_separation(articulation, &data.poses);
        if report.max_separation <= config.separation_tolerance
            || report.iterations >= config.max_projection_iterations
        {
            break;
        }
        report.iterations += 1;
        report.projected = true;

        refresh_geometry(articulation, data);
        setup_projector(data, recip_dt);

        let ArticulationData {
            topology,
            projector,
            motion_velocity,
            ..
        } = &mut *data;
        let mut b = [nalgebra::Vector3::zeros(); MAX_LINKS];
        projector.bias(topology, &mut b);
        motion_velocity.fill(SpatialVector::zero());
        projector.project(topology, motion_velocity, &mut b);

        debug_assert!(data.motion_velocity.iter().all(SpatialVector::is_finite));
        integrate_poses(&mut data.poses, &data.motion_velocity, dt);
    }

    if report.projected {
        for i in 0..n {
            data.motion_velocity[i] =
                SpatialVector::from(Twist::between(&data.old_poses[i], &data.poses[i], dt));
        }
        tracing::debug!(
            iterations = report.iterations,
            separation = report.max_separation,
            "joint separation projected"
        );
    }

    if report.max_separation > SEPARATION_WARN_FACTOR * config.separation_tolerance {
        tracing::warn!(
            separation = report.max_separation,
            tolerance = config.separation_tolerance,
            iterations = report.iterations,
            "articulation joints still separated after projection"
        );
    }

    for i in 0..n {
        let body = articulation.body_mut(i);
        body.pose = data.poses[i];
        body.twist = Twist::from(data.velocity[i]);
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::pipeline::{compute_unconstrained_velocities, save_velocity};
    use crate::test_support;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};
    use sim_types::{ArticulationConfig, JointDrive};

    #[test]
    fn test_single_link_has_no_separation() {
        let articulation = test_support::chain_articulation(1, ArticulationConfig::default());
        let poses = [articulation.body(0).pose];
        assert_eq!(max_separation(&articulation, &poses), 0.0);
    }

    #[test]
    fn test_pose_velocity_consistency() {
        let mut articulation = test_support::chain_articulation(3, ArticulationConfig::default());
        test_support::spin_chain(&mut articulation);
        let old: Vec<_> = articulation.links().iter().map(|l| l.body.pose).collect();

        let mut data = articulation.create_data();
        let mut rows = vec![];
        let dt = 0.001;
        compute_unconstrained_velocities(&articulation, &mut data, dt, &mut rows);
        save_velocity(&mut data);
        let report = update_bodies(&mut articulation, &mut data, dt);

        assert!(!report.projected);
        assert!(report.max_separation <= articulation.config().separation_tolerance);
        for (i, old) in old.iter().enumerate() {
            let new = articulation.body(i).pose;
            let v = data.motion_velocity(i);
            assert_relative_eq!(
                (new.position - old.position) / dt,
                v.linear,
                epsilon = 1e-9
            );
            let expected = UnitQuaternion::from_scaled_axis(v.angular * dt) * old.rotation;
            assert_relative_eq!(new.rotation.coords, expected.coords, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_projection_closes_separation() {
        let config = ArticulationConfig::default().with_projection(8, 1e-6);
        let mut articulation = test_support::chain_articulation(4, config);
        // Pull link 2 off its joints.
        articulation.body_mut(2).pose.position += Vector3::new(0.05, -0.03, 0.02);
        let initial = {
            let poses: Vec<_> = articulation.links().iter().map(|l| l.body.pose).collect();
            max_separation(&articulation, &poses)
        };

        let mut data = articulation.create_data();
        let mut rows = vec![];
        let dt = 0.01;
        compute_unconstrained_velocities(&articulation, &mut data, dt, &mut rows);
        save_velocity(&mut data);
        let report = update_bodies(&mut articulation, &mut data, dt);

        assert!(report.projected);
        assert!(report.iterations >= 1);
        assert!(report.max_separation < 0.01 * initial);
    }

    #[test]
    fn test_projection_respects_iteration_cap() {
        let config = ArticulationConfig::default().with_projection(0, 0.0);
        let mut articulation = test_support::chain_articulation(3, config);
        articulation.body_mut(1).pose.position += Vector3::new(0.2, 0.0, 0.0);

        let mut data = articulation.create_data();
        let mut rows = vec![];
        compute_unconstrained_velocities(&articulation, &mut data, 0.01, &mut rows);
        save_velocity(&mut data);
        let report = update_bodies(&mut articulation, &mut data, 0.01);

        assert_eq!(report.iterations, 0);
        assert!(!report.projected);
        assert!(report.max_separation > 0.0);
    }

    #[test]
    fn test_projected_motion_velocity_matches_pose_change() {
        let config = ArticulationConfig::default().with_projection(4, 1e-6);
        let mut articulation = test_support::chain_articulation(3, config);
        articulation.body_mut(1).pose.position += Vector3::new(0.0, 0.04, 0.0);
        let old: Vec<_> = articulation.links().iter().map(|l| l.body.pose).collect();

        let mut data = articulation.create_data();
        let mut rows = vec![];
        let dt = 0.01;
        compute_unconstrained_velocities(&articulation, &mut data, dt, &mut rows);
        save_velocity(&mut data);
        let report = update_bodies(&mut articulation, &mut data, dt);
        assert!(report.projected);

        for (i, old) in old.iter().enumerate() {
            let new = articulation.body(i).pose;
            assert_relative_eq!(
                data.motion_velocity(i).linear,
                (new.position - old.position) / dt,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_fixed_root_stays_put() {
        let drive = JointDrive::new(500.0, 10.0)
            .with_target(UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5));
        let (mut articulation, mut data) = test_support::prepared_pendulum(drive);
        let root = articulation.body(0).pose;
        save_velocity(&mut data);
        update_bodies(&mut articulation, &mut data, 0.01);

        assert_eq!(articulation.body(0).pose, root);
        assert_eq!(articulation.body(0).twist, Twist::zero());
        assert!(articulation.body(1).twist.angular.z > 0.0);
    }
}
