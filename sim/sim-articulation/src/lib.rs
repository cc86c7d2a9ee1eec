//! Reduced-coordinate articulated rigid-body solver.
//!
//! This crate steps trees of rigid links joined by spherical joints, using
//! the articulated-body (Featherstone) algorithm over 6D spatial algebra.
//! Trees are limited to [`MAX_LINKS`] links so that ancestor and child sets
//! fit in one `u64` bitmask.
//!
//! # Pipeline
//!
//! Each step runs three stages, with an external constraint solver in the
//! middle:
//!
//! 1. [`compute_unconstrained_velocities`]: factor the tree, remove joint
//!    drift from the link velocities, apply implicit PD drives and external
//!    accelerations, and emit [`LimitRow`]s for violated swing/twist limits.
//! 2. The external solver iterates on the rows, applying impulses and reading
//!    velocities through [`ArticulationCallbacks`]. Downward propagation is
//!    deferred behind a dirty bitmask, so each call only touches one root
//!    path. [`save_velocity`] then flushes and records the result.
//! 3. [`update_bodies`]: integrate poses, project out residual joint
//!    separation, and write poses and velocities back to the links.
//!
//! [`ArticulationSolver`] runs all three behind a swappable
//! [`ArticulationBackend`], and [`BatchArticulations`] steps many
//! independent articulations, in parallel with the `parallel` feature.
//!
//! # Joint Model
//!
//! - Three rotational degrees of freedom, with the joint axes world-aligned
//!   at the child attachment point
//! - Connectivity enforced by a separate projector rather than by the
//!   factorization itself
//! - Drives stiffen the joint response for the step via per-joint loads, so
//!   they stay stable at high gain
//! - Limits are quarter-angle-tangent ellipse cones (swing) and ranges
//!   (twist), with optional padding and a tangential spring
//!
//! # Example
//!
//! ```
//! use sim_articulation::{Articulation, ArticulationSolver};
//! use sim_types::{
//!     ArticulationConfig, ArticulationJoint, JointDrive, LinkBody, MassProperties, Point3,
//!     Pose, UnitQuaternion,
//! };
//!
//! let root = LinkBody::new(Pose::identity(), MassProperties::sphere(5.0, 0.2));
//! let mut builder = Articulation::builder(root)
//!     .with_config(ArticulationConfig::default().with_fixed_base(true));
//! builder.add_link(
//!     0,
//!     LinkBody::new(
//!         Pose::from_position(Point3::new(1.0, 0.0, 0.0)),
//!         MassProperties::sphere(1.0, 0.1),
//!     ),
//!     ArticulationJoint::new(
//!         Pose::from_position(Point3::new(0.5, 0.0, 0.0)),
//!         Pose::from_position(Point3::new(-0.5, 0.0, 0.0)),
//!     )
//!     .with_drive(
//!         JointDrive::new(100.0, 10.0)
//!             .with_target(UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5)),
//!     ),
//! );
//! let mut articulation = builder.build().unwrap();
//! let mut data = articulation.create_data();
//! let mut rows = Vec::new();
//!
//! let solver = ArticulationSolver::new();
//! for _ in 0..10 {
//!     solver
//!         .step(&mut articulation, &mut data, 0.01, &mut rows, |_, _| {})
//!         .unwrap();
//! }
//!
//! // The drive swings the child toward +Y.
//! assert!(articulation.body(1).pose.position.y > 0.0);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-articulation/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::many_single_char_names,    // Math notation (d, s, z, q)
    clippy::similar_names,             // va/vb, j0/j1
    clippy::cast_precision_loss,       // Link indices are tiny
    clippy::module_name_repetitions,
)]

pub mod articulation;
pub mod backend;
pub mod batch;
pub mod data;
pub mod drives;
pub mod frames;
pub mod inertia;
pub mod integrate;
pub mod limits;
pub mod pipeline;
pub mod projector;
pub mod propagation;
pub mod spatial;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_support;

pub use articulation::{Articulation, ArticulationBuilder, ArticulationLink};
pub use backend::{ArticulationBackend, ArticulationSolver, ReferenceBackend};
pub use batch::{ArticulationEnv, BatchArticulations};
pub use data::{ArticulationData, DataSizes, data_sizes};
pub use drives::{position_error, spring_factor};
pub use frames::{JointFrames, JointVectors};
pub use inertia::{FsRow, JointAxes};
pub use integrate::{ProjectionReport, max_separation, update_bodies};
pub use limits::{ConeLimit, LimitKind, LimitRow, separate_swing_twist, tan_add, tan_half};
pub use pipeline::{
    compute_unconstrained_velocities, initialize_drive_cache, prepare_data_block, refresh_geometry,
    save_velocity,
};
pub use projector::{LoopProjector, LtbRow};
pub use propagation::{ArticulationCallbacks, propagate_impulse, propagate_velocity};
pub use spatial::{SpatialInertia, SpatialVector};
pub use topology::{BitIter, MAX_LINKS, Topology};

// Re-export the data model for convenience
pub use sim_types::{
    ArticulationConfig, ArticulationJoint, JointDrive, LinkBody, Pose, SimError, Twist,
};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use sim_types::Vector3;

    #[test]
    fn test_step_through_callbacks() {
        let mut articulation =
            test_support::chain_articulation(3, ArticulationConfig::default());
        let mut data = articulation.create_data();
        let mut rows = Vec::new();
        let solver = ArticulationSolver::new();

        // An external contact pushes the tip sideways mid-step.
        let report = solver
            .step(&mut articulation, &mut data, 0.01, &mut rows, |data, _| {
                let callbacks: &mut dyn ArticulationCallbacks = data;
                callbacks.apply_impulse(2, &SpatialVector::linear(Vector3::y()));
                callbacks.flush();
            })
            .unwrap();

        assert!(report.max_separation.is_finite());
        assert!(articulation.body(2).twist.linear.y > 0.0);
        // Momentum of the free chain equals the applied impulse.
        let momentum = articulation.momentum();
        assert!((momentum.linear - Vector3::y()).norm() < 1e-9);
    }
}
