//! Per-step solver stages.
//!
//! A step runs in three calls:
//!
//! 1. [`compute_unconstrained_velocities`] reads the links, factors the
//!    tree, applies drives and external accelerations, and emits limit rows.
//! 2. The external constraint solver iterates on those rows through
//!    [`ArticulationCallbacks`](crate::ArticulationCallbacks), then calls
//!    [`save_velocity`].
//! 3. [`update_bodies`](crate::integrate::update_bodies) integrates the
//!    poses and writes them back.

use nalgebra::Vector3;
use sim_types::{Result, SimError};

use crate::articulation::Articulation;
use crate::data::ArticulationData;
use crate::drives::{compute_joint_drives, compute_spring_factors};
use crate::frames::{JointFrames, JointVectors};
use crate::inertia::{compute_joint_loads, joint_axes, propagate_driven_inertia};
use crate::limits::{LimitRow, setup_limit_rows};
use crate::spatial::{SpatialInertia, SpatialVector};
use crate::topology::MAX_LINKS;

/// Copy poses and velocities out of the links and reset deferred state.
pub fn prepare_data_block(articulation: &Articulation, data: &mut ArticulationData) {
    debug_assert!(data.check_topology(articulation.topology()).is_ok());
    data.fixed_base = articulation.config().fixed_base;

    for (i, link) in articulation.links().iter().enumerate() {
        data.poses[i] = link.body.pose;
        data.velocity[i] = SpatialVector::from(link.body.twist);
    }
    if data.fixed_base {
        data.velocity[0] = SpatialVector::zero();
    }
    data.deferred.fill(SpatialVector::zero());
    data.dirty = 0;

    refresh_geometry(articulation, data);
}

/// Recompute world inertias, joint frames and joint axes at `data`'s poses.
pub fn refresh_geometry(articulation: &Articulation, data: &mut ArticulationData) {
    for (i, link) in articulation.links().iter().enumerate() {
        let pose = &data.poses[i];
        data.base_inertia[i] = SpatialInertia::from_body(
            link.body.mass.mass,
            link.body.mass.world_inertia(&pose.rotation),
        );
    }

    for (i, joint) in articulation.joints() {
        let parent = data.topology.parent_of(i);
        let (parent_pose, child_pose) = (&data.poses[parent], &data.poses[i]);
        let frames = JointFrames::compute(parent_pose, child_pose, joint);
        let vectors = JointVectors::compute(parent_pose, child_pose, &frames);
        data.frames[i] = frames;
        data.axes[i] = joint_axes(&vectors.joint_offset);
        data.joint_vectors[i] = vectors;
    }
}

/// Rebuild and factor the projector at the current poses.
pub(crate) fn setup_projector(data: &mut ArticulationData, recip_dt: f64) {
    let ArticulationData {
        topology,
        fixed_base,
        projector,
        poses,
        frames,
        base_inertia,
        ..
    } = data;
    projector.prepare(topology, base_inertia, poses, frames, recip_dt);
    projector.factor(topology, *fixed_base);
}

/// Remove the relative joint velocity from the stored velocities.
///
/// With `with_bias` the projection also closes the current joint drift.
pub(crate) fn project_velocity(data: &mut ArticulationData, with_bias: bool) {
    let ArticulationData {
        topology,
        projector,
        velocity,
        ..
    } = data;
    let mut b = [Vector3::zeros(); MAX_LINKS];
    projector.compute_jv(topology, velocity, &mut b);
    if with_bias {
        projector.add_bias(topology, &mut b);
    }
    projector.project(topology, velocity, &mut b);
}

/// Solve the tree for the step's unconstrained velocities.
///
/// Afterwards `rows` holds the active limit rows, the stored velocity holds
/// the drive and external-acceleration response, and the motion velocity is
/// set from it in case no constraint solver runs.
pub fn compute_unconstrained_velocities(
    articulation: &Articulation,
    data: &mut ArticulationData,
    dt: f64,
    rows: &mut Vec<LimitRow>,
) {
    let config = articulation.config();
    let n = data.link_count();

    prepare_data_block(articulation, data);
    setup_projector(data, 1.0 / dt);
    project_velocity(data, true);
    debug_assert!(data.velocity.iter().all(SpatialVector::is_finite));
    tracing::trace!(links = n, "joint drift projected");

    if !config.persist_internal_loads {
        data.internal_loads.fill(nalgebra::Matrix3::zeros());
    }
    if !config.persist_external_loads {
        data.external_loads.fill(nalgebra::Matrix3::zeros());
    }
    compute_spring_factors(
        articulation,
        dt,
        &mut data.internal_spring_factors,
        &mut data.external_spring_factors,
    );

    {
        let ArticulationData {
            topology,
            axes,
            joint_vectors,
            base_inertia,
            inertia,
            contrib,
            internal_loads,
            external_loads,
            internal_spring_factors,
            external_spring_factors,
            ..
        } = &mut *data;
        compute_joint_loads(
            topology,
            base_inertia,
            axes,
            joint_vectors,
            internal_spring_factors,
            internal_loads,
            config.internal_drive_iterations,
            (inertia.as_mut_slice(), contrib.as_mut_slice()),
        );
        compute_joint_loads(
            topology,
            base_inertia,
            axes,
            joint_vectors,
            external_spring_factors,
            external_loads,
            config.external_drive_iterations,
            (inertia.as_mut_slice(), contrib.as_mut_slice()),
        );
    }

    factor(data, false);
    let mut q = [Vector3::zeros(); MAX_LINKS];
    compute_joint_drives(articulation, data, dt, &mut q[..n]);
    let z = [SpatialVector::zero(); MAX_LINKS];
    data.apply_impulses(&z[..n], &q[..n]);
    factor(data, true);
    tracing::trace!("drives applied");

    // External accelerations, as the negated impulse -I·a·dt.
    let mut z = [SpatialVector::zero(); MAX_LINKS];
    for (i, link) in articulation.links().iter().enumerate() {
        let a = SpatialVector::from(link.body.acceleration);
        z[i] = -(data.base_inertia[i].mul_vec(&a) * dt);
    }
    let q = [Vector3::zeros(); MAX_LINKS];
    data.apply_impulses(&z[..n], &q[..n]);

    data.motion_velocity.copy_from_slice(&data.velocity);
    data.dirty = 0;

    setup_limit_rows(articulation, data, dt, rows);
}

/// Factor with the internal or external loads, filling the rows and the
/// root inverse inertia.
fn factor(data: &mut ArticulationData, external: bool) {
    let ArticulationData {
        topology,
        fixed_base,
        axes,
        joint_vectors,
        rows,
        base_inertia,
        inertia,
        internal_loads,
        external_loads,
        internal_spring_factors,
        external_spring_factors,
        root_inverse_inertia,
        ..
    } = data;
    let (spring_factors, loads) = if external {
        (&*external_spring_factors, &*external_loads)
    } else {
        (&*internal_spring_factors, &*internal_loads)
    };
    *root_inverse_inertia = propagate_driven_inertia(
        topology,
        base_inertia,
        axes,
        joint_vectors,
        spring_factors,
        loads,
        *fixed_base,
        rows,
        inertia,
    );
}

/// Record the solved velocity for integration, then strip the velocity
/// bias so the stored velocity only carries the unbiased joint motion.
pub fn save_velocity(data: &mut ArticulationData) {
    data.flush();
    data.motion_velocity.copy_from_slice(&data.velocity);
    project_velocity(data, false);
}

/// Seed the drive loads from the current pose with a uniform compliance.
///
/// Both load caches are filled and the tree is refactored with them, so an
/// articulation with persistent loads starts its first step warm.
///
/// # Errors
///
/// Returns [`SimError::InvalidCompliance`] unless `compliance` is positive
/// and finite, or [`SimError::LinkCountMismatch`] or
/// [`SimError::TopologyMismatch`] if `data` belongs to a different tree.
pub fn initialize_drive_cache(
    articulation: &Articulation,
    data: &mut ArticulationData,
    compliance: f64,
    iterations: u32,
) -> Result<()> {
    if !compliance.is_finite() || compliance <= 0.0 {
        return Err(SimError::InvalidCompliance(compliance));
    }
    data.check_topology(articulation.topology())?;

    prepare_data_block(articulation, data);
    let resistance = 1.0 / compliance;
    data.internal_spring_factors.fill(resistance);
    data.internal_spring_factors[0] = 0.0;
    data.internal_loads.fill(nalgebra::Matrix3::zeros());

    {
        let ArticulationData {
            topology,
            axes,
            joint_vectors,
            base_inertia,
            inertia,
            contrib,
            internal_loads,
            internal_spring_factors,
            ..
        } = &mut *data;
        compute_joint_loads(
            topology,
            base_inertia,
            axes,
            joint_vectors,
            internal_spring_factors,
            internal_loads,
            iterations,
            (inertia.as_mut_slice(), contrib.as_mut_slice()),
        );
    }
    data.external_loads.copy_from_slice(&data.internal_loads);
    data.external_spring_factors
        .copy_from_slice(&data.internal_spring_factors);
    factor(data, false);

    tracing::debug!(compliance, iterations, "drive cache initialized");
    Ok(())
}
