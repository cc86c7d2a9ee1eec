//! Implicit PD joint drives.
//!
//! A drive is applied as a joint-space impulse computed from the current
//! orientation and velocity error, scaled by the joint's load so that the
//! response is stable at any stiffness:
//!
//! ```text
//! Q = L · (k·θ_err + c·ω_err) · dt / compliance
//! ```
//!
//! The same load, multiplied by the spring factor, is added to the joint's
//! response matrix during factorization, which makes the drive implicit.

use nalgebra::Vector3;
use sim_types::{ArticulationJoint, DriveType};

use crate::articulation::Articulation;
use crate::data::ArticulationData;

/// `(1 + c·dt + k·dt²) / compliance`.
#[must_use]
pub fn spring_factor(stiffness: f64, damping: f64, dt: f64, compliance: f64) -> f64 {
    (1.0 + damping * dt + stiffness * dt * dt) / compliance
}

/// Fill internal and external spring factors for every joint.
pub(crate) fn compute_spring_factors(
    articulation: &Articulation,
    dt: f64,
    internal: &mut [f64],
    external: &mut [f64],
) {
    internal[0] = 0.0;
    external[0] = 0.0;
    for (i, joint) in articulation.joints() {
        let k = joint.drive.stiffness;
        let c = joint.drive.damping;
        internal[i] = spring_factor(k, c, dt, joint.internal_compliance);
        external[i] = spring_factor(k, c, dt, joint.external_compliance);
    }
}

/// Orientation error of a joint as a world-frame rotation vector.
#[must_use]
pub fn position_error(joint: &ArticulationJoint, data: &ArticulationData, link: usize) -> Vector3<f64> {
    let frames = &data.frames[link];
    let local = match joint.drive.drive_type {
        // The rotation that carries the current relative orientation onto
        // the target.
        DriveType::Target => {
            (joint.drive.target_orientation * frames.c_b2c_a.rotation.inverse()).scaled_axis()
        }
        DriveType::Error => joint.drive.target_orientation.imag(),
    };
    frames.c_a2w.rotation * local
}

/// Joint-space drive impulses from the current state and internal loads.
pub(crate) fn compute_joint_drives(
    articulation: &Articulation,
    data: &ArticulationData,
    dt: f64,
    drives: &mut [Vector3<f64>],
) {
    drives[0] = Vector3::zeros();
    for (i, joint) in articulation.joints() {
        if !joint.drive.is_active() {
            drives[i] = Vector3::zeros();
            continue;
        }

        let parent = data.topology.parent_of(i);
        let relative = data.velocity[i].angular - data.velocity[parent].angular;
        let frames = &data.frames[i];

        let pos_error = position_error(joint, data, i);
        let vel_error = frames.c_a2w.rotation * joint.drive.target_velocity - relative;

        let drive = joint.drive.stiffness * pos_error + joint.drive.damping * vel_error;
        drives[i] = data.internal_loads[i] * drive * (dt / joint.internal_compliance);
    }
}
