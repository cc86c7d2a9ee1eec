//! World-space joint attachment frames and offset vectors.

use nalgebra::Vector3;
use sim_types::{ArticulationJoint, Pose};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Attachment frames of one joint at the current poses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointFrames {
    /// Parent attachment frame in world coordinates.
    pub c_a2w: Pose,
    /// Child attachment frame in world coordinates.
    pub c_b2w: Pose,
    /// Child attachment frame relative to the parent attachment frame.
    ///
    /// Its rotation always has a non-negative scalar part.
    pub c_b2c_a: Pose,
}

impl JointFrames {
    /// Compute frames from the two link poses.
    #[must_use]
    pub fn compute(parent_pose: &Pose, child_pose: &Pose, joint: &ArticulationJoint) -> Self {
        let c_a2w = parent_pose.compose(&joint.parent_frame);
        let mut c_b2w = child_pose.compose(&joint.child_frame);
        let mut c_b2c_a = c_a2w.relative(&c_b2w);

        // Swing/twist decomposition needs the short way round.
        if c_b2c_a.rotation.w < 0.0 {
            c_b2c_a.rotation = negate(&c_b2c_a.rotation);
            c_b2w.rotation = negate(&c_b2w.rotation);
        }

        Self {
            c_a2w,
            c_b2w,
            c_b2c_a,
        }
    }

    /// Distance between the two attachment points.
    #[must_use]
    pub fn separation(&self) -> f64 {
        (self.c_a2w.position - self.c_b2w.position).norm()
    }
}

fn negate(q: &nalgebra::UnitQuaternion<f64>) -> nalgebra::UnitQuaternion<f64> {
    nalgebra::UnitQuaternion::new_unchecked(-q.into_inner())
}

/// Offsets used to move quantities across a joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointVectors {
    /// Child center of mass minus parent center of mass.
    pub parent_offset: Vector3<f64>,
    /// Joint point (child attachment) minus child center of mass.
    pub joint_offset: Vector3<f64>,
}

impl Default for JointVectors {
    fn default() -> Self {
        Self {
            parent_offset: Vector3::zeros(),
            joint_offset: Vector3::zeros(),
        }
    }
}

impl JointVectors {
    /// Offsets for a link at `child_pose` under `parent_pose`.
    #[must_use]
    pub fn compute(parent_pose: &Pose, child_pose: &Pose, frames: &JointFrames) -> Self {
        Self {
            parent_offset: child_pose.position - parent_pose.position,
            joint_offset: frames.c_b2w.position - child_pose.position,
        }
    }
}
