//! Spherical articulation joints with drives and swing/twist limits.
//!
//! A joint connects a link to its parent through two attachment frames: one
//! fixed in the parent's pose frame, one fixed in the child's. The joint's
//! twist axis is the attachment frame's local X axis; swing is rotation of
//! that axis about local Y and Z.
//!
//! Limit angles are stored as tangents of a quarter angle, `tan(θ/4)`, so the
//! per-step limit test needs no trigonometry. The quarter-angle tangent is
//! monotonic on (-2π, 2π), which covers every meaningful limit.

use nalgebra::{UnitQuaternion, Vector3};

use crate::{Pose, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `tan(angle / 4)`.
#[must_use]
pub fn tan_quarter(angle: f64) -> f64 {
    (angle * 0.25).tan()
}

/// How a drive interprets its target orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DriveType {
    /// Drive toward a target relative orientation.
    ///
    /// The position error is the rotation vector taking the current
    /// child-to-parent orientation onto the target.
    #[default]
    Target,
    /// The target quaternion's imaginary part is used directly as the error.
    ///
    /// Lets a controller feed its own orientation error through the drive.
    Error,
}

/// Implicit PD drive acting on the joint's relative rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointDrive {
    /// Spring stiffness (N·m/rad).
    pub stiffness: f64,
    /// Damping (N·m·s/rad).
    pub damping: f64,
    /// Target orientation of the child frame relative to the parent frame.
    pub target_orientation: UnitQuaternion<f64>,
    /// Target relative angular velocity, in the parent attachment frame.
    pub target_velocity: Vector3<f64>,
    /// Interpretation of `target_orientation`.
    pub drive_type: DriveType,
}

impl Default for JointDrive {
    fn default() -> Self {
        Self::none()
    }
}

impl JointDrive {
    /// A drive with zero gains.
    #[must_use]
    pub fn none() -> Self {
        Self {
            stiffness: 0.0,
            damping: 0.0,
            target_orientation: UnitQuaternion::identity(),
            target_velocity: Vector3::zeros(),
            drive_type: DriveType::Target,
        }
    }

    /// A PD drive with the given gains and an identity target.
    #[must_use]
    pub fn new(stiffness: f64, damping: f64) -> Self {
        Self {
            stiffness,
            damping,
            ..Self::none()
        }
    }

    /// Set the target orientation.
    #[must_use]
    pub fn with_target(mut self, target: UnitQuaternion<f64>) -> Self {
        self.target_orientation = target;
        self
    }

    /// Set the target angular velocity.
    #[must_use]
    pub fn with_target_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.target_velocity = velocity;
        self
    }

    /// Set the drive type.
    #[must_use]
    pub fn with_drive_type(mut self, drive_type: DriveType) -> Self {
        self.drive_type = drive_type;
        self
    }

    /// Whether the drive exerts anything.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stiffness > 0.0 || self.damping > 0.0
    }
}

/// Elliptical swing cone limit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SwingLimit {
    tan_quarter_y: f64,
    tan_quarter_z: f64,
    tan_quarter_pad: f64,
}

impl SwingLimit {
    /// Create a cone with half-angles about the local Y and Z axes.
    #[must_use]
    pub fn new(y_angle: f64, z_angle: f64) -> Self {
        Self {
            tan_quarter_y: tan_quarter(y_angle),
            tan_quarter_z: tan_quarter(z_angle),
            tan_quarter_pad: 0.0,
        }
    }

    /// Circular cone.
    #[must_use]
    pub fn symmetric(angle: f64) -> Self {
        Self::new(angle, angle)
    }

    /// Start emitting the limit row this far inside the cone (radians).
    #[must_use]
    pub fn with_padding(mut self, pad: f64) -> Self {
        self.tan_quarter_pad = tan_quarter(pad);
        self
    }

    /// `tan(y/4)`.
    #[must_use]
    pub fn tan_quarter_y(&self) -> f64 {
        self.tan_quarter_y
    }

    /// `tan(z/4)`.
    #[must_use]
    pub fn tan_quarter_z(&self) -> f64 {
        self.tan_quarter_z
    }

    /// `tan(pad/4)`.
    #[must_use]
    pub fn tan_quarter_pad(&self) -> f64 {
        self.tan_quarter_pad
    }

    fn validate(&self, link: usize) -> crate::Result<()> {
        let max = tan_quarter(std::f64::consts::PI);
        let ok = |t: f64| t.is_finite() && t > 0.0 && t < max;
        if !ok(self.tan_quarter_y) || !ok(self.tan_quarter_z) {
            return Err(SimError::invalid_joint(
                link,
                "swing limit angles must lie in (0, π)",
            ));
        }
        if self.tan_quarter_pad < 0.0
            || self.tan_quarter_pad >= self.tan_quarter_y.min(self.tan_quarter_z)
        {
            return Err(SimError::invalid_joint(
                link,
                "swing padding must be non-negative and smaller than the cone",
            ));
        }
        Ok(())
    }
}

/// Twist limit about the joint's X axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TwistLimit {
    tan_quarter_low: f64,
    tan_quarter_high: f64,
    tan_quarter_pad: f64,
}

impl TwistLimit {
    /// Create a twist range `[low, high]` in radians.
    #[must_use]
    pub fn new(low: f64, high: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            tan_quarter_low: tan_quarter(low),
            tan_quarter_high: tan_quarter(high),
            tan_quarter_pad: 0.0,
        }
    }

    /// Start emitting limit rows this far inside the range (radians).
    #[must_use]
    pub fn with_padding(mut self, pad: f64) -> Self {
        self.tan_quarter_pad = tan_quarter(pad);
        self
    }

    /// `tan(low/4)`.
    #[must_use]
    pub fn tan_quarter_low(&self) -> f64 {
        self.tan_quarter_low
    }

    /// `tan(high/4)`.
    #[must_use]
    pub fn tan_quarter_high(&self) -> f64 {
        self.tan_quarter_high
    }

    /// `tan(pad/4)`.
    #[must_use]
    pub fn tan_quarter_pad(&self) -> f64 {
        self.tan_quarter_pad
    }

    fn validate(&self, link: usize) -> crate::Result<()> {
        let max = tan_quarter(std::f64::consts::PI);
        if !(self.tan_quarter_low > -max && self.tan_quarter_high < max) {
            return Err(SimError::invalid_joint(
                link,
                "twist limits must lie in (-π, π)",
            ));
        }
        if self.tan_quarter_pad < 0.0 || !self.tan_quarter_pad.is_finite() {
            return Err(SimError::invalid_joint(
                link,
                "twist padding must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Damped spring acting tangentially to an active swing limit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TangentialSpring {
    /// Stiffness.
    pub stiffness: f64,
    /// Damping.
    pub damping: f64,
}

impl TangentialSpring {
    /// Whether the spring produces a row.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stiffness > 0.0 || self.damping > 0.0
    }
}

/// Inbound joint of a non-root link.
///
/// # Example
///
/// ```
/// use sim_types::{ArticulationJoint, JointDrive, Pose, SwingLimit, TwistLimit};
/// use nalgebra::Point3;
///
/// let joint = ArticulationJoint::new(
///     Pose::from_position(Point3::new(0.5, 0.0, 0.0)),
///     Pose::from_position(Point3::new(-0.5, 0.0, 0.0)),
/// )
/// .with_drive(JointDrive::new(100.0, 10.0))
/// .with_swing_limit(SwingLimit::symmetric(0.8))
/// .with_twist_limit(TwistLimit::new(-0.5, 0.5));
///
/// assert!(joint.validate(1).is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArticulationJoint {
    /// Attachment frame in the parent link's pose frame.
    pub parent_frame: Pose,
    /// Attachment frame in the child link's pose frame.
    pub child_frame: Pose,
    /// Rotational drive.
    pub drive: JointDrive,
    /// Swing cone, if limited.
    pub swing_limit: Option<SwingLimit>,
    /// Twist range, if limited.
    pub twist_limit: Option<TwistLimit>,
    /// Spring tangential to an active swing limit.
    pub tangential_spring: TangentialSpring,
    /// Compliance of the drive as seen by the articulation itself.
    pub internal_compliance: f64,
    /// Compliance of the drive as seen by external constraints.
    pub external_compliance: f64,
}

impl ArticulationJoint {
    /// Create an unlimited, undriven joint.
    #[must_use]
    pub fn new(parent_frame: Pose, child_frame: Pose) -> Self {
        Self {
            parent_frame,
            child_frame,
            drive: JointDrive::none(),
            swing_limit: None,
            twist_limit: None,
            tangential_spring: TangentialSpring::default(),
            internal_compliance: 1.0,
            external_compliance: 1.0,
        }
    }

    /// Set the drive.
    #[must_use]
    pub fn with_drive(mut self, drive: JointDrive) -> Self {
        self.drive = drive;
        self
    }

    /// Limit swing to a cone.
    #[must_use]
    pub fn with_swing_limit(mut self, limit: SwingLimit) -> Self {
        self.swing_limit = Some(limit);
        self
    }

    /// Limit twist to a range.
    #[must_use]
    pub fn with_twist_limit(mut self, limit: TwistLimit) -> Self {
        self.twist_limit = Some(limit);
        self
    }

    /// Add a tangential spring to the swing limit.
    #[must_use]
    pub fn with_tangential_spring(mut self, stiffness: f64, damping: f64) -> Self {
        self.tangential_spring = TangentialSpring { stiffness, damping };
        self
    }

    /// Set internal and external compliance.
    #[must_use]
    pub fn with_compliance(mut self, internal: f64, external: f64) -> Self {
        self.internal_compliance = internal;
        self.external_compliance = external;
        self
    }

    /// Whether either limit is enabled.
    #[must_use]
    pub fn is_limited(&self) -> bool {
        self.swing_limit.is_some() || self.twist_limit.is_some()
    }

    /// Validate the joint as the inbound joint of `link`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidCompliance`] unless both compliances are
    /// positive and finite, or [`SimError::InvalidJoint`] for negative drive
    /// gains, a malformed limit, or non-finite attachment frames.
    pub fn validate(&self, link: usize) -> crate::Result<()> {
        for compliance in [self.internal_compliance, self.external_compliance] {
            if !compliance.is_finite() || compliance <= 0.0 {
                return Err(SimError::InvalidCompliance(compliance));
            }
        }
        if self.drive.stiffness < 0.0 || self.drive.damping < 0.0 {
            return Err(SimError::invalid_joint(
                link,
                "drive gains must be non-negative",
            ));
        }
        if let Some(limit) = &self.swing_limit {
            limit.validate(link)?;
        }
        if let Some(limit) = &self.twist_limit {
            limit.validate(link)?;
        }
        if !self.parent_frame.is_finite() || !self.child_frame.is_finite() {
            return Err(SimError::invalid_joint(
                link,
                "attachment frames must be finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_tan_quarter_values() {
        assert_relative_eq!(tan_quarter(PI), 1.0, epsilon = 1e-12);
        assert_relative_eq!(tan_quarter(0.0), 0.0);

        let limit = SwingLimit::new(FRAC_PI_2, PI / 3.0).with_padding(0.1);
        assert_relative_eq!(limit.tan_quarter_y(), (PI / 8.0).tan(), epsilon = 1e-12);
        assert_relative_eq!(limit.tan_quarter_z(), (PI / 12.0).tan(), epsilon = 1e-12);
        assert_relative_eq!(limit.tan_quarter_pad(), 0.025_f64.tan(), epsilon = 1e-12);
    }

    #[test]
    fn test_twist_limit_orders_bounds() {
        let limit = TwistLimit::new(0.5, -0.25);
        assert!(limit.tan_quarter_low() < limit.tan_quarter_high());
    }

    #[test]
    fn test_joint_validation() {
        let joint = ArticulationJoint::new(Pose::identity(), Pose::identity());
        assert!(joint.validate(1).is_ok());

        let bad = joint.with_compliance(0.0, 1.0);
        assert_eq!(bad.validate(1), Err(SimError::InvalidCompliance(0.0)));

        let bad = joint.with_swing_limit(SwingLimit::new(0.0, 0.5));
        assert!(bad.validate(1).is_err());

        let bad = joint.with_twist_limit(TwistLimit::new(-4.0, 0.5));
        assert!(bad.validate(1).is_err());

        let bad = joint.with_drive(JointDrive::new(-1.0, 0.0));
        assert!(bad.validate(1).is_err());
    }

    #[test]
    fn test_drive_activity() {
        assert!(!JointDrive::none().is_active());
        assert!(JointDrive::new(0.0, 2.0).is_active());
        assert!(!TangentialSpring::default().is_active());
    }
}
