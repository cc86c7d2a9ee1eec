//! Rigid link state types.
//!
//! Poses are center-of-mass frames: the link's principal inertia axes are
//! aligned with the pose rotation. Velocities are expressed in world
//! coordinates at the center of mass.

use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position and orientation of a link's center-of-mass frame.
///
/// # Example
///
/// ```
/// use sim_types::Pose;
/// use nalgebra::Point3;
///
/// let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
/// let world = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert_eq!(world, Point3::new(2.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn from_position_rotation(
        position: Point3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self { position, rotation }
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Compute the inverse pose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self {
            position: Point3::from(-(inv_rotation * self.position.coords)),
            rotation: inv_rotation,
        }
    }

    /// Compose two poses: `self * other`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            position: self.transform_point(&other.position),
            rotation: self.rotation * other.rotation,
        }
    }

    /// Express `other` in this pose's frame: `self⁻¹ * other`.
    #[must_use]
    pub fn relative(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// Advance the pose by a world-frame twist over `dt`.
    ///
    /// ```text
    /// p' = p + v * dt
    /// q' = exp(ω * dt) * q
    /// ```
    #[must_use]
    pub fn integrate(&self, twist: &Twist, dt: f64) -> Self {
        Self {
            position: self.position + twist.linear * dt,
            rotation: UnitQuaternion::from_scaled_axis(twist.angular * dt) * self.rotation,
        }
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.rotation.coords.iter().all(|x| x.is_finite())
    }
}

/// Linear and angular velocity of a link, in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Twist {
    /// Linear velocity of the center of mass (m/s).
    pub linear: Vector3<f64>,
    /// Angular velocity (rad/s).
    pub angular: Vector3<f64>,
}

impl Default for Twist {
    fn default() -> Self {
        Self::zero()
    }
}

impl Twist {
    /// Create a twist with specified linear and angular velocity.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// Create a zero twist (at rest).
    #[must_use]
    pub fn zero() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }

    /// Create a twist with linear velocity only.
    #[must_use]
    pub fn linear(v: Vector3<f64>) -> Self {
        Self {
            linear: v,
            angular: Vector3::zeros(),
        }
    }

    /// Create a twist with angular velocity only.
    #[must_use]
    pub fn angular(omega: Vector3<f64>) -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: omega,
        }
    }

    /// The constant twist that carries `from` onto `to` in `dt` seconds.
    ///
    /// Inverse of [`Pose::integrate`] for rotations below half a turn.
    #[must_use]
    pub fn between(from: &Pose, to: &Pose, dt: f64) -> Self {
        let recip_dt = 1.0 / dt;
        let delta = to.rotation * from.rotation.inverse();
        Self {
            linear: (to.position - from.position) * recip_dt,
            angular: delta.scaled_axis() * recip_dt,
        }
    }

    /// Check if the twist contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|x| x.is_finite()) && self.angular.iter().all(|x| x.is_finite())
    }
}

/// Mass properties of a link about its center of mass.
///
/// The inertia is diagonal in the link's pose frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg.
    pub mass: f64,
    /// Principal moments of inertia in the pose frame (kg·m²).
    pub principal_inertia: Vector3<f64>,
}

impl MassProperties {
    /// Create mass properties from mass and principal moments.
    #[must_use]
    pub const fn new(mass: f64, principal_inertia: Vector3<f64>) -> Self {
        Self {
            mass,
            principal_inertia,
        }
    }

    /// Uniform solid sphere: I = (2/5) m r².
    #[must_use]
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self::new(mass, Vector3::new(i, i, i))
    }

    /// Uniform solid box with the given half extents.
    #[must_use]
    pub fn box_shape(mass: f64, half_extents: Vector3<f64>) -> Self {
        let x2 = 4.0 * half_extents.x * half_extents.x;
        let y2 = 4.0 * half_extents.y * half_extents.y;
        let z2 = 4.0 * half_extents.z * half_extents.z;
        Self::new(
            mass,
            Vector3::new(
                mass * (y2 + z2) / 12.0,
                mass * (x2 + z2) / 12.0,
                mass * (x2 + y2) / 12.0,
            ),
        )
    }

    /// Rotate the principal inertia into world coordinates.
    ///
    /// The result is explicitly symmetrized.
    #[must_use]
    pub fn world_inertia(&self, rotation: &UnitQuaternion<f64>) -> Matrix3<f64> {
        let r = rotation.to_rotation_matrix();
        let m = r.matrix() * Matrix3::from_diagonal(&self.principal_inertia) * r.matrix().transpose();
        (m + m.transpose()) * 0.5
    }

    /// Validate mass properties.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidMassProperties`](crate::SimError::InvalidMassProperties)
    /// unless the mass and every principal inertia are positive and finite.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.mass.is_finite() || self.mass <= 0.0 {
            return Err(crate::SimError::invalid_mass(format!(
                "mass must be positive and finite, got {}",
                self.mass
            )));
        }
        if self
            .principal_inertia
            .iter()
            .any(|i| !i.is_finite() || *i <= 0.0)
        {
            return Err(crate::SimError::invalid_mass(
                "principal inertia must be positive and finite",
            ));
        }
        Ok(())
    }
}

/// A link's rigid-body state as owned by the host simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkBody {
    /// Center-of-mass pose.
    pub pose: Pose,
    /// Current velocity.
    pub twist: Twist,
    /// External acceleration applied each step (gravity etc).
    pub acceleration: Twist,
    /// Mass and principal inertia.
    pub mass: MassProperties,
}

impl LinkBody {
    /// Create a link at rest.
    #[must_use]
    pub fn new(pose: Pose, mass: MassProperties) -> Self {
        Self {
            pose,
            twist: Twist::zero(),
            acceleration: Twist::zero(),
            mass,
        }
    }

    /// Set the initial velocity.
    #[must_use]
    pub fn with_twist(mut self, twist: Twist) -> Self {
        self.twist = twist;
        self
    }

    /// Set the external acceleration.
    #[must_use]
    pub fn with_acceleration(mut self, acceleration: Twist) -> Self {
        self.acceleration = acceleration;
        self
    }
}
