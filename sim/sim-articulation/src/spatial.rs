//! Spatial algebra for 6D velocities, impulses, and inertias.
//!
//! Spatial vectors are stored as a `(linear, angular)` pair of 3-vectors and
//! always refer to a specific reference point (usually a link's center of
//! mass). Spatial inertias are stored as three 3×3 blocks of the symmetric
//! 6×6 operator:
//!
//! ```text
//! I = [ ll   la ]      momentum = ( ll·v + la·ω ,
//!     [ laᵀ  aa ]                   laᵀ·v + aa·ω )
//! ```
//!
//! Everything here is pure arithmetic with no failure modes, except for
//! [`SpatialInertia::invert`], which degrades to zero on singular input.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use nalgebra::{Matrix3, Matrix6, Vector3};
use sim_types::Twist;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Skew-symmetric cross-product matrix: `skew(a) * b == a × b`.
#[allow(clippy::inline_always)] // Hot in every inertia translation
#[inline(always)]
#[must_use]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// A 6D velocity, impulse, or force.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialVector {
    /// Linear part (velocity or force).
    pub linear: Vector3<f64>,
    /// Angular part (angular velocity or torque).
    pub angular: Vector3<f64>,
}

impl Default for SpatialVector {
    fn default() -> Self {
        Self::zero()
    }
}

impl SpatialVector {
    /// Create from linear and angular parts.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// The zero vector.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Pure angular vector.
    #[must_use]
    pub fn angular(angular: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), angular)
    }

    /// Pure linear vector.
    #[must_use]
    pub fn linear(linear: Vector3<f64>) -> Self {
        Self::new(linear, Vector3::zeros())
    }

    /// Dot product `a.linear·b.linear + a.angular·b.angular`.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.linear.dot(&other.linear) + self.angular.dot(&other.angular)
    }

    /// Re-express a force at a reference point `offset` behind the current one.
    ///
    /// With `offset = p_child - p_parent` this moves a force from the child's
    /// reference point to the parent's: the torque picks up `offset × force`.
    #[must_use]
    pub fn translate_force(&self, offset: &Vector3<f64>) -> Self {
        Self::new(self.linear, self.angular + offset.cross(&self.linear))
    }

    /// Re-express a motion at a reference point `offset` behind the current one.
    ///
    /// The point velocity changes by `offset × ω`. Moving a parent velocity
    /// to its child uses `-parent_offset`.
    #[must_use]
    pub fn translate_motion(&self, offset: &Vector3<f64>) -> Self {
        Self::new(self.linear + offset.cross(&self.angular), self.angular)
    }

    /// Check for `NaN` or `Inf`.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|x| x.is_finite()) && self.angular.iter().all(|x| x.is_finite())
    }

    /// Largest absolute component.
    #[must_use]
    pub fn max_abs(&self) -> f64 {
        self.linear.amax().max(self.angular.amax())
    }
}

impl From<Twist> for SpatialVector {
    fn from(twist: Twist) -> Self {
        Self::new(twist.linear, twist.angular)
    }
}

impl From<SpatialVector> for Twist {
    fn from(v: SpatialVector) -> Self {
        Self::new(v.linear, v.angular)
    }
}

impl Add for SpatialVector {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.linear + rhs.linear, self.angular + rhs.angular)
    }
}

impl Sub for SpatialVector {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.linear - rhs.linear, self.angular - rhs.angular)
    }
}

impl Neg for SpatialVector {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.linear, -self.angular)
    }
}

impl Mul<f64> for SpatialVector {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.linear * rhs, self.angular * rhs)
    }
}

impl AddAssign for SpatialVector {
    fn add_assign(&mut self, rhs: Self) {
        self.linear += rhs.linear;
        self.angular += rhs.angular;
    }
}

impl SubAssign for SpatialVector {
    fn sub_assign(&mut self, rhs: Self) {
        self.linear -= rhs.linear;
        self.angular -= rhs.angular;
    }
}

/// Symmetric 6×6 spatial inertia in block form.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialInertia {
    /// Linear-linear block.
    pub ll: Matrix3<f64>,
    /// Linear-angular coupling block.
    pub la: Matrix3<f64>,
    /// Angular-angular block.
    pub aa: Matrix3<f64>,
}

impl Default for SpatialInertia {
    fn default() -> Self {
        Self::zero()
    }
}

impl SpatialInertia {
    /// The zero inertia.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            ll: Matrix3::zeros(),
            la: Matrix3::zeros(),
            aa: Matrix3::zeros(),
        }
    }

    /// Rigid body about its center of mass.
    #[must_use]
    pub fn from_body(mass: f64, world_inertia: Matrix3<f64>) -> Self {
        Self {
            ll: Matrix3::from_diagonal_element(mass),
            la: Matrix3::zeros(),
            aa: world_inertia,
        }
    }

    /// Apply to a spatial vector.
    #[must_use]
    pub fn mul_vec(&self, v: &SpatialVector) -> SpatialVector {
        SpatialVector::new(
            self.ll * v.linear + self.la * v.angular,
            self.la.transpose() * v.linear + self.aa * v.angular,
        )
    }

    /// Re-express about a reference point `offset` behind the current one.
    ///
    /// With `offset = p_child - p_parent` this moves a child's articulated
    /// inertia onto its parent's center of mass.
    #[must_use]
    pub fn translate(&self, offset: &Vector3<f64>) -> Self {
        let d = skew(offset);
        let ll_d = self.ll * d;
        Self {
            ll: self.ll,
            la: self.la - ll_d,
            aa: self.aa - self.la.transpose() * d + d * self.la - d * ll_d,
        }
    }

    /// Subtract the outer product `a ⊗ b` from the operator.
    pub(crate) fn sub_outer(&mut self, a: &SpatialVector, b: &SpatialVector) {
        self.ll -= a.linear * b.linear.transpose();
        self.la -= a.linear * b.angular.transpose();
        self.aa -= a.angular * b.angular.transpose();
    }

    /// Add the outer product `a ⊗ b` to the operator.
    pub(crate) fn add_outer(&mut self, a: &SpatialVector, b: &SpatialVector) {
        self.ll += a.linear * b.linear.transpose();
        self.la += a.linear * b.angular.transpose();
        self.aa += a.angular * b.angular.transpose();
    }

    /// Dense 6×6 form, linear rows first.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix6<f64> {
        let mut m = Matrix6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.ll);
        m.fixed_view_mut::<3, 3>(0, 3).copy_from(&self.la);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&self.la.transpose());
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.aa);
        m
    }

    /// Block form of a symmetric 6×6 matrix.
    #[must_use]
    pub fn from_matrix(m: &Matrix6<f64>) -> Self {
        Self {
            ll: m.fixed_view::<3, 3>(0, 0).into_owned(),
            la: m.fixed_view::<3, 3>(0, 3).into_owned(),
            aa: m.fixed_view::<3, 3>(3, 3).into_owned(),
        }
    }

    /// Inverse operator, in the same block form.
    ///
    /// A singular inertia yields the zero operator.
    #[must_use]
    pub fn invert(&self) -> Self {
        match self.to_matrix().try_inverse() {
            Some(inv) => Self::from_matrix(&((inv + inv.transpose()) * 0.5)),
            None => {
                tracing::debug!("singular spatial inertia, using zero inverse");
                Self::zero()
            }
        }
    }

    /// Check for `NaN` or `Inf`.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.ll.iter().chain(self.la.iter()).chain(self.aa.iter()).all(|x| x.is_finite())
    }
}

impl Add for SpatialInertia {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            ll: self.ll + rhs.ll,
            la: self.la + rhs.la,
            aa: self.aa + rhs.aa,
        }
    }
}

impl Sub for SpatialInertia {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            ll: self.ll - rhs.ll,
            la: self.la - rhs.la,
            aa: self.aa - rhs.aa,
        }
    }
}

impl AddAssign for SpatialInertia {
    fn add_assign(&mut self, rhs: Self) {
        self.ll += rhs.ll;
        self.la += rhs.la;
        self.aa += rhs.aa;
    }
}

impl Mul<f64> for SpatialInertia {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self {
            ll: self.ll * rhs,
            la: self.la * rhs,
            aa: self.aa * rhs,
        }
    }
}

/// Invert a symmetric 3×3 matrix, returning zero when it is singular.
#[must_use]
pub fn invert_sym33(m: &Matrix3<f64>) -> Matrix3<f64> {
    match m.try_inverse() {
        Some(inv) => (inv + inv.transpose()) * 0.5,
        None => {
            tracing::debug!("singular joint response matrix, using zero inverse");
            Matrix3::zeros()
        }
    }
}
