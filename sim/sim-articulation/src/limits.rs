//! Swing and twist limit rows for the external constraint solver.
//!
//! A joint's relative rotation is split into a twist about the joint's X
//! axis and a swing that moves the X axis. Angles are handled as tangents of
//! the quarter angle, which stay finite and monotonic over a full turn:
//!
//! ```text
//! tan(θ/4) = sin(θ/2) / (1 + cos(θ/2))        tan_half(s, c) = s / (1 + c)
//! ```
//!
//! The swing cone is an ellipse in quarter-tangent space. When the swing is
//! outside it (or inside its padding), the nearest point on the ellipse
//! gives a limiting direction for the twist axis, and the row constrains
//! rotation about the axis normal to the cone surface there.
//!
//! Rows are one-dimensional two-body constraints between a parent link and
//! its child, acting on angular velocity only. [`LimitRow::resolve`] is the
//! update an iterative solver applies to each row.

use nalgebra::{UnitQuaternion, Vector2, Vector3};
use sim_types::{ArticulationJoint, SwingLimit};

use crate::articulation::Articulation;
use crate::data::ArticulationData;
use crate::spatial::SpatialVector;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Quarter-angle error scale back to radians for small angles.
const TWIST_ERROR_SCALE: f64 = 4.0;

const ELLIPSE_ITERATIONS: usize = 64;

/// `s / (1 + c)`, the half-angle tangent from a sine/cosine pair.
#[must_use]
pub fn tan_half(sin: f64, cos: f64) -> f64 {
    sin / (1.0 + cos)
}

/// Tangent addition: `tan(a + b)` from `tan a` and `tan b`.
#[must_use]
pub fn tan_add(a: f64, b: f64) -> f64 {
    (a + b) / (1.0 - a * b)
}

/// Split `q` into `swing * twist`, with the twist about X.
#[must_use]
pub fn separate_swing_twist(
    q: &UnitQuaternion<f64>,
) -> (UnitQuaternion<f64>, UnitQuaternion<f64>) {
    let twist = if q.i == 0.0 {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::new_normalize(nalgebra::Quaternion::new(q.w, q.i, 0.0, 0.0))
    };
    (q * twist.inverse(), twist)
}

/// Nearest point on the ellipse with the given radii.
///
/// Points inside the ellipse are scaled radially onto it.
fn ellipse_clamp(p: &Vector2<f64>, radii: &Vector2<f64>) -> Vector2<f64> {
    let (a, b) = (radii.x, radii.y);
    let level = (p.x / a).powi(2) + (p.y / b).powi(2);
    if level <= 1.0 {
        return p / level.sqrt();
    }

    // Nearest point is a²p/(a²+t); find the t that puts it on the ellipse.
    let residual = |t: f64| (a * p.x / (t + a * a)).powi(2) + (b * p.y / (t + b * b)).powi(2) - 1.0;
    let (mut lo, mut hi) = (0.0, a * p.x.abs() + b * p.y.abs());
    for _ in 0..ELLIPSE_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        if residual(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let t = 0.5 * (lo + hi);
    Vector2::new(a * a * p.x / (t + a * a), b * b * p.y / (t + b * b))
}

/// Elliptical swing cone in quarter-tangent space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConeLimit {
    tan_quarter_y: f64,
    tan_quarter_z: f64,
    tan_quarter_pad: f64,
}

impl From<&SwingLimit> for ConeLimit {
    fn from(limit: &SwingLimit) -> Self {
        Self::new(
            limit.tan_quarter_y(),
            limit.tan_quarter_z(),
            limit.tan_quarter_pad(),
        )
    }
}

impl ConeLimit {
    /// Cone with quarter-tangent radii and padding.
    #[must_use]
    pub const fn new(tan_quarter_y: f64, tan_quarter_z: f64, tan_quarter_pad: f64) -> Self {
        Self {
            tan_quarter_y,
            tan_quarter_z,
            tan_quarter_pad,
        }
    }

    /// Quarter-tangent swing coordinates: where the swing sends the X axis.
    ///
    /// The first component is the swing toward +Y (about Z), the second the
    /// swing toward +Z (about -Y).
    #[must_use]
    pub fn swing_coordinates(swing: &UnitQuaternion<f64>) -> Vector2<f64> {
        Vector2::new(tan_half(swing.k, swing.w), -tan_half(swing.j, swing.w))
    }

    /// Whether `p` lies inside the cone shrunk by its padding.
    #[must_use]
    pub fn contains(&self, p: &Vector2<f64>) -> bool {
        let y = tan_add(p.x.abs(), self.tan_quarter_pad);
        let z = tan_add(p.y.abs(), self.tan_quarter_pad);
        (y / self.tan_quarter_y).powi(2) + (z / self.tan_quarter_z).powi(2) <= 1.0
    }

    /// Limit axis (in the parent attachment frame) and signed error.
    ///
    /// Returns `None` while the swing is inside the padded cone. The error
    /// is positive inside the cone and negative once it is violated.
    #[must_use]
    pub fn limit(&self, swing: &UnitQuaternion<f64>) -> Option<(Vector3<f64>, f64)> {
        let p = Self::swing_coordinates(swing);
        if self.contains(&p) || p.norm_squared() == 0.0 {
            return None;
        }

        let radii = Vector2::new(self.tan_quarter_y, self.tan_quarter_z);
        let c = ellipse_clamp(&p, &radii);
        let normal = Vector2::new(c.x / (radii.x * radii.x), c.y / (radii.y * radii.y));

        // Rotation vector of the limit point and the outward direction, as
        // quarter-tangent rotation axes.
        let r = Vector3::new(0.0, -c.y, c.x);
        let d = Vector3::new(0.0, -normal.y, normal.x);

        let r2 = r.norm_squared();
        let a = 1.0 - r2;
        let b = 1.0 / (1.0 + r2);
        let v1 = 2.0 * a * b * b;
        let v2 = Vector3::new(a, 2.0 * r.z, -2.0 * r.y);
        let cone_line = v2 * v1 - Vector3::x();

        let rd = r.dot(&d);
        let dv1 = -4.0 * rd * (3.0 - r2) * b * b * b;
        let dv2 = Vector3::new(-2.0 * rd, 2.0 * d.z, -2.0 * d.y);
        let cone_normal = dv2 * v1 + v2 * dv1;

        let axis = cone_line.cross(&cone_normal) / cone_normal.norm();
        let twist_axis = swing * Vector3::x();
        let error = cone_line.cross(&axis).dot(&twist_axis);
        Some((axis, error))
    }
}

/// What a limit row constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LimitKind {
    /// Swing cone boundary.
    Swing,
    /// Damped spring along the cone boundary.
    TangentialSpring,
    /// Upper twist bound.
    TwistUpper,
    /// Lower twist bound.
    TwistLower,
}

/// One-dimensional angular constraint between a link and its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LimitRow {
    /// Parent link.
    pub parent: usize,
    /// Child link.
    pub child: usize,
    /// Row kind.
    pub kind: LimitKind,
    /// World-frame angular axis.
    pub axis: Vector3<f64>,
    /// Parent velocity change per unit row impulse.
    pub delta_va: SpatialVector,
    /// Child velocity change per unit row impulse.
    pub delta_vb: SpatialVector,
    /// Bias term, including position error correction.
    pub constant: f64,
    /// Bias term without error correction.
    pub unbiased_constant: f64,
    /// Weight of the current normal velocity.
    pub velocity_multiplier: f64,
    /// Weight of the accumulated impulse.
    pub impulse_multiplier: f64,
    /// Lower impulse bound.
    pub min_impulse: f64,
    /// Upper impulse bound.
    pub max_impulse: f64,
}

impl LimitRow {
    /// Relative angular velocity along the axis, parent minus child.
    #[must_use]
    pub fn normal_velocity(&self, va: &SpatialVector, vb: &SpatialVector) -> f64 {
        self.axis.dot(&va.angular) - self.axis.dot(&vb.angular)
    }

    /// New accumulated impulse given the current one and link velocities.
    #[must_use]
    pub fn resolve(&self, applied: f64, va: &SpatialVector, vb: &SpatialVector) -> f64 {
        let unclamped = self.impulse_multiplier * applied
            + self.velocity_multiplier * self.normal_velocity(va, vb)
            + self.constant;
        unclamped.clamp(self.min_impulse, self.max_impulse)
    }

    /// Impulses on parent and child for a row impulse `delta`.
    #[must_use]
    pub fn impulses(&self, delta: f64) -> (SpatialVector, SpatialVector) {
        (
            SpatialVector::angular(self.axis * delta),
            SpatialVector::angular(-self.axis * delta),
        )
    }

    fn with_response(
        data: &ArticulationData,
        child: usize,
        axis: Vector3<f64>,
        kind: LimitKind,
    ) -> (Self, f64) {
        let parent = data.topology.parent_of(child);
        let (delta_va, delta_vb) = data.self_response(
            parent,
            &SpatialVector::angular(axis),
            child,
            &SpatialVector::angular(-axis),
        );
        let unit = axis.dot(&delta_va.angular) - axis.dot(&delta_vb.angular);
        let recip = if unit <= 0.0 {
            tracing::debug!(
                link = child,
                ?kind,
                unit,
                "articulation ill-conditioned, limit row has no strength"
            );
            0.0
        } else {
            1.0 / unit
        };

        let row = Self {
            parent,
            child,
            kind,
            axis,
            delta_va,
            delta_vb,
            constant: 0.0,
            unbiased_constant: 0.0,
            velocity_multiplier: 0.0,
            impulse_multiplier: 1.0,
            min_impulse: 0.0,
            max_impulse: f64::INFINITY,
        };
        (row, recip)
    }

    /// Inequality row keeping `error` from going further negative.
    #[must_use]
    pub fn hard_limit(
        data: &ArticulationData,
        child: usize,
        axis: Vector3<f64>,
        error: f64,
        kind: LimitKind,
        recip_dt: f64,
    ) -> Self {
        let (mut row, recip) = Self::with_response(data, child, axis, kind);
        row.constant = recip * -error * recip_dt;
        row.unbiased_constant = if error > 0.0 { row.constant } else { 0.0 };
        row.velocity_multiplier = -recip;
        row
    }

    /// Implicit damped spring with no rest offset.
    #[must_use]
    pub fn tangential_spring(
        data: &ArticulationData,
        child: usize,
        axis: Vector3<f64>,
        stiffness: f64,
        damping: f64,
        dt: f64,
    ) -> Self {
        let (mut row, recip) = Self::with_response(data, child, axis, LimitKind::TangentialSpring);
        let a = dt * dt * stiffness + dt * damping;
        let x = 1.0 / (1.0 + a);
        row.velocity_multiplier = -x * recip * a;
        row.impulse_multiplier = 1.0 - x;
        row.min_impulse = f64::NEG_INFINITY;
        row
    }
}

/// Append the rows of one joint.
fn joint_rows(
    data: &ArticulationData,
    child: usize,
    joint: &ArticulationJoint,
    dt: f64,
    rows: &mut Vec<LimitRow>,
) {
    let recip_dt = 1.0 / dt;
    let frames = &data.frames[child];
    let (swing, twist) = separate_swing_twist(&frames.c_b2c_a.rotation);
    let twist_axis = frames.c_b2w.rotation * Vector3::x();

    let swing_limit = joint
        .swing_limit
        .and_then(|limit| ConeLimit::from(&limit).limit(&swing));

    if let Some((axis, error)) = swing_limit {
        let normal = frames.c_a2w.rotation * axis;
        rows.push(LimitRow::hard_limit(
            data,
            child,
            normal,
            error,
            LimitKind::Swing,
            recip_dt,
        ));

        let spring = joint.tangential_spring;
        if spring.is_active() {
            let tangent = twist_axis.cross(&normal);
            if let Some(tangent) = tangent.try_normalize(f64::EPSILON) {
                rows.push(LimitRow::tangential_spring(
                    data,
                    child,
                    tangent,
                    spring.stiffness,
                    spring.damping,
                    dt,
                ));
            }
        }
    }

    if let Some(limit) = joint.twist_limit {
        let tq = tan_half(twist.i, twist.w);
        let pad = limit.tan_quarter_pad();
        if tq > tan_add(limit.tan_quarter_high(), -pad) {
            let error = (limit.tan_quarter_high() - tq) * TWIST_ERROR_SCALE;
            rows.push(LimitRow::hard_limit(
                data,
                child,
                twist_axis,
                error,
                LimitKind::TwistUpper,
                recip_dt,
            ));
        }
        if tq < tan_add(limit.tan_quarter_low(), pad) {
            let error = -(limit.tan_quarter_low() - tq) * TWIST_ERROR_SCALE;
            rows.push(LimitRow::hard_limit(
                data,
                child,
                -twist_axis,
                error,
                LimitKind::TwistLower,
                recip_dt,
            ));
        }
    }
}

/// Rows for every limited joint, replacing the contents of `rows`.
pub(crate) fn setup_limit_rows(
    articulation: &Articulation,
    data: &ArticulationData,
    dt: f64,
    rows: &mut Vec<LimitRow>,
) {
    rows.clear();
    for (i, joint) in articulation.joints() {
        if joint.is_limited() {
            joint_rows(data, i, joint, dt, rows);
        }
    }
    tracing::trace!(rows = rows.len(), "limit rows generated");
}
