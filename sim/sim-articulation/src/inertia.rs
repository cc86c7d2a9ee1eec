//! Articulated-inertia reduction over spherical joints.
//!
//! Each joint has three motion axes located at the joint point and aligned
//! with the world axes:
//!
//! ```text
//! S_k = ( joint_offset × e_k , e_k )      k = 0, 1, 2
//! ```
//!
//! The leaf-to-root pass reduces every link's articulated inertia `I` through
//! its joint and accumulates it onto the parent:
//!
//! ```text
//! IS  = I·S
//! D   = (Sᵀ·I·S + f·L)⁻¹          L = joint load, f = spring factor
//! DSI = IS·D
//! I_p += translate(parent_offset, I - DSI·ISᵀ)
//! ```
//!
//! A non-zero load stiffens the joint for the duration of the step, which is
//! how drives are made implicit. `D` and `DSI` are kept per link in an
//! [`FsRow`] and drive every impulse and velocity propagation.

use nalgebra::{Matrix3, Vector3};

use crate::frames::JointVectors;
use crate::spatial::{SpatialInertia, SpatialVector, invert_sym33};
use crate::topology::Topology;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Three spatial axes of one joint (or three columns of a 6×3 matrix).
pub type JointAxes = [SpatialVector; 3];

/// Factorization data of one joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FsRow {
    /// Inverse joint-space response `(SᵀIS + f·L)⁻¹`.
    pub d: Matrix3<f64>,
    /// `I·S·D`, the coupling of joint motion into the parent.
    pub dsi: JointAxes,
}

impl Default for FsRow {
    fn default() -> Self {
        Self {
            d: Matrix3::zeros(),
            dsi: [SpatialVector::zero(); 3],
        }
    }
}

/// Motion axes of a spherical joint whose point sits `joint_offset` away
/// from the child's center of mass.
#[must_use]
pub fn joint_axes(joint_offset: &Vector3<f64>) -> JointAxes {
    let axis = |e: Vector3<f64>| SpatialVector::new(joint_offset.cross(&e), e);
    [axis(Vector3::x()), axis(Vector3::y()), axis(Vector3::z())]
}

/// `(a_k · v)` for each axis.
#[must_use]
pub fn axis_dot(axes: &JointAxes, v: &SpatialVector) -> Vector3<f64> {
    Vector3::new(axes[0].dot(v), axes[1].dot(v), axes[2].dot(v))
}

/// `Σ a_k · q_k`.
#[must_use]
pub fn axis_multiply(axes: &JointAxes, q: &Vector3<f64>) -> SpatialVector {
    axes[0] * q.x + axes[1] * q.y + axes[2] * q.z
}

/// `Σ_j a_j · m[(j, k)]` for each column `k`.
#[must_use]
pub fn axes_times_matrix(axes: &JointAxes, m: &Matrix3<f64>) -> JointAxes {
    [
        axis_multiply(axes, &m.column(0).into_owned()),
        axis_multiply(axes, &m.column(1).into_owned()),
        axis_multiply(axes, &m.column(2).into_owned()),
    ]
}

/// `I·S` together with the joint-space inertia `Sᵀ·I·S`.
#[must_use]
pub fn compute_sis(inertia: &SpatialInertia, axes: &JointAxes) -> (JointAxes, Matrix3<f64>) {
    let is = [
        inertia.mul_vec(&axes[0]),
        inertia.mul_vec(&axes[1]),
        inertia.mul_vec(&axes[2]),
    ];
    let sis = Matrix3::from_fn(|r, c| axes[r].dot(&is[c]));
    (is, (sis + sis.transpose()) * 0.5)
}

/// Joint-space inertia `aᵀ·I·b` for two axis triples.
#[must_use]
pub fn project_inertia(inertia: &SpatialInertia, a: &JointAxes, b: &JointAxes) -> Matrix3<f64> {
    let ib = [
        inertia.mul_vec(&b[0]),
        inertia.mul_vec(&b[1]),
        inertia.mul_vec(&b[2]),
    ];
    Matrix3::from_fn(|r, c| a[r].dot(&ib[c]))
}

/// `I - Σ_k a_k ⊗ b_k`.
#[must_use]
pub fn multiply_subtract(inertia: &SpatialInertia, a: &JointAxes, b: &JointAxes) -> SpatialInertia {
    let mut result = *inertia;
    for (ak, bk) in a.iter().zip(b) {
        result.sub_outer(ak, bk);
    }
    result
}

/// Reduce an inertia through a loaded joint.
///
/// Returns `I - IS·(SᵀIS + f·L)⁻¹·ISᵀ` and the row that produced it.
#[must_use]
pub fn propagate(
    inertia: &SpatialInertia,
    axes: &JointAxes,
    load: &Matrix3<f64>,
    spring_factor: f64,
) -> (SpatialInertia, FsRow) {
    let (is, sis) = compute_sis(inertia, axes);
    let d = invert_sym33(&(sis + load * spring_factor));
    let dsi = axes_times_matrix(&is, &d);
    (multiply_subtract(inertia, &dsi, &is), FsRow { d, dsi })
}

/// Effective joint-space inertia of the two sides of a joint in series.
///
/// `((SᵀI_child S)⁻¹ + (SᵀI_rootward S)⁻¹)⁻¹`
#[must_use]
pub fn drive_inertia(
    child: &SpatialInertia,
    rootward: &SpatialInertia,
    axes: &JointAxes,
) -> Matrix3<f64> {
    let (_, child_sis) = compute_sis(child, axes);
    let (_, rootward_sis) = compute_sis(rootward, axes);
    invert_sym33(&(invert_sym33(&child_sis) + invert_sym33(&rootward_sis)))
}

/// Iteratively estimate joint loads from the articulation's inertia.
///
/// Each iteration reduces the tree leaf-to-root with the current loads, then
/// walks root-to-leaf computing, for every joint, the series inertia of its
/// subtree against everything rootward of it. `contrib` and `inertia` are
/// caller-provided scratch of one entry per link.
#[allow(clippy::too_many_arguments)]
pub fn compute_joint_loads(
    topology: &Topology,
    base_inertia: &[SpatialInertia],
    axes: &[JointAxes],
    joint_vectors: &[JointVectors],
    spring_factors: &[f64],
    loads: &mut [Matrix3<f64>],
    iterations: u32,
    scratch: (&mut [SpatialInertia], &mut [SpatialInertia]),
) {
    let (inertia, contrib) = scratch;
    let n = topology.link_count();

    for _ in 0..iterations {
        inertia[..n].copy_from_slice(&base_inertia[..n]);

        for i in (1..n).rev() {
            let (reduced, _) = propagate(&inertia[i], &axes[i], &loads[i], spring_factors[i]);
            let parent = topology.parent_of(i);
            inertia[parent] += reduced.translate(&joint_vectors[i].parent_offset);
            contrib[i] = reduced;
        }

        for i in 1..n {
            let parent = topology.parent_of(i);
            let rootward = inertia[parent].translate(&-joint_vectors[i].parent_offset) - contrib[i];
            let (reduced, _) = propagate(&rootward, &axes[i], &loads[i], spring_factors[i]);
            loads[i] = drive_inertia(&inertia[i], &rootward, &axes[i]);
            inertia[i] += reduced;
        }
    }
}

/// Factor the articulation with the given loads.
///
/// Fills `rows` and returns the root's inverse articulated inertia, which is
/// zero for a fixed base.
#[allow(clippy::too_many_arguments)]
pub fn propagate_driven_inertia(
    topology: &Topology,
    base_inertia: &[SpatialInertia],
    axes: &[JointAxes],
    joint_vectors: &[JointVectors],
    spring_factors: &[f64],
    loads: &[Matrix3<f64>],
    fixed_base: bool,
    rows: &mut [FsRow],
    inertia: &mut [SpatialInertia],
) -> SpatialInertia {
    let n = topology.link_count();
    inertia[..n].copy_from_slice(&base_inertia[..n]);

    for i in (1..n).rev() {
        let (reduced, row) = propagate(&inertia[i], &axes[i], &loads[i], spring_factors[i]);
        rows[i] = row;
        let parent = topology.parent_of(i);
        inertia[parent] += reduced.translate(&joint_vectors[i].parent_offset);
    }

    if fixed_base {
        SpatialInertia::zero()
    } else {
        inertia[0].invert()
    }
}
