//! Joint-connectivity projector.
//!
//! A second factorization, independent of the articulated-inertia one, that
//! finds the smallest (inertia-weighted) velocity correction `y` making the
//! joint points move together:
//!
//! ```text
//! minimize  ½ yᵀ M y    subject to   J y = b
//! ```
//!
//! Each non-root link contributes one 3-row block `j0ᵀ v_parent + j1ᵀ v_child`
//! measuring the relative velocity of its joint point. The tree structure
//! lets the system be eliminated leaf-to-root in linear time, and solved with
//! one upward and one downward sweep.
//!
//! The projector is used to remove joint drift from velocities at the start
//! of each step, to strip the bias again after constraint solving, and to
//! generate pull-together velocities during position projection.

use nalgebra::{Matrix3, Vector3};
use sim_types::Pose;

use crate::frames::JointFrames;
use crate::inertia::{JointAxes, axes_times_matrix, axis_dot, axis_multiply, project_inertia};
use crate::spatial::{SpatialInertia, SpatialVector, invert_sym33};
use crate::topology::{MAX_LINKS, Topology};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fraction of the positional error removed per step.
const ERROR_REDUCTION: f64 = 0.99;

/// Constraint block of one joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LtbRow {
    /// Jacobian rows acting on the parent.
    pub j0: JointAxes,
    /// Jacobian rows acting on the child.
    pub j1: JointAxes,
    /// Velocity bias closing the current joint separation.
    pub jc: Vector3<f64>,
    /// Inverse of the child-side response `j1ᵀ A⁻¹ j1`.
    pub k_inv: Matrix3<f64>,
}

impl Default for LtbRow {
    fn default() -> Self {
        Self {
            j0: [SpatialVector::zero(); 3],
            j1: [SpatialVector::zero(); 3],
            jc: Vector3::zeros(),
            k_inv: Matrix3::zeros(),
        }
    }
}

/// Factored joint-connectivity system of one articulation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoopProjector {
    rows: Vec<LtbRow>,
    /// Augmented inertias before [`factor`](Self::factor), their inverses after.
    inertia: Vec<SpatialInertia>,
}

impl LoopProjector {
    /// Projector storage for `link_count` links.
    #[must_use]
    pub fn new(link_count: usize) -> Self {
        Self {
            rows: vec![LtbRow::default(); link_count],
            inertia: vec![SpatialInertia::zero(); link_count],
        }
    }

    /// Constraint rows, indexed by child link. Entry 0 is unused.
    #[must_use]
    pub fn rows(&self) -> &[LtbRow] {
        &self.rows
    }

    /// Build the constraint rows at the given poses.
    ///
    /// The constraint acts at the child's joint point.
    pub fn prepare(
        &mut self,
        topology: &Topology,
        base_inertia: &[SpatialInertia],
        poses: &[Pose],
        frames: &[JointFrames],
        recip_dt: f64,
    ) {
        let n = topology.link_count();
        self.inertia[..n].copy_from_slice(&base_inertia[..n]);

        for i in 1..n {
            let parent = topology.parent_of(i);
            let f = &frames[i];
            let anchor = f.c_b2w.position;
            let ra = anchor - poses[parent].position;
            let rb = anchor - poses[i].position;

            let row = &mut self.rows[i];
            for (k, axis) in [Vector3::x(), Vector3::y(), Vector3::z()].into_iter().enumerate() {
                row.j0[k] = SpatialVector::new(axis, ra.cross(&axis));
                row.j1[k] = SpatialVector::new(-axis, -rb.cross(&axis));
            }
            row.jc = (f.c_a2w.position - f.c_b2w.position) * (ERROR_REDUCTION * recip_dt);
            row.k_inv = Matrix3::zeros();
        }
    }

    /// Eliminate the system leaf-to-root.
    ///
    /// With `fixed_base` the root absorbs any impulse without moving.
    pub fn factor(&mut self, topology: &Topology, fixed_base: bool) {
        for i in (1..topology.link_count()).rev() {
            let inverse = self.inertia[i].invert();
            let row = &mut self.rows[i];
            row.k_inv = invert_sym33(&project_inertia(&inverse, &row.j1, &row.j1));
            self.inertia[i] = inverse;

            let parent = topology.parent_of(i);
            let weighted = axes_times_matrix(&row.j0, &row.k_inv);
            for (w, j) in weighted.iter().zip(&row.j0) {
                self.inertia[parent].add_outer(w, j);
            }
        }

        self.inertia[0] = if fixed_base {
            SpatialInertia::zero()
        } else {
            self.inertia[0].invert()
        };
    }

    /// Relative joint-point velocity `Jv` of every joint.
    pub fn compute_jv(&self, topology: &Topology, velocity: &[SpatialVector], b: &mut [Vector3<f64>]) {
        for i in 1..topology.link_count() {
            let row = &self.rows[i];
            b[i] = axis_dot(&row.j0, &velocity[topology.parent_of(i)]) + axis_dot(&row.j1, &velocity[i]);
        }
    }

    /// Add the drift-closing bias to a right-hand side.
    pub fn add_bias(&self, topology: &Topology, b: &mut [Vector3<f64>]) {
        for i in 1..topology.link_count() {
            b[i] += self.rows[i].jc;
        }
    }

    /// The bias alone as a right-hand side.
    pub fn bias(&self, topology: &Topology, b: &mut [Vector3<f64>]) {
        for i in 1..topology.link_count() {
            b[i] = self.rows[i].jc;
        }
    }

    /// Solve `J y = b` for the minimum-energy correction `y`.
    ///
    /// `b` is consumed as scratch.
    pub fn solve(&self, topology: &Topology, b: &mut [Vector3<f64>], y: &mut [SpatialVector]) {
        let n = topology.link_count();
        let mut g = [SpatialVector::zero(); MAX_LINKS];

        for i in (1..n).rev() {
            let row = &self.rows[i];
            let w = self.inertia[i].mul_vec(&g[i]);
            b[i] -= axis_dot(&row.j1, &w);
            let parent = topology.parent_of(i);
            g[parent] += axis_multiply(&row.j0, &(row.k_inv * b[i]));
        }

        y[0] = self.inertia[0].mul_vec(&g[0]);

        for i in 1..n {
            let row = &self.rows[i];
            let lambda = row.k_inv * (b[i] - axis_dot(&row.j0, &y[topology.parent_of(i)]));
            y[i] = self.inertia[i].mul_vec(&(axis_multiply(&row.j1, &lambda) + g[i]));
        }
    }

    /// Remove the correction for `b` from `velocity`.
    pub fn project(&self, topology: &Topology, velocity: &mut [SpatialVector], b: &mut [Vector3<f64>]) {
        let mut y = [SpatialVector::zero(); MAX_LINKS];
        self.solve(topology, b, &mut y);
        for (v, dy) in velocity.iter_mut().zip(&y[..topology.link_count()]) {
            *v -= *dy;
        }
    }
}
