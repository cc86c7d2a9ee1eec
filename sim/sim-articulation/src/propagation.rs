//! Impulse and velocity propagation through the factored tree.
//!
//! An impulse applied at a link travels up the tree to the root, where it
//! becomes a root velocity change, which then travels back down. Impulses
//! are carried negated (`Z = -impulse`), matching the bias-force convention
//! of the articulated-body algorithm.
//!
//! Downward propagation is lazy. Applying an impulse at link `k` updates the
//! velocities on `k`'s root path only. Every child hanging off that path
//! receives its parent's velocity change as a *deferred* term and is marked
//! in the dirty mask. Reading a velocity flushes the deferred terms on that
//! link's root path, most rootward first. The invariant is:
//!
//! ```text
//! true velocity(i) = stored velocity(i) + effect of pending deferred terms
//!                    on i's root path
//! ```

use nalgebra::Vector3;

use crate::data::ArticulationData;
use crate::frames::JointVectors;
use crate::inertia::{FsRow, JointAxes, axis_dot, axis_multiply};
use crate::spatial::SpatialVector;
use crate::topology::{BitIter, MAX_LINKS, lowest_set_bit};

/// Operations an external constraint solver uses on an articulation.
///
/// The solver never touches the tree structure directly. It applies
/// impulses, reads velocities, precomputes two-link responses for its rows
/// and flushes before the step is finalized.
pub trait ArticulationCallbacks {
    /// Apply a physical impulse at `link`.
    fn apply_impulse(&mut self, link: usize, impulse: &SpatialVector);

    /// Up-to-date velocity of `link`.
    fn velocity(&mut self, link: usize) -> SpatialVector;

    /// Velocity changes at `i` and `j` caused by applying both impulses at
    /// once, from rest.
    fn self_response(
        &self,
        i: usize,
        impulse_i: &SpatialVector,
        j: usize,
        impulse_j: &SpatialVector,
    ) -> (SpatialVector, SpatialVector);

    /// Push every deferred term down to the leaves.
    fn flush(&mut self);
}

/// Carry a (negated) impulse from a child to its parent.
///
/// Returns the impulse at the parent's center of mass and the joint-space
/// impulse `Sᵀ·Z` needed on the way back down.
#[must_use]
pub fn propagate_impulse(
    row: &FsRow,
    axes: &JointAxes,
    jv: &JointVectors,
    z: &SpatialVector,
) -> (SpatialVector, Vector3<f64>) {
    let sz = axis_dot(axes, z);
    let zp = (*z - axis_multiply(&row.dsi, &sz)).translate_force(&jv.parent_offset);
    (zp, sz)
}

/// Carry a velocity change from a parent to its child.
///
/// `sz` is the joint-space impulse recorded on the way up, zero for links
/// that received no impulse of their own.
#[must_use]
pub fn propagate_velocity(
    row: &FsRow,
    axes: &JointAxes,
    jv: &JointVectors,
    sz: &Vector3<f64>,
    parent_velocity: &SpatialVector,
) -> SpatialVector {
    let v = parent_velocity.translate_motion(&-jv.parent_offset);
    let n = axis_dot(&row.dsi, &v) + row.d * sz;
    v - axis_multiply(axes, &n)
}

impl ArticulationData {
    #[inline]
    fn propagate_up(&self, link: usize, z: &SpatialVector) -> (SpatialVector, Vector3<f64>) {
        propagate_impulse(&self.rows[link], &self.axes[link], &self.joint_vectors[link], z)
    }

    #[inline]
    fn propagate_down(&self, link: usize, sz: &Vector3<f64>, parent: &SpatialVector) -> SpatialVector {
        propagate_velocity(
            &self.rows[link],
            &self.axes[link],
            &self.joint_vectors[link],
            sz,
            parent,
        )
    }

    /// Root velocity change for a (negated) impulse at the root.
    #[inline]
    fn root_response(&self, z: &SpatialVector) -> SpatialVector {
        -self.root_inverse_inertia.mul_vec(z)
    }

    /// Apply negated impulses `z` at every link plus joint-space impulses
    /// `q` at every joint, in one full up/down pass.
    ///
    /// Entry 0 of `q` is ignored.
    pub fn apply_impulses(&mut self, z: &[SpatialVector], q: &[Vector3<f64>]) {
        let n = self.link_count();
        debug_assert!(z.len() >= n && q.len() >= n);
        self.flush();

        let mut acc = [SpatialVector::zero(); MAX_LINKS];
        acc[..n].copy_from_slice(&z[..n]);
        let mut sz = [Vector3::zeros(); MAX_LINKS];

        for i in (1..n).rev() {
            let s = axis_dot(&self.axes[i], &acc[i]) - q[i];
            let zp = (acc[i] - axis_multiply(&self.rows[i].dsi, &s))
                .translate_force(&self.joint_vectors[i].parent_offset);
            acc[self.topology.parent_of(i)] += zp;
            sz[i] = s;
        }

        let mut dv = [SpatialVector::zero(); MAX_LINKS];
        dv[0] = self.root_response(&acc[0]);
        for i in 1..n {
            dv[i] = self.propagate_down(i, &sz[i], &dv[self.topology.parent_of(i)]);
        }

        for (v, d) in self.velocity.iter_mut().zip(&dv[..n]) {
            *v += *d;
        }
    }

    /// Apply a physical impulse at `link`.
    ///
    /// Updates the velocities on `link`'s root path and defers the change
    /// for every child hanging off that path.
    pub fn apply_impulse(&mut self, link: usize, impulse: &SpatialVector) {
        self.flush_path(link);

        let path = self.topology.path_to_root(link);
        let mut sz = [Vector3::zeros(); MAX_LINKS];
        let mut z = -*impulse;
        let mut l = link;
        while l != 0 {
            let (zp, s) = self.propagate_up(l, &z);
            sz[l] = s;
            z = zp;
            l = self.topology.parent_of(l);
        }

        let mut dv = [SpatialVector::zero(); MAX_LINKS];
        for l in BitIter::new(path) {
            dv[l] = if l == 0 {
                self.root_response(&z)
            } else {
                self.propagate_down(l, &sz[l], &dv[self.topology.parent_of(l)])
            };
            self.velocity[l] += dv[l];

            let off_path = self.topology.children(l) & !path;
            for c in BitIter::new(off_path) {
                self.deferred[c] += dv[l];
            }
            self.dirty |= off_path;
        }
    }

    /// Up-to-date velocity of `link`, flushing only its root path.
    pub fn velocity(&mut self, link: usize) -> SpatialVector {
        self.flush_path(link);
        self.velocity[link]
    }

    /// Flush every deferred term.
    ///
    /// A second flush is a no-op.
    pub fn flush(&mut self) {
        while self.dirty != 0 {
            self.flush_link(lowest_set_bit(self.dirty));
        }
    }

    fn flush_path(&mut self, link: usize) {
        let path = self.topology.path_to_root(link);
        loop {
            let pending = path & self.dirty;
            if pending == 0 {
                break;
            }
            self.flush_link(lowest_set_bit(pending));
        }
    }

    /// Push `link`'s deferred term into its velocity and on to its children.
    fn flush_link(&mut self, link: usize) {
        let pending = std::mem::take(&mut self.deferred[link]);
        self.dirty &= !(1 << link);

        let dv = self.propagate_down(link, &Vector3::zeros(), &pending);
        self.velocity[link] += dv;

        let children = self.topology.children(link);
        for c in BitIter::new(children) {
            self.deferred[c] += dv;
        }
        self.dirty |= children;
    }

    /// Velocity changes at `i` and `j` from applying both impulses at once.
    ///
    /// Uses a short two-step walk when one link is the other's parent and
    /// the general common-ancestor walk otherwise. Neither touches the
    /// stored velocities.
    #[must_use]
    pub fn self_response(
        &self,
        i: usize,
        impulse_i: &SpatialVector,
        j: usize,
        impulse_j: &SpatialVector,
    ) -> (SpatialVector, SpatialVector) {
        if j != 0 && self.topology.parent_of(j) == i {
            self.parent_child_response(i, impulse_i, j, impulse_j)
        } else if i != 0 && self.topology.parent_of(i) == j {
            let (dv_j, dv_i) = self.parent_child_response(j, impulse_j, i, impulse_i);
            (dv_i, dv_j)
        } else {
            self.self_response_tree_walk(i, impulse_i, j, impulse_j)
        }
    }

    fn parent_child_response(
        &self,
        parent: usize,
        impulse_parent: &SpatialVector,
        child: usize,
        impulse_child: &SpatialVector,
    ) -> (SpatialVector, SpatialVector) {
        let (z_child, sz_child) = self.propagate_up(child, &-*impulse_child);
        let dv_parent = self.single_response(parent, &(z_child - *impulse_parent));
        let dv_child = self.propagate_down(child, &sz_child, &dv_parent);
        (dv_parent, dv_child)
    }

    /// Velocity change at `link` for a negated impulse `z` applied there.
    fn single_response(&self, link: usize, z: &SpatialVector) -> SpatialVector {
        let mut sz = [Vector3::zeros(); MAX_LINKS];
        let mut z = *z;
        let mut l = link;
        while l != 0 {
            let (zp, s) = self.propagate_up(l, &z);
            sz[l] = s;
            z = zp;
            l = self.topology.parent_of(l);
        }

        let mut dv = self.root_response(&z);
        for l in BitIter::new(self.topology.path_to_root(link) & !1) {
            dv = self.propagate_down(l, &sz[l], &dv);
        }
        dv
    }

    /// General two-link response through the common ancestor.
    ///
    /// Both impulses are carried up to the deepest common ancestor, merged,
    /// carried to the root, and the root response is carried back down both
    /// paths.
    #[must_use]
    pub fn self_response_tree_walk(
        &self,
        i: usize,
        impulse_i: &SpatialVector,
        j: usize,
        impulse_j: &SpatialVector,
    ) -> (SpatialVector, SpatialVector) {
        let common = self.topology.common_ancestor(i, j);
        let mut sz = [Vector3::zeros(); MAX_LINKS];

        let mut walk = |from: usize, to: usize, mut z: SpatialVector| {
            let mut l = from;
            while l != to {
                let (zp, s) = self.propagate_up(l, &z);
                sz[l] = s;
                z = zp;
                l = self.topology.parent_of(l);
            }
            z
        };

        let z_i = walk(i, common, -*impulse_i);
        let z_j = walk(j, common, -*impulse_j);
        let z_root = walk(common, 0, z_i + z_j);

        let mut dv = [SpatialVector::zero(); MAX_LINKS];
        dv[0] = self.root_response(&z_root);
        let mask = self.topology.path_to_root(i) | self.topology.path_to_root(j);
        for l in BitIter::new(mask & !1) {
            dv[l] = self.propagate_down(l, &sz[l], &dv[self.topology.parent_of(l)]);
        }
        (dv[i], dv[j])
    }
}

impl ArticulationCallbacks for ArticulationData {
    fn apply_impulse(&mut self, link: usize, impulse: &SpatialVector) {
        Self::apply_impulse(self, link, impulse);
    }

    fn velocity(&mut self, link: usize) -> SpatialVector {
        Self::velocity(self, link)
    }

    fn self_response(
        &self,
        i: usize,
        impulse_i: &SpatialVector,
        j: usize,
        impulse_j: &SpatialVector,
    ) -> (SpatialVector, SpatialVector) {
        Self::self_response(self, i, impulse_i, j, impulse_j)
    }

    fn flush(&mut self) {
        Self::flush(self);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::spatial::SpatialInertia;
    use crate::test_support;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn impulse(seed: f64) -> SpatialVector {
        SpatialVector::new(
            Vector3::new(seed.sin(), 0.5 * seed.cos(), 0.3 - seed),
            Vector3::new(0.2 * seed, -0.4, (2.0 * seed).cos()),
        )
    }

    /// Velocity change from applying both impulses eagerly, from rest.
    fn reference_response(
        data: &ArticulationData,
        i: usize,
        impulse_i: &SpatialVector,
        j: usize,
        impulse_j: &SpatialVector,
    ) -> (SpatialVector, SpatialVector) {
        let mut scratch = data.clone();
        scratch.clear_velocities();
        scratch.apply_impulse(i, impulse_i);
        scratch.apply_impulse(j, impulse_j);
        scratch.flush();
        (scratch.velocity[i], scratch.velocity[j])
    }

    fn assert_spatial_close(a: &SpatialVector, b: &SpatialVector, tol: f64) {
        let scale = 1.0 + a.max_abs().max(b.max_abs());
        assert!(
            (*a - *b).max_abs() <= tol * scale,
            "{a:?} differs from {b:?}"
        );
    }

    #[test]
    fn test_deferred_velocity_matches_eager() {
        let mut data = test_support::prepared_tree();
        let mut eager = data.clone();
        let j = impulse(0.7);

        data.apply_impulse(3, &j);
        // Links 2 and 4 hang off the path 0-1-3.
        assert_ne!(data.dirty_mask(), 0);

        let mut z = vec![SpatialVector::zero(); eager.link_count()];
        z[3] = -j;
        let q = vec![Vector3::zeros(); eager.link_count()];
        eager.apply_impulses(&z, &q);

        for link in 0..data.link_count() {
            let lazy = data.velocity(link);
            assert_spatial_close(&lazy, &eager.velocity[link], 1e-10);
        }
    }

    #[test]
    fn test_velocity_flushes_only_its_path() {
        let mut data = test_support::prepared_tree();
        data.apply_impulse(3, &impulse(0.2));
        let dirty = data.dirty_mask();
        let sibling = 4;
        assert!(dirty & (1 << sibling) != 0);

        let _ = data.velocity(5);
        // The sibling branch under link 1 is untouched.
        assert!(data.dirty_mask() & (1 << sibling) != 0);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut data = test_support::prepared_tree();
        data.apply_impulse(4, &impulse(1.3));
        data.apply_impulse(5, &impulse(-0.4));
        data.flush();
        let once = data.velocity.clone();
        data.flush();
        assert_eq!(data.velocity, once);
        assert_eq!(data.dirty_mask(), 0);
    }

    #[test]
    fn test_self_response_matches_reference() {
        let data = test_support::prepared_tree();
        let n = data.link_count();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (a, b) = (impulse(i as f64), impulse(0.3 * j as f64 + 1.0));
                let (dv_i, dv_j) = data.self_response(i, &a, j, &b);
                let (ref_i, ref_j) = reference_response(&data, i, &a, j, &b);
                assert_spatial_close(&dv_i, &ref_i, 1e-9);
                assert_spatial_close(&dv_j, &ref_j, 1e-9);
            }
        }
    }

    #[test]
    fn test_self_response_leaves_state_untouched() {
        let data = test_support::prepared_tree();
        let before = data.velocity.clone();
        let _ = data.self_response(1, &impulse(0.5), 3, &impulse(0.9));
        assert_eq!(data.velocity, before);
        assert_eq!(data.dirty_mask(), 0);
    }

    #[test]
    fn test_fixed_base_root_never_moves() {
        let mut data = test_support::prepared_chain(4, true);
        assert!(data.fixed_base());
        assert_eq!(*data.root_inverse_inertia(), SpatialInertia::zero());
        data.apply_impulse(3, &impulse(2.0));
        data.apply_impulse(0, &impulse(1.0));
        data.flush();
        assert_eq!(data.velocity[0], SpatialVector::zero());
        assert!(data.velocity[3].max_abs() > 0.0);
    }

    #[test]
    fn test_callbacks_trait_dispatch() {
        fn push<C: ArticulationCallbacks>(c: &mut C) -> SpatialVector {
            c.apply_impulse(2, &SpatialVector::linear(Vector3::x()));
            c.flush();
            c.velocity(2)
        }
        let mut data = test_support::prepared_chain(3, false);
        let v = push(&mut data);
        assert!(v.linear.x > 0.0);
    }

    proptest! {
        #[test]
        fn test_fast_and_slow_self_response_agree(
            parents in test_support::parent_strategy(16),
            seed in -3.0..3.0f64,
        ) {
            let data = test_support::prepared_random(&parents);
            let (a, b) = (impulse(seed), impulse(seed * 0.5 + 0.1));
            let n = data.link_count();
            for i in 0..n {
                for j in (0..n).filter(|&j| j != i) {
                    let fast = data.self_response(i, &a, j, &b);
                    let slow = data.self_response_tree_walk(i, &a, j, &b);
                    let eager = reference_response(&data, i, &a, j, &b);
                    let tol = 1e-3 * (1.0 + eager.0.max_abs() + eager.1.max_abs());
                    prop_assert!((fast.0 - slow.0).max_abs() <= tol);
                    prop_assert!((fast.1 - slow.1).max_abs() <= tol);
                    prop_assert!((slow.0 - eager.0).max_abs() <= tol, "links {} and {}", i, j);
                    prop_assert!((slow.1 - eager.1).max_abs() <= tol, "links {} and {}", i, j);
                }
            }
        }

        #[test]
        fn test_flush_idempotence_on_random_trees(
            parents in test_support::parent_strategy(16),
            link in 0usize..16,
            seed in -3.0..3.0f64,
        ) {
            let mut data = test_support::prepared_random(&parents);
            let link = link % data.link_count();
            data.apply_impulse(link, &impulse(seed));
            data.flush();
            let once = data.velocity.clone();
            data.flush();
            prop_assert_eq!(&data.velocity, &once);
        }
    }
}
