//! Per-articulation solver state.
//!
//! [`ArticulationData`] holds everything the solver derives from the links
//! during a step: the articulated-inertia factorization, the projector, the
//! deferred velocity state and the scratch used to build them. It is
//! allocated once for a topology and reused across steps.

use std::mem::size_of;

use nalgebra::Matrix3;
use sim_types::{Pose, Result, SimError};

use crate::frames::{JointFrames, JointVectors};
use crate::inertia::{FsRow, JointAxes};
use crate::projector::{LoopProjector, LtbRow};
use crate::spatial::{SpatialInertia, SpatialVector};
use crate::topology::Topology;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Byte sizes of the solver state for a given link count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataSizes {
    /// State the external solver touches through the callbacks: velocities,
    /// deferred terms, joint vectors, factorization rows and root inverse.
    pub solver_data: usize,
    /// `solver_data` plus projector rows and joint axes.
    pub total: usize,
    /// Per-step scratch: inertia buffers, joint frames, loads and poses.
    pub scratch: usize,
}

/// Storage needed by an articulation of `link_count` links.
///
/// # Example
///
/// ```
/// use sim_articulation::data_sizes;
///
/// let small = data_sizes(2);
/// let large = data_sizes(32);
/// assert!(large.total > small.total);
/// assert!(small.total >= small.solver_data);
/// ```
#[must_use]
pub fn data_sizes(link_count: usize) -> DataSizes {
    let solver_data = size_of::<u64>()
        + size_of::<SpatialInertia>()
        + link_count
            * (2 * size_of::<SpatialVector>() + size_of::<JointVectors>() + size_of::<FsRow>());

    let total = solver_data
        + link_count * (size_of::<LtbRow>() + size_of::<SpatialInertia>() + size_of::<JointAxes>());

    let scratch = link_count
        * (3 * size_of::<SpatialInertia>()
            + size_of::<JointFrames>()
            + 2 * size_of::<Matrix3<f64>>()
            + 2 * size_of::<Pose>()
            + size_of::<SpatialVector>()
            + 2 * size_of::<f64>());

    DataSizes {
        solver_data,
        total,
        scratch,
    }
}

/// Solver state of one articulation.
#[derive(Debug, Clone)]
pub struct ArticulationData {
    pub(crate) topology: Topology,
    pub(crate) fixed_base: bool,

    // ==================== Propagation state ====================
    pub(crate) velocity: Vec<SpatialVector>,
    /// Parent velocity change not yet pushed into the link.
    pub(crate) deferred: Vec<SpatialVector>,
    /// Links with a pending deferred term.
    pub(crate) dirty: u64,
    pub(crate) joint_vectors: Vec<JointVectors>,
    pub(crate) axes: Vec<JointAxes>,
    pub(crate) rows: Vec<FsRow>,
    pub(crate) root_inverse_inertia: SpatialInertia,

    // ==================== Projection ====================
    pub(crate) projector: LoopProjector,
    pub(crate) motion_velocity: Vec<SpatialVector>,

    // ==================== Per-step scratch ====================
    pub(crate) poses: Vec<Pose>,
    pub(crate) old_poses: Vec<Pose>,
    pub(crate) frames: Vec<JointFrames>,
    pub(crate) base_inertia: Vec<SpatialInertia>,
    pub(crate) inertia: Vec<SpatialInertia>,
    pub(crate) contrib: Vec<SpatialInertia>,
    pub(crate) internal_loads: Vec<Matrix3<f64>>,
    pub(crate) external_loads: Vec<Matrix3<f64>>,
    pub(crate) internal_spring_factors: Vec<f64>,
    pub(crate) external_spring_factors: Vec<f64>,
}

impl ArticulationData {
    /// Allocate state for `topology`.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        let n = topology.link_count();
        Self {
            fixed_base: false,
            velocity: vec![SpatialVector::zero(); n],
            deferred: vec![SpatialVector::zero(); n],
            dirty: 0,
            joint_vectors: vec![JointVectors::default(); n],
            axes: vec![[SpatialVector::zero(); 3]; n],
            rows: vec![FsRow::default(); n],
            root_inverse_inertia: SpatialInertia::zero(),
            projector: LoopProjector::new(n),
            motion_velocity: vec![SpatialVector::zero(); n],
            poses: vec![Pose::identity(); n],
            old_poses: vec![Pose::identity(); n],
            frames: vec![JointFrames::default(); n],
            base_inertia: vec![SpatialInertia::zero(); n],
            inertia: vec![SpatialInertia::zero(); n],
            contrib: vec![SpatialInertia::zero(); n],
            internal_loads: vec![Matrix3::zeros(); n],
            external_loads: vec![Matrix3::zeros(); n],
            internal_spring_factors: vec![0.0; n],
            external_spring_factors: vec![0.0; n],
            topology,
        }
    }

    /// The tree this state was built for.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.topology.link_count()
    }

    /// Whether the root is pinned.
    #[must_use]
    pub fn fixed_base(&self) -> bool {
        self.fixed_base
    }

    /// Mask of links with pending deferred velocity.
    #[must_use]
    pub fn dirty_mask(&self) -> u64 {
        self.dirty
    }

    /// Velocity used to integrate `link`'s pose during the last step.
    #[must_use]
    pub fn motion_velocity(&self, link: usize) -> SpatialVector {
        self.motion_velocity[link]
    }

    /// Inverse articulated inertia of the root.
    #[must_use]
    pub fn root_inverse_inertia(&self) -> &SpatialInertia {
        &self.root_inverse_inertia
    }

    /// Internal drive loads, indexed by child link.
    #[must_use]
    pub fn internal_loads(&self) -> &[Matrix3<f64>] {
        &self.internal_loads
    }

    /// External drive loads, indexed by child link.
    #[must_use]
    pub fn external_loads(&self) -> &[Matrix3<f64>] {
        &self.external_loads
    }

    /// Joint frames at the poses of the last preparation.
    #[must_use]
    pub fn joint_frames(&self, link: usize) -> &JointFrames {
        &self.frames[link]
    }

    /// Check that this state was allocated for `topology`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::LinkCountMismatch`] if the link counts differ, or
    /// [`SimError::TopologyMismatch`] for the first link whose parent differs.
    pub fn check_topology(&self, topology: &Topology) -> Result<()> {
        if self.link_count() != topology.link_count() {
            return Err(SimError::LinkCountMismatch {
                expected: self.link_count(),
                actual: topology.link_count(),
            });
        }
        match (1..self.link_count()).find(|&i| self.topology.parent_of(i) != topology.parent_of(i)) {
            Some(link) => Err(SimError::TopologyMismatch {
                link,
                expected: self.topology.parent_of(link),
                actual: topology.parent_of(link),
            }),
            None => Ok(()),
        }
    }

    /// Sizes of this state's buffers.
    #[must_use]
    pub fn sizes(&self) -> DataSizes {
        data_sizes(self.link_count())
    }

    /// Clear all velocity and deferred state.
    pub fn clear_velocities(&mut self) {
        self.velocity.fill(SpatialVector::zero());
        self.deferred.fill(SpatialVector::zero());
        self.dirty = 0;
    }
}
