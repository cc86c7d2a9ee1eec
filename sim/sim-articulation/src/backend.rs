//! Solver entry points behind a swappable backend.
//!
//! The three per-step stages are exposed through the [`ArticulationBackend`]
//! trait so an alternative implementation (batched, vectorized, or running
//! on other hardware) can be selected when the solver is constructed.
//! [`ReferenceBackend`] is the scalar implementation every other backend is
//! checked against.
//!
//! [`ArticulationSolver`] wraps a backend with argument validation and a
//! one-call [`step`](ArticulationSolver::step).
//!
//! # Example
//!
//! ```
//! use sim_articulation::{Articulation, ArticulationSolver};
//! use sim_types::{
//!     ArticulationJoint, LinkBody, MassProperties, Point3, Pose, Twist, Vector3,
//! };
//!
//! let gravity = Twist::linear(Vector3::new(0.0, 0.0, -9.81));
//! let mut builder = Articulation::builder(
//!     LinkBody::new(Pose::identity(), MassProperties::sphere(1.0, 0.1))
//!         .with_acceleration(gravity),
//! );
//! builder.add_link(
//!     0,
//!     LinkBody::new(
//!         Pose::from_position(Point3::new(1.0, 0.0, 0.0)),
//!         MassProperties::sphere(1.0, 0.1),
//!     )
//!     .with_acceleration(gravity),
//!     ArticulationJoint::new(
//!         Pose::from_position(Point3::new(0.5, 0.0, 0.0)),
//!         Pose::from_position(Point3::new(-0.5, 0.0, 0.0)),
//!     ),
//! );
//! let mut articulation = builder.build().unwrap();
//! let mut data = articulation.create_data();
//! let mut rows = Vec::new();
//!
//! let solver = ArticulationSolver::new();
//! let report = solver
//!     .step(&mut articulation, &mut data, 0.01, &mut rows, |_, _| {})
//!     .unwrap();
//!
//! assert!(!report.projected);
//! assert!(articulation.body(1).twist.linear.z < 0.0);
//! ```

use sim_types::{Result, validate_timestep};

use crate::articulation::Articulation;
use crate::data::ArticulationData;
use crate::integrate::{ProjectionReport, update_bodies};
use crate::limits::LimitRow;
use crate::pipeline::{compute_unconstrained_velocities, save_velocity};

// ============================================================================
// Backend Trait
// ============================================================================

/// Implementation of the per-step solver stages.
///
/// Callers guarantee that `data` was created for `articulation` and that
/// `dt` is a valid timestep; backends do not revalidate.
pub trait ArticulationBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Factor the tree, apply drives and external accelerations, and fill
    /// `rows` with the active limit rows.
    fn compute_unconstrained_velocities(
        &self,
        articulation: &Articulation,
        data: &mut ArticulationData,
        dt: f64,
        rows: &mut Vec<LimitRow>,
    );

    /// Record the constraint-solved velocity for integration.
    fn save_velocity(&self, data: &mut ArticulationData);

    /// Integrate, project, and write the links back.
    fn update_bodies(
        &self,
        articulation: &mut Articulation,
        data: &mut ArticulationData,
        dt: f64,
    ) -> ProjectionReport;
}

// ============================================================================
// Reference Backend
// ============================================================================

/// Scalar reference implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBackend;

impl ArticulationBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn compute_unconstrained_velocities(
        &self,
        articulation: &Articulation,
        data: &mut ArticulationData,
        dt: f64,
        rows: &mut Vec<LimitRow>,
    ) {
        compute_unconstrained_velocities(articulation, data, dt, rows);
    }

    fn save_velocity(&self, data: &mut ArticulationData) {
        save_velocity(data);
    }

    fn update_bodies(
        &self,
        articulation: &mut Articulation,
        data: &mut ArticulationData,
        dt: f64,
    ) -> ProjectionReport {
        update_bodies(articulation, data, dt)
    }
}

// ============================================================================
// Solver
// ============================================================================

/// Validating front end over an [`ArticulationBackend`].
pub struct ArticulationSolver {
    backend: Box<dyn ArticulationBackend>,
}

impl std::fmt::Debug for ArticulationSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticulationSolver")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for ArticulationSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ArticulationSolver {
    /// Solver using the [`ReferenceBackend`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(ReferenceBackend)
    }

    /// Solver using a custom backend.
    #[must_use]
    pub fn with_backend(backend: impl ArticulationBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Name of the selected backend.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn check(articulation: &Articulation, data: &ArticulationData, dt: f64) -> Result<()> {
        validate_timestep(dt)?;
        data.check_topology(articulation.topology())
    }

    /// First stage of a step.
    ///
    /// # Errors
    ///
    /// Fails on an invalid timestep, or on scratch data built for a different
    /// tree.
    pub fn compute_unconstrained_velocities(
        &self,
        articulation: &Articulation,
        data: &mut ArticulationData,
        dt: f64,
        rows: &mut Vec<LimitRow>,
    ) -> Result<()> {
        Self::check(articulation, data, dt)?;
        self.backend
            .compute_unconstrained_velocities(articulation, data, dt, rows);
        Ok(())
    }

    /// Second stage, after the external solver has run.
    pub fn save_velocity(&self, data: &mut ArticulationData) {
        self.backend.save_velocity(data);
    }

    /// Final stage.
    ///
    /// # Errors
    ///
    /// Fails on an invalid timestep, or on scratch data built for a different
    /// tree.
    pub fn update_bodies(
        &self,
        articulation: &mut Articulation,
        data: &mut ArticulationData,
        dt: f64,
    ) -> Result<ProjectionReport> {
        Self::check(articulation, data, dt)?;
        Ok(self.backend.update_bodies(articulation, data, dt))
    }

    /// Run a whole step, handing the limit rows to `solve` in between.
    ///
    /// `solve` plays the external constraint solver: it applies impulses
    /// through `data` and must leave it ready for
    /// [`save_velocity`](Self::save_velocity).
    ///
    /// # Errors
    ///
    /// Fails on an invalid timestep, or on scratch data built for a different
    /// tree.
    pub fn step<F>(
        &self,
        articulation: &mut Articulation,
        data: &mut ArticulationData,
        dt: f64,
        rows: &mut Vec<LimitRow>,
        solve: F,
    ) -> Result<ProjectionReport>
    where
        F: FnOnce(&mut ArticulationData, &[LimitRow]),
    {
        self.compute_unconstrained_velocities(articulation, data, dt, rows)?;
        tracing::trace!(backend = self.backend_name(), rows = rows.len(), "solving limit rows");
        solve(data, rows);
        self.save_velocity(data);
        self.update_bodies(articulation, data, dt)
    }
}
