//! Batched stepping of independent articulations.
//!
//! Each articulation's step reads only its own links and writes only its
//! own scratch data, so a batch can be stepped in parallel via rayon when
//! the `parallel` feature is enabled; sequential fallback when disabled.
//! Results are identical either way.
//!
//! # Examples
//!
//! ```
//! use sim_articulation::{Articulation, BatchArticulations};
//! use sim_types::{LinkBody, MassProperties, Pose, Twist, Vector3};
//!
//! let root = LinkBody::new(Pose::identity(), MassProperties::sphere(1.0, 0.1))
//!     .with_acceleration(Twist::linear(Vector3::new(0.0, 0.0, -9.81)));
//! let articulation = Articulation::builder(root).build().unwrap();
//!
//! let mut batch = BatchArticulations::new(vec![articulation; 8]);
//! let errors = batch.step_all(0.01);
//!
//! assert!(errors.iter().all(Option::is_none));
//! assert!(batch.env(3).unwrap().articulation().body(0).twist.linear.z < 0.0);
//! ```

use sim_types::SimError;

use crate::articulation::Articulation;
use crate::backend::ArticulationSolver;
use crate::data::ArticulationData;
use crate::integrate::ProjectionReport;
use crate::limits::LimitRow;

/// One articulation with the buffers it is stepped with.
#[derive(Debug, Clone)]
pub struct ArticulationEnv {
    articulation: Articulation,
    data: ArticulationData,
    rows: Vec<LimitRow>,
    last_report: Option<ProjectionReport>,
}

impl ArticulationEnv {
    /// Wrap an articulation, allocating its solver state.
    #[must_use]
    pub fn new(articulation: Articulation) -> Self {
        let data = articulation.create_data();
        Self {
            articulation,
            data,
            rows: Vec::new(),
            last_report: None,
        }
    }

    /// The articulation.
    #[must_use]
    pub fn articulation(&self) -> &Articulation {
        &self.articulation
    }

    /// Mutable articulation, for setting state or accelerations between
    /// steps.
    pub fn articulation_mut(&mut self) -> &mut Articulation {
        &mut self.articulation
    }

    /// Solver state after the last step.
    #[must_use]
    pub fn data(&self) -> &ArticulationData {
        &self.data
    }

    /// Limit rows generated by the last step.
    #[must_use]
    pub fn rows(&self) -> &[LimitRow] {
        &self.rows
    }

    /// Projection report of the last successful step.
    #[must_use]
    pub fn last_report(&self) -> Option<&ProjectionReport> {
        self.last_report.as_ref()
    }

    fn step_with<F>(&mut self, solver: &ArticulationSolver, dt: f64, solve: &F) -> Option<SimError>
    where
        F: Fn(&mut ArticulationData, &[LimitRow]),
    {
        match solver.step(
            &mut self.articulation,
            &mut self.data,
            dt,
            &mut self.rows,
            |data, rows| solve(data, rows),
        ) {
            Ok(report) => {
                self.last_report = Some(report);
                None
            }
            Err(err) => Some(err),
        }
    }
}

/// Independent articulations stepped together.
#[derive(Debug)]
pub struct BatchArticulations {
    solver: ArticulationSolver,
    envs: Vec<ArticulationEnv>,
}

impl BatchArticulations {
    /// Batch over `articulations` with the reference solver.
    #[must_use]
    pub fn new(articulations: Vec<Articulation>) -> Self {
        Self::with_solver(ArticulationSolver::new(), articulations)
    }

    /// Batch with a custom solver.
    #[must_use]
    pub fn with_solver(solver: ArticulationSolver, articulations: Vec<Articulation>) -> Self {
        let envs = articulations.into_iter().map(ArticulationEnv::new).collect();
        Self { solver, envs }
    }

    /// Number of environments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envs.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    // ==================== Environment Access ====================

    /// Environment `i`, or `None` if out of range.
    #[must_use]
    pub fn env(&self, i: usize) -> Option<&ArticulationEnv> {
        self.envs.get(i)
    }

    /// Mutable environment `i`, or `None` if out of range.
    pub fn env_mut(&mut self, i: usize) -> Option<&mut ArticulationEnv> {
        self.envs.get_mut(i)
    }

    /// Iterator over all environments.
    pub fn envs(&self) -> impl ExactSizeIterator<Item = &ArticulationEnv> {
        self.envs.iter()
    }

    /// Mutable iterator over all environments.
    pub fn envs_mut(&mut self) -> impl ExactSizeIterator<Item = &mut ArticulationEnv> {
        self.envs.iter_mut()
    }

    // ==================== Stepping ====================

    /// Step every articulation with no external constraint solving.
    ///
    /// Returns per-environment errors; `None` means the step succeeded.
    pub fn step_all(&mut self, dt: f64) -> Vec<Option<SimError>> {
        self.step_all_with(dt, |_, _| {})
    }

    /// Step every articulation, resolving its limit rows with `solve`.
    ///
    /// # Determinism
    ///
    /// Output is independent of thread count and scheduling order. Each
    /// step is a pure function of its own environment.
    pub fn step_all_with<F>(&mut self, dt: f64, solve: F) -> Vec<Option<SimError>>
    where
        F: Fn(&mut ArticulationData, &[LimitRow]) + Sync,
    {
        let solver = &self.solver;
        let solve = &solve;

        #[cfg(feature = "parallel")]
        {
            use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};
            self.envs
                .par_iter_mut()
                .map(|env| env.step_with(solver, dt, solve))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.envs
                .iter_mut()
                .map(|env| env.step_with(solver, dt, solve))
                .collect()
        }
    }
}
