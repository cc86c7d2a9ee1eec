//! Per-articulation solver configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for one articulation's step.
///
/// # Example
///
/// ```
/// use sim_types::ArticulationConfig;
///
/// let config = ArticulationConfig::default()
///     .with_projection(8, 0.01)
///     .with_fixed_base(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArticulationConfig {
    /// Maximum post-integration projection passes.
    ///
    /// Reaching the cap is not an error; any residual separation is accepted.
    pub max_projection_iterations: u32,
    /// Joint separation (m) below which projection stops.
    pub separation_tolerance: f64,
    /// Iterations of the internal drive-load computation.
    pub internal_drive_iterations: u32,
    /// Iterations of the external drive-load computation.
    pub external_drive_iterations: u32,
    /// Keep internal drive loads between steps as a warm start.
    pub persist_internal_loads: bool,
    /// Keep external drive loads between steps as a warm start.
    pub persist_external_loads: bool,
    /// Pin the root link: impulses never change its velocity.
    pub fixed_base: bool,
}

impl Default for ArticulationConfig {
    fn default() -> Self {
        Self {
            max_projection_iterations: 4,
            separation_tolerance: 0.1,
            internal_drive_iterations: 4,
            external_drive_iterations: 4,
            persist_internal_loads: false,
            persist_external_loads: false,
            fixed_base: false,
        }
    }
}

impl ArticulationConfig {
    /// Tight projection and more drive iterations, with warm-started loads.
    #[must_use]
    pub fn high_fidelity() -> Self {
        Self {
            max_projection_iterations: 16,
            separation_tolerance: 0.001,
            internal_drive_iterations: 8,
            external_drive_iterations: 8,
            persist_internal_loads: true,
            persist_external_loads: true,
            ..Default::default()
        }
    }

    /// Single drive iteration and loose projection.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            max_projection_iterations: 2,
            separation_tolerance: 0.1,
            internal_drive_iterations: 1,
            external_drive_iterations: 1,
            ..Default::default()
        }
    }

    /// Set projection iteration cap and separation tolerance.
    #[must_use]
    pub fn with_projection(mut self, max_iterations: u32, tolerance: f64) -> Self {
        self.max_projection_iterations = max_iterations;
        self.separation_tolerance = tolerance;
        self
    }

    /// Set internal and external drive-load iteration counts.
    #[must_use]
    pub fn with_drive_iterations(mut self, internal: u32, external: u32) -> Self {
        self.internal_drive_iterations = internal;
        self.external_drive_iterations = external;
        self
    }

    /// Keep drive loads between steps.
    #[must_use]
    pub fn with_persistent_loads(mut self, internal: bool, external: bool) -> Self {
        self.persist_internal_loads = internal;
        self.persist_external_loads = external;
        self
    }

    /// Pin or free the root link.
    #[must_use]
    pub fn with_fixed_base(mut self, fixed: bool) -> Self {
        self.fixed_base = fixed;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConfig`](crate::SimError::InvalidConfig) if
    /// the separation tolerance is negative or not finite, or if a drive
    /// iteration count exceeds `u16::MAX`.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.separation_tolerance.is_finite() || self.separation_tolerance < 0.0 {
            return Err(crate::SimError::invalid_config(
                "separation tolerance must be non-negative and finite",
            ));
        }
        if self.internal_drive_iterations > u32::from(u16::MAX)
            || self.external_drive_iterations > u32::from(u16::MAX)
        {
            return Err(crate::SimError::invalid_config(
                "drive iteration counts must fit in 16 bits",
            ));
        }
        Ok(())
    }
}

/// Check a step size.
///
/// # Errors
///
/// Returns [`SimError::InvalidTimestep`](crate::SimError::InvalidTimestep)
/// unless `dt` is positive and finite.
pub fn validate_timestep(dt: f64) -> crate::Result<()> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(crate::SimError::InvalidTimestep(dt));
    }
    if dt > 1.0 {
        return Err(crate::SimError::invalid_config(
            "timestep > 1 second is likely an error",
        ));
    }
    Ok(())
}
