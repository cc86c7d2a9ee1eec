//! Data model for reduced-coordinate articulations.
//!
//! This crate provides the externally owned description of an articulation
//! that the solver in `sim-articulation` reads and writes back:
//!
//! - [`LinkBody`] - Pose, velocity, external acceleration, and mass of a link
//! - [`ArticulationJoint`] - Attachment frames, drive, and swing/twist limits
//! - [`ArticulationConfig`] - Projection and drive iteration settings
//!
//! # Design Philosophy
//!
//! These types are **pure data**. The solver keeps all per-step derived state
//! (factorizations, deferred impulses) in its own scratch buffers, so a host
//! simulation can own, serialize, and edit links and joints freely between
//! steps.
//!
//! # Conventions
//!
//! - Poses are center-of-mass frames with principal inertia axes.
//! - Velocities are world-frame, at the center of mass.
//! - Joint twist is about the attachment frame's X axis.
//! - Right-handed, Z up.
//!
//! # Example
//!
//! ```
//! use sim_types::{LinkBody, MassProperties, Pose, Twist};
//! use nalgebra::{Point3, Vector3};
//!
//! let link = LinkBody::new(
//!     Pose::from_position(Point3::new(0.0, 0.0, 1.0)),
//!     MassProperties::sphere(1.0, 0.1),
//! )
//! .with_acceleration(Twist::linear(Vector3::new(0.0, 0.0, -9.81)));
//!
//! assert_eq!(link.pose.position.z, 1.0);
//! assert!(link.twist.linear.norm() < 1e-10);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-types/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod error;
mod joint;

pub use body::{LinkBody, MassProperties, Pose, Twist};
pub use config::{ArticulationConfig, validate_timestep};
pub use error::SimError;
pub use joint::{
    ArticulationJoint, DriveType, JointDrive, SwingLimit, TangentialSpring, TwistLimit,
    tan_quarter,
};

// Re-export math types for convenience
pub use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

/// Result type for articulation construction and validation.
pub type Result<T> = std::result::Result<T, SimError>;
