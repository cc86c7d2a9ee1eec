//! Error types for articulation construction and validation.
//!
//! Per-step solver operations never fail; they degrade numerically instead.
//! These errors are raised only when an articulation, its joints, or its
//! configuration are built or validated.

use thiserror::Error;

/// Errors that can occur while building or validating an articulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// An articulation must contain at least a root link.
    #[error("articulation has no links")]
    EmptyArticulation,

    /// Link count exceeds the fixed per-articulation capacity.
    #[error("articulation has {count} links, capacity is {max}")]
    TooManyLinks {
        /// Number of links requested.
        count: usize,
        /// Maximum supported link count.
        max: usize,
    },

    /// A link's parent index is invalid.
    ///
    /// Parents must precede their children so that every tree pass can run
    /// in index order.
    #[error("link {link} has invalid parent {parent}")]
    InvalidParent {
        /// The offending link.
        link: usize,
        /// The parent index it referenced.
        parent: usize,
    },

    /// A non-root link has no inbound joint, or the root has one.
    #[error("link {link}: {reason}")]
    InvalidJoint {
        /// The offending link.
        link: usize,
        /// Description of the problem.
        reason: String,
    },

    /// Scratch data was sized for a different articulation.
    #[error("link count mismatch: expected {expected}, got {actual}")]
    LinkCountMismatch {
        /// Link count the scratch data was allocated for.
        expected: usize,
        /// Link count of the articulation.
        actual: usize,
    },

    /// Scratch data was built for a tree with different parents.
    #[error("topology mismatch at link {link}: data has parent {expected}, articulation has {actual}")]
    TopologyMismatch {
        /// First link whose parent differs.
        link: usize,
        /// Parent in the scratch data's tree.
        expected: usize,
        /// Parent in the articulation's tree.
        actual: usize,
    },

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Drive compliance must be positive and finite.
    #[error("invalid compliance: {0} (must be positive and finite)")]
    InvalidCompliance(f64),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },
}

impl SimError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Create an invalid joint error for the given link.
    #[must_use]
    pub fn invalid_joint(link: usize, reason: impl Into<String>) -> Self {
        Self::InvalidJoint {
            link,
            reason: reason.into(),
        }
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::InvalidTimestep(_) | Self::InvalidCompliance(_)
        )
    }

    /// Check if this error describes a malformed tree.
    #[must_use]
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyArticulation | Self::TooManyLinks { .. } | Self::InvalidParent { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::TooManyLinks { count: 70, max: 64 };
        assert!(err.to_string().contains("70"));
        assert!(err.to_string().contains("64"));

        let err = SimError::InvalidParent { link: 3, parent: 5 };
        assert!(err.to_string().contains("parent 5"));

        let err = SimError::TopologyMismatch {
            link: 2,
            expected: 1,
            actual: 0,
        };
        assert!(err.to_string().contains("link 2"));
        assert!(!err.is_topology_error());

        let err = SimError::invalid_joint(2, "missing inbound joint");
        assert!(err.to_string().contains("missing inbound joint"));
    }

    #[test]
    fn test_error_predicates() {
        let err = SimError::invalid_config("bad value");
        assert!(err.is_config_error());
        assert!(!err.is_topology_error());

        let err = SimError::InvalidCompliance(0.0);
        assert!(err.is_config_error());

        let err = SimError::EmptyArticulation;
        assert!(err.is_topology_error());
        assert!(!err.is_config_error());
    }
}
