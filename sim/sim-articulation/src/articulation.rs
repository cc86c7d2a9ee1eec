//! Articulation description: links, inbound joints, and configuration.
//!
//! An [`Articulation`] is the externally owned side of the solver. It holds
//! link bodies and joints in index order (parents precede children) and is
//! read at the start of a step and written back at the end. Everything the
//! solver derives lives in [`ArticulationData`].
//!
//! # Example
//!
//! ```
//! use sim_articulation::Articulation;
//! use sim_types::{ArticulationJoint, LinkBody, MassProperties, Point3, Pose};
//!
//! let root = LinkBody::new(Pose::identity(), MassProperties::sphere(1.0, 0.1));
//! let mut builder = Articulation::builder(root);
//! let child = builder.add_link(
//!     0,
//!     LinkBody::new(
//!         Pose::from_position(Point3::new(1.0, 0.0, 0.0)),
//!         MassProperties::sphere(1.0, 0.1),
//!     ),
//!     ArticulationJoint::new(
//!         Pose::from_position(Point3::new(0.5, 0.0, 0.0)),
//!         Pose::from_position(Point3::new(-0.5, 0.0, 0.0)),
//!     ),
//! );
//! let articulation = builder.build().unwrap();
//!
//! assert_eq!(child, 1);
//! assert_eq!(articulation.link_count(), 2);
//! ```

use sim_types::{ArticulationConfig, ArticulationJoint, LinkBody, Result, SimError};

use crate::data::ArticulationData;
use crate::spatial::{SpatialInertia, SpatialVector};
use crate::topology::Topology;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One link and the joint connecting it to its parent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArticulationLink {
    /// Rigid body state.
    pub body: LinkBody,
    /// Inbound joint; `None` only for the root.
    pub joint: Option<ArticulationJoint>,
}

/// A validated tree of links.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Articulation {
    topology: Topology,
    links: Vec<ArticulationLink>,
    config: ArticulationConfig,
}

impl Articulation {
    /// Start building an articulation from its root link.
    #[must_use]
    pub fn builder(root: LinkBody) -> ArticulationBuilder {
        ArticulationBuilder {
            parents: vec![None],
            links: vec![ArticulationLink {
                body: root,
                joint: None,
            }],
            config: ArticulationConfig::default(),
        }
    }

    /// Link tree.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// All links in index order.
    #[must_use]
    pub fn links(&self) -> &[ArticulationLink] {
        &self.links
    }

    /// Body of `link`.
    ///
    /// # Panics
    ///
    /// Panics if `link` is out of range.
    #[must_use]
    pub fn body(&self, link: usize) -> &LinkBody {
        &self.links[link].body
    }

    /// Mutable body of `link`, for editing state between steps.
    ///
    /// # Panics
    ///
    /// Panics if `link` is out of range.
    pub fn body_mut(&mut self, link: usize) -> &mut LinkBody {
        &mut self.links[link].body
    }

    /// Inbound joint of `link`; `None` for the root or out of range.
    #[must_use]
    pub fn joint(&self, link: usize) -> Option<&ArticulationJoint> {
        self.links.get(link)?.joint.as_ref()
    }

    /// Mutable inbound joint of `link`.
    ///
    /// Edits are not revalidated; call [`validate`](Self::validate) after
    /// changing limits or compliance.
    pub fn joint_mut(&mut self, link: usize) -> Option<&mut ArticulationJoint> {
        self.links.get_mut(link)?.joint.as_mut()
    }

    /// Every inbound joint with its child link index.
    pub fn joints(&self) -> impl Iterator<Item = (usize, &ArticulationJoint)> {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(i, link)| link.joint.as_ref().map(|j| (i, j)))
    }

    /// Step configuration.
    #[must_use]
    pub fn config(&self) -> &ArticulationConfig {
        &self.config
    }

    /// Replace the configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error and leaves the old configuration in
    /// place if `config` is invalid.
    pub fn set_config(&mut self, config: ArticulationConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Allocate solver state sized for this articulation.
    #[must_use]
    pub fn create_data(&self) -> ArticulationData {
        ArticulationData::new(self.topology.clone())
    }

    /// Check links, joints and configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid mass, joint, pose or configuration value.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        for (i, link) in self.links.iter().enumerate() {
            link.body.mass.validate()?;
            if !link.body.pose.is_finite() || !link.body.twist.is_finite() {
                return Err(SimError::invalid_joint(i, "link state must be finite"));
            }
            match (&link.joint, i) {
                (Some(_), 0) => {
                    return Err(SimError::invalid_joint(0, "root link cannot have a joint"));
                }
                (None, i) if i != 0 => {
                    return Err(SimError::invalid_joint(i, "missing inbound joint"));
                }
                (Some(joint), i) => joint.validate(i)?,
                (None, _) => {}
            }
        }
        Ok(())
    }

    /// Total spatial momentum about the world origin.
    ///
    /// Linear part is `Σ m·v`; angular part is `Σ (I·ω + p × m·v)`.
    #[must_use]
    pub fn momentum(&self) -> SpatialVector {
        self.links
            .iter()
            .fold(SpatialVector::zero(), |acc, link| {
                let body = &link.body;
                let inertia = SpatialInertia::from_body(
                    body.mass.mass,
                    body.mass.world_inertia(&body.pose.rotation),
                );
                let momentum = inertia.mul_vec(&SpatialVector::from(body.twist));
                acc + momentum.translate_force(&body.pose.position.coords)
            })
    }
}

/// Incremental [`Articulation`] construction.
#[derive(Debug, Clone)]
pub struct ArticulationBuilder {
    parents: Vec<Option<usize>>,
    links: Vec<ArticulationLink>,
    config: ArticulationConfig,
}

impl ArticulationBuilder {
    /// Attach `body` to `parent` through `joint`, returning its index.
    ///
    /// Indices are assigned in insertion order. Parent validity is checked
    /// by [`build`](Self::build).
    pub fn add_link(&mut self, parent: usize, body: LinkBody, joint: ArticulationJoint) -> usize {
        self.parents.push(Some(parent));
        self.links.push(ArticulationLink {
            body,
            joint: Some(joint),
        });
        self.links.len() - 1
    }

    /// Set the step configuration.
    #[must_use]
    pub fn with_config(mut self, config: ArticulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of links added so far, root included.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Fails on a malformed tree, too many links, invalid mass properties,
    /// an invalid joint, or an invalid configuration.
    pub fn build(self) -> Result<Articulation> {
        let topology = Topology::new(&self.parents)?;
        let articulation = Articulation {
            topology,
            links: self.links,
            config: self.config,
        };
        articulation.validate()?;
        tracing::debug!(
            links = articulation.link_count(),
            fixed_base = articulation.config.fixed_base,
            "articulation built"
        );
        Ok(articulation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::topology::MAX_LINKS;
    use approx::assert_relative_eq;
    use sim_types::{MassProperties, Point3, Pose, Twist, Vector3};

    fn body(x: f64) -> LinkBody {
        LinkBody::new(
            Pose::from_position(Point3::new(x, 0.0, 0.0)),
            MassProperties::sphere(1.0, 0.1),
        )
    }

    fn joint() -> ArticulationJoint {
        ArticulationJoint::new(
            Pose::from_position(Point3::new(0.5, 0.0, 0.0)),
            Pose::from_position(Point3::new(-0.5, 0.0, 0.0)),
        )
    }

    #[test]
    fn test_build_chain() {
        let mut builder = Articulation::builder(body(0.0));
        let a = builder.add_link(0, body(1.0), joint());
        let b = builder.add_link(a, body(2.0), joint());
        let articulation = builder.build().unwrap();

        assert_eq!(b, 2);
        assert_eq!(articulation.topology().parent(2), Some(1));
        assert!(articulation.joint(0).is_none());
        assert_eq!(articulation.joints().count(), 2);
        assert_eq!(articulation.create_data().link_count(), 3);
    }

    #[test]
    fn test_parent_must_precede_child() {
        let mut builder = Articulation::builder(body(0.0));
        builder.add_link(2, body(1.0), joint());
        builder.add_link(0, body(2.0), joint());
        let err = builder.build().unwrap_err();
        assert!(err.is_topology_error());
    }

    #[test]
    fn test_too_many_links() {
        let mut builder = Articulation::builder(body(0.0));
        for i in 0..MAX_LINKS {
            builder.add_link(i, body(i as f64 + 1.0), joint());
        }
        assert!(matches!(
            builder.build(),
            Err(SimError::TooManyLinks { count: 65, .. })
        ));
    }

    #[test]
    fn test_invalid_compliance_rejected() {
        let mut builder = Articulation::builder(body(0.0));
        builder.add_link(0, body(1.0), joint().with_compliance(0.0, 1.0));
        assert_eq!(builder.build().unwrap_err(), SimError::InvalidCompliance(0.0));
    }

    #[test]
    fn test_invalid_mass_rejected() {
        let mut builder = Articulation::builder(body(0.0));
        let mut light = body(1.0);
        light.mass.mass = -1.0;
        builder.add_link(0, light, joint());
        assert!(matches!(
            builder.build(),
            Err(SimError::InvalidMassProperties { .. })
        ));
    }

    #[test]
    fn test_set_config_keeps_old_on_error() {
        let mut articulation = Articulation::builder(body(0.0)).build().unwrap();
        let bad = ArticulationConfig::default().with_projection(4, -1.0);
        assert!(articulation.set_config(bad).is_err());
        assert_eq!(articulation.config(), &ArticulationConfig::default());
    }

    #[test]
    fn test_momentum_about_origin() {
        let mut builder = Articulation::builder(body(0.0));
        builder.add_link(0, body(1.0), joint());
        let mut articulation = builder.build().unwrap();
        articulation.body_mut(1).twist = Twist::linear(Vector3::new(0.0, 2.0, 0.0));

        let p = articulation.momentum();
        assert_relative_eq!(p.linear, Vector3::new(0.0, 2.0, 0.0));
        // r × m·v = (1, 0, 0) × (0, 2, 0).
        assert_relative_eq!(p.angular, Vector3::new(0.0, 0.0, 2.0));
    }
}
