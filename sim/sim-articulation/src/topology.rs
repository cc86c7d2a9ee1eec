//! Fixed-capacity tree description with bitmask-encoded relationships.
//!
//! Links live in a flat array, indexed `0..link_count` with `0` the root.
//! Every parent precedes its children, so a forward sweep visits the tree
//! root-to-leaf and a reverse sweep visits it leaf-to-root.
//!
//! Two 64-bit masks per link encode the tree:
//!
//! ```text
//! children(i)      bit c set  ⇔  parent(c) == i
//! path_to_root(i)  bit a set  ⇔  a == i or a is an ancestor of i
//! ```
//!
//! Because ancestors have lower indices than descendants, the lowest set bit
//! of any subset of a path is its most rootward link and the highest set bit
//! its most leafward one. Ancestor tests and lowest-common-ancestor queries
//! are single bit operations.

use sim_types::{Result, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum links per articulation; one bit per link in a `u64`.
pub const MAX_LINKS: usize = 64;

/// Index of the lowest set bit. `mask` must be non-zero.
#[must_use]
pub fn lowest_set_bit(mask: u64) -> usize {
    debug_assert!(mask != 0);
    mask.trailing_zeros() as usize
}

/// Index of the highest set bit. `mask` must be non-zero.
#[must_use]
pub fn highest_set_bit(mask: u64) -> usize {
    debug_assert!(mask != 0);
    63 - mask.leading_zeros() as usize
}

/// Iterator over the set bits of a mask, lowest first.
#[derive(Debug, Clone, Copy)]
pub struct BitIter(u64);

impl BitIter {
    /// Iterate over `mask`.
    #[must_use]
    pub const fn new(mask: u64) -> Self {
        Self(mask)
    }
}

impl Iterator for BitIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let bit = lowest_set_bit(self.0);
        self.0 &= self.0 - 1;
        Some(bit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for BitIter {}

/// Parent indices and derived bitmasks of one articulation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Topology {
    parents: Vec<usize>,
    children: Vec<u64>,
    path_to_root: Vec<u64>,
}

impl Topology {
    /// Build from per-link parent indices; the root's entry is `None`.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty, exceeds [`MAX_LINKS`], has a parentless
    /// non-root link, or has a parent that does not precede its child.
    pub fn new(parents: &[Option<usize>]) -> Result<Self> {
        let count = parents.len();
        if count == 0 {
            return Err(SimError::EmptyArticulation);
        }
        if count > MAX_LINKS {
            return Err(SimError::TooManyLinks {
                count,
                max: MAX_LINKS,
            });
        }
        if let Some(parent) = parents[0] {
            return Err(SimError::InvalidParent { link: 0, parent });
        }

        let mut topology = Self {
            parents: vec![0; count],
            children: vec![0; count],
            path_to_root: vec![1; count],
        };

        for (link, parent) in parents.iter().enumerate().skip(1) {
            let parent = match parent {
                Some(p) if *p < link => *p,
                Some(p) => {
                    return Err(SimError::InvalidParent { link, parent: *p });
                }
                None => {
                    return Err(SimError::invalid_joint(link, "non-root link has no parent"));
                }
            };
            topology.parents[link] = parent;
            topology.children[parent] |= 1 << link;
            topology.path_to_root[link] = topology.path_to_root[parent] | (1 << link);
        }

        Ok(topology)
    }

    /// A serial chain `0 ← 1 ← … ← n-1`.
    ///
    /// # Errors
    ///
    /// Fails if `link_count` is zero or exceeds [`MAX_LINKS`].
    pub fn chain(link_count: usize) -> Result<Self> {
        let parents: Vec<Option<usize>> = (0..link_count).map(|i| i.checked_sub(1)).collect();
        Self::new(&parents)
    }

    /// Number of links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.parents.len()
    }

    /// Parent of `link`, or `None` for the root.
    #[must_use]
    pub fn parent(&self, link: usize) -> Option<usize> {
        (link != 0).then(|| self.parents[link])
    }

    /// Parent of a non-root link.
    #[inline]
    pub(crate) fn parent_of(&self, link: usize) -> usize {
        debug_assert!(link != 0);
        self.parents[link]
    }

    /// Children of `link` as a bitmask.
    #[must_use]
    pub fn children(&self, link: usize) -> u64 {
        self.children[link]
    }

    /// `link` and all its ancestors as a bitmask.
    #[must_use]
    pub fn path_to_root(&self, link: usize) -> u64 {
        self.path_to_root[link]
    }

    /// Whether `ancestor` lies on the path from `link` to the root.
    ///
    /// A link is its own ancestor.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: usize, link: usize) -> bool {
        self.path_to_root[link] & (1 << ancestor) != 0
    }

    /// Deepest link on both root paths.
    #[must_use]
    pub fn common_ancestor(&self, a: usize, b: usize) -> usize {
        highest_set_bit(self.path_to_root[a] & self.path_to_root[b])
    }

    /// Number of joints between `link` and the root.
    #[must_use]
    pub fn depth(&self, link: usize) -> u32 {
        self.path_to_root[link].count_ones() - 1
    }

    /// Mask with one bit per link.
    #[must_use]
    pub fn all_links(&self) -> u64 {
        if self.link_count() == MAX_LINKS {
            u64::MAX
        } else {
            (1 << self.link_count()) - 1
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    //        0
    //       / \
    //      1   2
    //     / \   \
    //    3   4   5
    fn tree() -> Topology {
        Topology::new(&[None, Some(0), Some(0), Some(1), Some(1), Some(2)]).unwrap()
    }

    #[test]
    fn test_masks() {
        let t = tree();
        assert_eq!(t.children(0), 0b110);
        assert_eq!(t.children(1), 0b11000);
        assert_eq!(t.children(3), 0);
        assert_eq!(t.path_to_root(0), 0b1);
        assert_eq!(t.path_to_root(4), 0b10011);
        assert_eq!(t.path_to_root(5), 0b100101);
        assert_eq!(t.depth(5), 2);
        assert_eq!(t.parent(0), None);
        assert_eq!(t.parent(4), Some(1));
    }

    #[test]
    fn test_ancestry() {
        let t = tree();
        assert!(t.is_ancestor(0, 5));
        assert!(t.is_ancestor(1, 3));
        assert!(t.is_ancestor(3, 3));
        assert!(!t.is_ancestor(2, 3));

        assert_eq!(t.common_ancestor(3, 4), 1);
        assert_eq!(t.common_ancestor(3, 5), 0);
        assert_eq!(t.common_ancestor(1, 4), 1);
        assert_eq!(t.common_ancestor(5, 5), 5);
    }

    #[test]
    fn test_bit_iter() {
        let bits: Vec<usize> = BitIter::new(0b1010_0110).collect();
        assert_eq!(bits, vec![1, 2, 5, 7]);
        assert_eq!(BitIter::new(0).count(), 0);
        assert_eq!(highest_set_bit(1 << 63), 63);
        assert_eq!(lowest_set_bit(0b1000), 3);
    }

    #[test]
    fn test_validation() {
        assert_eq!(Topology::new(&[]), Err(SimError::EmptyArticulation));
        assert_eq!(
            Topology::new(&[None, Some(2), Some(0)]),
            Err(SimError::InvalidParent { link: 1, parent: 2 })
        );
        assert!(Topology::new(&[Some(0)]).is_err());
        assert!(Topology::new(&[None, None]).is_err());
        assert!(matches!(
            Topology::chain(MAX_LINKS + 1),
            Err(SimError::TooManyLinks { count: 65, max: 64 })
        ));
    }

    #[test]
    fn test_full_capacity_chain() {
        let t = Topology::chain(MAX_LINKS).unwrap();
        assert_eq!(t.path_to_root(63), u64::MAX);
        assert_eq!(t.all_links(), u64::MAX);
        assert_eq!(t.common_ancestor(63, 40), 40);
    }
}
