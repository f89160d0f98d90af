//! Binary dispatch tree over sorted selectors.
//!
//! Dispatching in the router is a binary search over selector ranges
//! (`if lt(sig, mid) { ... }`) bottoming out in flat `switch` statements.
//! Deeper trees cost more comparisons per call, larger leaves produce larger
//! jump tables, the leaf size bound balances the two.

use alloy::primitives::Selector;
use itertools::Itertools;

use crate::{
    error::{Error, Result},
    types::FunctionSelector,
};

/// Default maximum number of `case`s per `switch` statement.
pub const DEFAULT_MAX_LEAF_SIZE: usize = 9;

/// Immutable binary search tree over selectors.
///
/// All selectors of a `left` subtree are strictly less than all selectors of
/// the matching `right` subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchTree {
    Leaf(Vec<FunctionSelector>),
    Branch {
        left: Box<DispatchTree>,
        right: Box<DispatchTree>,
    },
}

impl DispatchTree {
    /// Builds the tree over strictly increasing selectors, halving every node
    /// above `max_leaf_size` at the ceiling of its midpoint.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidLeafSize`] if `max_leaf_size` is zero.
    /// * [`Error::NoSelectors`] if there is nothing to dispatch.
    /// * [`Error::UnsortedSelectors`] if the input is unsorted or has
    ///   duplicates.
    pub fn build(selectors: Vec<FunctionSelector>, max_leaf_size: usize) -> Result<Self> {
        if max_leaf_size == 0 {
            return Err(Error::InvalidLeafSize);
        }
        if selectors.is_empty() {
            return Err(Error::NoSelectors);
        }
        if let Some((previous, next)) = selectors
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.selector() >= b.selector())
        {
            return Err(Error::UnsortedSelectors {
                previous: previous.selector(),
                next: next.selector(),
            });
        }
        Ok(Self::split(selectors, max_leaf_size))
    }

    fn split(mut selectors: Vec<FunctionSelector>, max_leaf_size: usize) -> Self {
        if selectors.len() <= max_leaf_size {
            return Self::Leaf(selectors);
        }
        let right = selectors.split_off(selectors.len().div_ceil(2));
        Self::Branch {
            left: Box::new(Self::split(selectors, max_leaf_size)),
            right: Box::new(Self::split(right, max_leaf_size)),
        }
    }

    /// Smallest selector of the subtree.
    pub fn min_selector(&self) -> Option<Selector> {
        match self {
            Self::Leaf(selectors) => selectors.first().map(FunctionSelector::selector),
            Self::Branch { left, .. } => left.min_selector(),
        }
    }

    /// Value separating the subtrees of a branch: the smallest selector of
    /// its right subtree.
    pub fn split_selector(&self) -> Option<Selector> {
        match self {
            Self::Leaf(_) => None,
            Self::Branch { right, .. } => right.min_selector(),
        }
    }

    /// Number of branch levels above the deepest leaf.
    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf(_) => 0,
            Self::Branch { left, right } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Leaves in selector order.
    pub fn leaves(&self) -> Vec<&[FunctionSelector]> {
        match self {
            Self::Leaf(selectors) => vec![selectors.as_slice()],
            Self::Branch { left, right } => {
                let mut leaves = left.leaves();
                leaves.extend(right.leaves());
                leaves
            }
        }
    }

    /// All selectors in ascending order.
    pub fn selectors(&self) -> impl Iterator<Item = &FunctionSelector> {
        self.leaves().into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(selectors) => selectors.len(),
            Self::Branch { left, right } => left.len() + right.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::fixed_bytes;

    use super::*;

    fn sorted_selectors(count: u32) -> Vec<FunctionSelector> {
        // Odd multiplier keeps values distinct while spreading them over the
        // whole range, exercising big-endian ordering.
        (0..count)
            .map(|i| (i, i.wrapping_mul(0x9e37_79b9)))
            .sorted_by_key(|(_, value)| *value)
            .map(|(i, value)| {
                FunctionSelector::new(
                    format!("Module{}", i % 7),
                    format!("fn{i}"),
                    format!("fn{i}()"),
                    Selector::from(value.to_be_bytes()),
                )
            })
            .collect()
    }

    fn assert_ordered(tree: &DispatchTree) {
        if let DispatchTree::Branch { left, right } = tree {
            let left_max = left.selectors().map(|s| s.selector()).max().unwrap();
            let right_min = right.min_selector().unwrap();
            assert!(left_max < right_min);
            assert_ordered(left);
            assert_ordered(right);
        }
    }

    #[test]
    fn test_single_selector_is_depth_zero() {
        let tree = DispatchTree::build(sorted_selectors(1), DEFAULT_MAX_LEAF_SIZE).unwrap();

        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.split_selector(), None);
    }

    #[test]
    fn test_exactly_max_leaf_size_stays_a_leaf() {
        let tree = DispatchTree::build(sorted_selectors(9), 9).unwrap();

        assert!(matches!(tree, DispatchTree::Leaf(ref s) if s.len() == 9));
    }

    #[test]
    fn test_splits_at_ceiling_of_half() {
        let tree = DispatchTree::build(sorted_selectors(11), 9).unwrap();

        let DispatchTree::Branch { left, right } = &tree else {
            panic!("expected a branch");
        };
        assert_eq!(left.len(), 6);
        assert_eq!(right.len(), 5);
        assert_eq!(tree.split_selector(), right.min_selector());
    }

    #[test]
    fn test_leaf_bound_and_order_hold_for_any_size() {
        for count in [1, 2, 8, 9, 10, 17, 18, 19, 100, 513, 1000, 4097, 10_000] {
            let selectors = sorted_selectors(count);
            let len = selectors.len();
            let tree = DispatchTree::build(selectors.clone(), DEFAULT_MAX_LEAF_SIZE).unwrap();

            assert_eq!(tree.len(), len);
            for leaf in tree.leaves() {
                assert!(!leaf.is_empty() && leaf.len() <= DEFAULT_MAX_LEAF_SIZE);
                assert!(leaf.iter().tuple_windows().all(|(a, b)| a.selector() < b.selector()));
            }
            assert_eq!(tree.selectors().cloned().collect::<Vec<_>>(), selectors);
            assert_ordered(&tree);
        }
    }

    #[test]
    fn test_custom_leaf_size() {
        let tree = DispatchTree::build(sorted_selectors(64), 4).unwrap();

        assert!(tree.leaves().iter().all(|leaf| leaf.len() <= 4));
        assert_eq!(tree.depth(), 4);
    }

    #[test]
    fn test_rejects_zero_leaf_size() {
        assert!(matches!(
            DispatchTree::build(sorted_selectors(3), 0),
            Err(Error::InvalidLeafSize)
        ));
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(
            DispatchTree::build(vec![], DEFAULT_MAX_LEAF_SIZE),
            Err(Error::NoSelectors)
        ));
    }

    #[test]
    fn test_rejects_duplicates_instead_of_picking_one() {
        let selector = fixed_bytes!("0x0000000a");
        let selectors = vec![
            FunctionSelector::new("A", "foo", "foo()", selector),
            FunctionSelector::new("B", "foo", "foo()", selector),
        ];

        assert!(matches!(
            DispatchTree::build(selectors, DEFAULT_MAX_LEAF_SIZE),
            Err(Error::UnsortedSelectors { .. })
        ));
    }
}
