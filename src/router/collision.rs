//! Selector collision detection across router modules.

use std::fmt;

use alloy::primitives::{Selector, hex};
use itertools::Itertools;

use crate::types::FunctionSelector;

/// Selector declared by more than one function behind the same router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorCollision {
    selector: Selector,
    functions: Vec<FunctionSelector>,
}

impl SelectorCollision {
    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Every function sharing the selector, in input order.
    pub fn functions(&self) -> &[FunctionSelector] {
        &self.functions
    }

    /// Names of the contracts declaring the selector, in input order.
    pub fn contract_names(&self) -> Vec<&str> {
        self.functions
            .iter()
            .map(FunctionSelector::contract_name)
            .unique()
            .collect()
    }
}

impl fmt::Display for SelectorCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "selector {} is declared by {}",
            hex::encode_prefixed(self.selector),
            self.functions.iter().join(", ")
        )
    }
}

/// Groups selectors by value and reports every group with more than one
/// function.
///
/// Reports follow the order in which each colliding selector was first seen,
/// and list all the functions of the group rather than the first pair.
pub fn find_selector_collisions<'a>(
    selectors: impl IntoIterator<Item = &'a FunctionSelector>,
) -> Vec<SelectorCollision> {
    let selectors = selectors.into_iter().collect_vec();
    let mut groups = selectors
        .iter()
        .map(|s| (s.selector(), (*s).clone()))
        .into_group_map();

    selectors
        .iter()
        .map(|s| s.selector())
        .unique()
        .filter_map(|selector| {
            let functions = groups.remove(&selector)?;
            (functions.len() > 1).then_some(SelectorCollision {
                selector,
                functions,
            })
        })
        .collect()
}
