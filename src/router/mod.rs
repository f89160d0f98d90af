//! Router code generation.
//!
//! [`generate_router`] runs the whole pipeline: selectors are collected from
//! every module ABI ([`collect_selectors`]), checked for collisions
//! ([`find_selector_collisions`]), sorted into a [`DispatchTree`] and finally
//! rendered ([`render_router`]). Any failure aborts the pipeline before a
//! single line of source is produced.

mod collision;
mod dispatch;
mod render;
mod selector;
mod template;

pub use collision::{SelectorCollision, find_selector_collisions};
pub use dispatch::{DEFAULT_MAX_LEAF_SIZE, DispatchTree};
pub use render::{constant_name, render_router};
pub use selector::{COVERAGE_PREFIX, SelectorFilter, collect_selectors, extract_selectors};
pub use template::{
    DEFAULT_CONSTANTS_INDENT, DEFAULT_DISPATCH_INDENT, DEFAULT_TEMPLATE, DISPATCH_PLACEHOLDER,
    MODULE_CONSTANTS_PLACEHOLDER, ROUTER_NAME_PLACEHOLDER, RouterTemplate, TemplateError,
};

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    types::ContractData,
};

/// Default name of the generated router contract.
pub const DEFAULT_ROUTER_NAME: &str = "Router";

/// Router generation settings.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    router_name: String,
    max_leaf_size: usize,
    filter: SelectorFilter,
    template: RouterTemplate,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            router_name: DEFAULT_ROUTER_NAME.to_string(),
            max_leaf_size: DEFAULT_MAX_LEAF_SIZE,
            filter: SelectorFilter::default(),
            template: RouterTemplate::default(),
        }
    }
}

impl RouterConfig {
    pub fn new(router_name: impl Into<String>) -> Self {
        Self {
            router_name: router_name.into(),
            ..Self::default()
        }
    }

    /// Sets the maximum number of `case`s per `switch` (default: 9).
    pub fn with_max_leaf_size(mut self, max_leaf_size: usize) -> Self {
        self.max_leaf_size = max_leaf_size;
        self
    }

    /// Sets the function name filter (default: skip coverage instrumentation).
    pub fn with_filter(mut self, filter: SelectorFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_template(mut self, template: RouterTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn router_name(&self) -> &str {
        &self.router_name
    }

    pub fn max_leaf_size(&self) -> usize {
        self.max_leaf_size
    }

    pub fn filter(&self) -> &SelectorFilter {
        &self.filter
    }

    pub fn template(&self) -> &RouterTemplate {
        &self.template
    }
}

/// Builds the dispatch tree over the selectors of all the modules.
///
/// # Errors
///
/// * [`Error::NoContracts`] if `contracts` is empty.
/// * [`Error::SelectorCollisions`] listing every collision found.
/// * Selector extraction and tree building errors.
pub fn build_dispatch_tree(contracts: &[ContractData], config: &RouterConfig) -> Result<DispatchTree> {
    if contracts.is_empty() {
        return Err(Error::NoContracts);
    }

    let selectors = collect_selectors(contracts, config.filter())?;
    debug!(
        modules = contracts.len(),
        selectors = selectors.len(),
        "Collected module selectors"
    );

    let collisions = find_selector_collisions(&selectors);
    if !collisions.is_empty() {
        for collision in &collisions {
            warn!(%collision, "Selector collision");
        }
        return Err(Error::SelectorCollisions(collisions));
    }

    let sorted = selectors
        .into_iter()
        .sorted_by_key(|s| s.selector())
        .collect();
    DispatchTree::build(sorted, config.max_leaf_size())
}

/// Generates the router source for the given modules.
pub fn generate_router(contracts: &[ContractData], config: &RouterConfig) -> Result<String> {
    let tree = build_dispatch_tree(contracts, config)?;
    let source = render_router(config.router_name(), &tree, contracts, config.template())?;
    info!(
        router = config.router_name(),
        modules = contracts.len(),
        selectors = tree.len(),
        depth = tree.depth(),
        "Generated router"
    );
    Ok(source)
}
