use std::{fmt::Display, path::PathBuf};

use alloy::primitives::Selector;
use itertools::Itertools;

use crate::{
    router::SelectorCollision,
    storage::{SlotCollision, StorageError, StorageMutation},
};

/// Error returned by the router generation and storage verification
/// pipelines.
///
/// Every variant is fatal: the pipeline that produced it has not emitted
/// any output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid ABI fragment #{index} of {contract}: {reason}")]
    InvalidAbiFragment {
        contract: String,
        index: usize,
        reason: String,
    },

    #[error("router requires at least one module contract")]
    NoContracts,

    #[error("no selectors left to dispatch after filtering")]
    NoSelectors,

    #[error("maximum number of selectors per dispatch leaf must be positive")]
    InvalidLeafSize,

    #[error("selectors must be strictly increasing, {previous} is followed by {next}")]
    UnsortedSelectors { previous: Selector, next: Selector },

    #[error("module {contract} clashes with another module on constant {constant}")]
    DuplicateModule { contract: String, constant: String },

    #[error("selector {selector} refers to unknown module {contract}")]
    UnknownModule { contract: String, selector: Selector },

    #[error("no deployed address for module {0}")]
    MissingDeployment(String),

    #[error("duplicate selectors: {}", join(.0))]
    SelectorCollisions(Vec<SelectorCollision>),

    #[error("storage slot collisions: {}", join(.0))]
    SlotCollisions(Vec<SlotCollision>),

    #[error("breaking storage mutations: {}", join(.0))]
    BreakingStorageMutations(Vec<StorageMutation>),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn join<T: Display>(items: &[T]) -> String {
    items.iter().join("; ")
}
