//! Error types for the router generator.

use std::path::PathBuf;

use sol_router::router::TemplateError;

use crate::config::ConfigError;

/// Main error type for the router generator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("{0}")]
    Router(#[from] sol_router::error::Error),

    #[error("Invalid router template: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage dump JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Module {0} not found in artifacts")]
    ModuleNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
