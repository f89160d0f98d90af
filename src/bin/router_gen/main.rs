//! Router generator for modular protocols.
//!
//! This binary generates the selector-dispatching router over a set of
//! deployed module contracts and verifies that their storage layouts stay
//! compatible with the previous deployment.

mod commands;
mod config;
mod error;

use clap::Parser;
use std::process::exit;
use tracing::error;

use config::{CliConfig, Command, EnvConfig};

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    let artifacts_dir = match cli_config.artifacts_dir(&env_config) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(1);
        }
    };

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let result = match &cli_config.command {
        Command::Generate(args) => commands::generate(&artifacts_dir, args, &env_config).await,
        Command::Storage(args) => commands::storage(&artifacts_dir, args).await,
        Command::Namespaces(args) => commands::namespaces(&artifacts_dir, args).await,
    };

    if let Err(e) = result {
        error!(%e, "Router generator failed");
        exit(1);
    }
}
