//! Configuration for the router generator.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell), prefixed with `ROUTER_`:
//!   project paths and defaults shared by every command
//! - CLI arguments: the command to run and its options, taking precedence

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sol_router::{
    router::{DEFAULT_MAX_LEAF_SIZE, DEFAULT_ROUTER_NAME, RouterConfig, SelectorFilter},
    storage::StorageSelection,
};

/// Prefix of the environment variables read by [`EnvConfig`].
pub const ENV_PREFIX: &str = "ROUTER_";

/// Environment configuration (project paths and defaults).
#[derive(Debug, Default, serde::Deserialize)]
pub struct EnvConfig {
    /// Directory holding the compiled artifacts
    pub artifacts_dir: Option<PathBuf>,

    /// Deployment registry mapping module names to addresses
    pub deployments: Option<PathBuf>,

    /// Name of the generated router contract (default: Router)
    pub name: Option<String>,

    /// Maximum number of selectors per dispatch leaf (default: 9)
    pub max_leaf_size: Option<usize>,
}

impl EnvConfig {
    /// Load configuration from `ROUTER_*` environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env()
    }
}

/// CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "router-gen")]
#[command(about = "Router code generator and storage layout verifier")]
pub struct CliConfig {
    /// Directory holding the compiled artifacts
    #[arg(long, global = true)]
    pub artifacts_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Artifacts directory, from the CLI or the environment.
    pub fn artifacts_dir(&self, env: &EnvConfig) -> Result<PathBuf, ConfigError> {
        self.artifacts_dir
            .clone()
            .or_else(|| env.artifacts_dir.clone())
            .ok_or(ConfigError::MissingArtifactsDir)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate the router source for a set of deployed modules
    Generate(GenerateArgs),

    /// Dump storage layouts and verify them against the previous deployment
    Storage(StorageArgs),

    /// Check that no two contracts anchor their storage at the same slot
    Namespaces(SelectionArgs),
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Module contract names, in constant declaration order (e.g., "CoreModule,AccountModule")
    #[arg(long, value_delimiter = ',')]
    pub modules: Vec<String>,

    /// Deployment registry mapping module names to addresses
    #[arg(long)]
    pub deployments: Option<PathBuf>,

    /// Name of the generated router contract
    #[arg(long)]
    pub name: Option<String>,

    /// Maximum number of selectors per dispatch leaf
    #[arg(long)]
    pub max_leaf_size: Option<usize>,

    /// Router template with {{router_name}}, {{module_constants}} and {{dispatch}} placeholders
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Dispatch coverage instrumentation functions too
    #[arg(long)]
    pub include_coverage: bool,

    /// Where to write the router source
    #[arg(long)]
    pub output: PathBuf,
}

impl GenerateArgs {
    /// Router settings, CLI values taking precedence over the environment.
    ///
    /// The template is read separately, see [`GenerateArgs::template`].
    pub fn to_router_config(&self, env: &EnvConfig) -> Result<RouterConfig, ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::NoModules);
        }
        let max_leaf_size = self
            .max_leaf_size
            .or(env.max_leaf_size)
            .unwrap_or(DEFAULT_MAX_LEAF_SIZE);
        if max_leaf_size == 0 {
            return Err(ConfigError::ZeroLeafSize);
        }
        let name = self
            .name
            .clone()
            .or_else(|| env.name.clone())
            .unwrap_or_else(|| DEFAULT_ROUTER_NAME.to_string());
        let filter = if self.include_coverage {
            SelectorFilter::all()
        } else {
            SelectorFilter::default()
        };

        Ok(RouterConfig::new(name)
            .with_max_leaf_size(max_leaf_size)
            .with_filter(filter))
    }

    pub fn deployments(&self, env: &EnvConfig) -> Result<PathBuf, ConfigError> {
        self.deployments
            .clone()
            .or_else(|| env.deployments.clone())
            .ok_or(ConfigError::MissingDeployments)
    }
}

#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Source path prefixes to analyse (comma-separated, e.g., "contracts/storage/")
    /// If not specified, all sources are analysed
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Contract and library names to analyse (comma-separated)
    /// If not specified, all contracts are analysed
    #[arg(long, value_delimiter = ',')]
    pub contracts: Vec<String>,
}

impl SelectionArgs {
    pub fn to_selection(&self) -> StorageSelection {
        let selection = self
            .sources
            .iter()
            .fold(StorageSelection::all(), |selection, source| {
                selection.with_source_prefix(source.clone())
            });
        self.contracts
            .iter()
            .fold(selection, |selection, contract| selection.with_contract(contract.clone()))
    }
}

#[derive(Debug, Args)]
pub struct StorageArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Storage dump of the previous deployment
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Where to write the current storage dump, written only if no breaking mutation is found
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Artifacts directory not set, use --artifacts-dir or {ENV_PREFIX}ARTIFACTS_DIR")]
    MissingArtifactsDir,

    #[error("Deployment registry not set, use --deployments or {ENV_PREFIX}DEPLOYMENTS")]
    MissingDeployments,

    #[error("At least one module is required")]
    NoModules,

    #[error("max_leaf_size cannot be zero")]
    ZeroLeafSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_args() -> GenerateArgs {
        GenerateArgs {
            modules: vec!["CoreModule".to_string(), "AccountModule".to_string()],
            deployments: None,
            name: None,
            max_leaf_size: None,
            template: None,
            include_coverage: false,
            output: PathBuf::from("contracts/Router.sol"),
        }
    }

    #[test]
    fn test_env_config() {
        let env = envy::prefixed(ENV_PREFIX)
            .from_iter::<_, EnvConfig>(vec![
                ("ROUTER_ARTIFACTS_DIR".to_string(), "artifacts".to_string()),
                ("ROUTER_MAX_LEAF_SIZE".to_string(), "4".to_string()),
                ("RUST_LOG".to_string(), "debug".to_string()),
            ])
            .unwrap();

        assert_eq!(env.artifacts_dir, Some(PathBuf::from("artifacts")));
        assert_eq!(env.max_leaf_size, Some(4));
        assert_eq!(env.name, None);
    }

    #[test]
    fn test_router_config_defaults() {
        let config = generate_args().to_router_config(&EnvConfig::default()).unwrap();

        assert_eq!(config.router_name(), DEFAULT_ROUTER_NAME);
        assert_eq!(config.max_leaf_size(), DEFAULT_MAX_LEAF_SIZE);
        assert!(!config.filter().accepts("c_0x1234"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = EnvConfig {
            name: Some("EnvRouter".to_string()),
            max_leaf_size: Some(4),
            ..EnvConfig::default()
        };
        let args = GenerateArgs {
            name: Some("CliRouter".to_string()),
            include_coverage: true,
            ..generate_args()
        };

        let config = args.to_router_config(&env).unwrap();

        assert_eq!(config.router_name(), "CliRouter");
        assert_eq!(config.max_leaf_size(), 4);
        assert!(config.filter().accepts("c_0x1234"));
    }

    #[test]
    fn test_invalid_generate_args() {
        let no_modules = GenerateArgs {
            modules: vec![],
            ..generate_args()
        };
        let zero_leaf = GenerateArgs {
            max_leaf_size: Some(0),
            ..generate_args()
        };

        assert!(matches!(
            no_modules.to_router_config(&EnvConfig::default()),
            Err(ConfigError::NoModules)
        ));
        assert!(matches!(
            zero_leaf.to_router_config(&EnvConfig::default()),
            Err(ConfigError::ZeroLeafSize)
        ));
        assert!(matches!(
            generate_args().deployments(&EnvConfig::default()),
            Err(ConfigError::MissingDeployments)
        ));
    }

    #[test]
    fn test_parse_cli() {
        let cli = CliConfig::try_parse_from([
            "router-gen",
            "storage",
            "--artifacts-dir",
            "out",
            "--sources",
            "contracts/storage/,contracts/modules/",
            "--previous",
            "storage.dump.json",
        ])
        .unwrap();

        assert_eq!(
            cli.artifacts_dir(&EnvConfig::default()).unwrap(),
            PathBuf::from("out")
        );
        let Command::Storage(args) = &cli.command else {
            panic!("expected the storage command");
        };
        assert_eq!(
            args.selection.to_selection(),
            StorageSelection::all()
                .with_source_prefix("contracts/storage/")
                .with_source_prefix("contracts/modules/")
        );
        assert_eq!(args.previous, Some(PathBuf::from("storage.dump.json")));
    }
}
