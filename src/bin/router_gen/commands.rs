//! Command runners.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use sol_router::{
    artifact::{self, Artifact, ArtifactCache},
    router::{DEFAULT_CONSTANTS_INDENT, DEFAULT_DISPATCH_INDENT, RouterTemplate, generate_router},
    storage::{
        StorageDump, StorageReport, compare_dumps, ensure_compatible, ensure_unique_slots,
        extract_layouts,
    },
};
use tracing::{debug, info};

use crate::{
    config::{EnvConfig, GenerateArgs, SelectionArgs, StorageArgs},
    error::{Error, Result},
};

/// Loads every artifact under `dir`.
pub async fn load_all(dir: &Path) -> Result<Vec<Arc<Artifact>>> {
    let paths = artifact::find_artifacts(dir)?;
    let artifacts = artifact::load_artifacts(Arc::new(ArtifactCache::new()), paths).await?;
    debug!(dir = %dir.display(), artifacts = artifacts.len(), "Loaded artifacts");
    Ok(artifacts)
}

/// Generates the router over `args.modules` and writes it to `args.output`.
pub async fn generate(dir: &Path, args: &GenerateArgs, env: &EnvConfig) -> Result<()> {
    let mut config = args.to_router_config(env)?;
    let artifacts = load_all(dir).await?;
    let modules = select_modules(&artifacts, &args.modules)?;
    let deployments = artifact::load_deployments(&args.deployments(env)?)?;
    let contracts = artifact::contract_data(&modules, &deployments)?;

    if let Some(path) = &args.template {
        let source = read(path)?;
        config = config.with_template(RouterTemplate::new(
            source,
            DEFAULT_CONSTANTS_INDENT,
            DEFAULT_DISPATCH_INDENT,
        )?);
    }

    let source = generate_router(&contracts, &config)?;
    write(&args.output, &source)?;
    info!(
        output = %args.output.display(),
        router = config.router_name(),
        "Router written"
    );
    Ok(())
}

/// Picks the module artifacts by name, keeping the requested order.
fn select_modules(artifacts: &[Arc<Artifact>], names: &[String]) -> Result<Vec<Arc<Artifact>>> {
    names
        .iter()
        .map(|name| {
            artifacts
                .iter()
                .find(|artifact| artifact.contract_name() == name)
                .cloned()
                .ok_or_else(|| Error::ModuleNotFound(name.clone()))
        })
        .collect()
}

/// Dumps the storage layouts and verifies them against the previous dump.
///
/// The new dump is only written once it is known to be compatible.
pub async fn storage(dir: &Path, args: &StorageArgs) -> Result<()> {
    let artifacts = load_all(dir).await?;
    let units = artifact::source_units(&artifacts);
    let current = extract_layouts(&units, &args.selection.to_selection())
        .map_err(sol_router::error::Error::from)?
        .iter()
        .cloned()
        .map(|layout| layout.with_positions())
        .collect::<StorageDump>();

    let previous = args
        .previous
        .as_deref()
        .map(|path| read(path).and_then(|json| Ok(StorageDump::from_json(&json)?)))
        .transpose()?;
    let report = StorageReport::new(compare_dumps(previous.as_ref(), &current));
    if !report.mutations().is_empty() {
        print!("{report}");
    }
    ensure_compatible(report.mutations())?;

    info!(
        namespaces = current.len(),
        mutations = report.mutations().len(),
        "Storage layout is compatible"
    );
    if let Some(output) = &args.output {
        write(output, &current.to_json_pretty()?)?;
        info!(output = %output.display(), "Storage dump written");
    }
    Ok(())
}

/// Checks that every storage namespace has its own base slot.
pub async fn namespaces(dir: &Path, args: &SelectionArgs) -> Result<()> {
    let artifacts = load_all(dir).await?;
    let units = artifact::source_units(&artifacts);
    let assignments = ensure_unique_slots(&units, &args.to_selection())?;
    for assignment in &assignments {
        println!("{} {assignment}", assignment.slot());
    }
    info!(assignments = assignments.len(), "Storage slots are unique");
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| io_error(path, source))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn artifact(name: &str) -> Arc<Artifact> {
        Arc::new(serde_json::from_value(json!({ "contractName": name, "abi": [] })).unwrap())
    }

    #[test]
    fn test_select_modules_keeps_requested_order() {
        let artifacts = vec![artifact("AccountModule"), artifact("CoreModule"), artifact("Mock")];

        let modules = select_modules(
            &artifacts,
            &["CoreModule".to_string(), "AccountModule".to_string()],
        )
        .unwrap();

        let names = modules.iter().map(|m| m.contract_name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["CoreModule", "AccountModule"]);
        assert!(matches!(
            select_modules(&artifacts, &["MarketModule".to_string()]),
            Err(Error::ModuleNotFound(ref name)) if name == "MarketModule"
        ));
    }
}
