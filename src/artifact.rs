//! Compiler artifact loading.
//!
//! Artifacts are read concurrently on blocking tasks by [`load_artifacts`],
//! parsed ones are kept in an [`ArtifactCache`] until the file contents
//! change.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy::primitives::{Address, B256, keccak256};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::{
    ast::SourceUnit,
    error::{Error, Result},
    types::{ContractData, RawAbi},
};

/// Suffix of the debug files emitted next to hardhat artifacts.
const DEBUG_SUFFIX: &str = ".dbg.json";

/// Compiled contract: ABI and, when the compiler was asked for it, the AST of
/// its source unit.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    contract_name: String,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    abi: RawAbi,
    #[serde(default)]
    ast: Option<SourceUnit>,
}

impl Artifact {
    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    /// Path of the source unit declaring the contract.
    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn abi(&self) -> &RawAbi {
        &self.abi
    }

    pub fn ast(&self) -> Option<&SourceUnit> {
        self.ast.as_ref()
    }
}

#[derive(Debug)]
struct CachedArtifact {
    digest: B256,
    artifact: Arc<Artifact>,
}

/// Parsed artifacts keyed by path, invalidated by the keccak-256 digest of the
/// file contents.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: DashMap<PathBuf, CachedArtifact>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the artifact at `path`, parsing it only if it is not cached or
    /// its contents changed since.
    pub fn load(&self, path: &Path) -> Result<Arc<Artifact>> {
        let contents = fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let digest = keccak256(&contents);

        if let Some(entry) = self.entries.get(path)
            && entry.digest == digest
        {
            trace!(path = %path.display(), "Artifact cache hit");
            return Ok(entry.artifact.clone());
        }

        let artifact: Artifact = serde_json::from_slice(&contents).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact = Arc::new(artifact);
        debug!(
            path = %path.display(),
            contract = artifact.contract_name(),
            %digest,
            "Loaded artifact"
        );
        self.entries.insert(
            path.to_path_buf(),
            CachedArtifact {
                digest,
                artifact: artifact.clone(),
            },
        );
        Ok(artifact)
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads all the artifacts concurrently, in the order of `paths`.
pub async fn load_artifacts(
    cache: Arc<ArtifactCache>,
    paths: Vec<PathBuf>,
) -> Result<Vec<Arc<Artifact>>> {
    let tasks = paths.into_iter().map(|path| {
        let cache = cache.clone();
        tokio::task::spawn_blocking(move || cache.load(&path))
    });
    futures::future::try_join_all(tasks)
        .await
        .map_err(|err| Error::Task(err.to_string()))?
        .into_iter()
        .collect()
}

/// Lists the artifact files under `dir`, recursively and sorted by path.
pub fn find_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let path = entry
                .map_err(|source| Error::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if is_artifact(&path) {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}

fn is_artifact(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|path| path.ends_with(".json") && !path.ends_with(DEBUG_SUFFIX))
}

/// Reads the deployment registry, a JSON object mapping contract names to
/// addresses.
pub fn load_deployments(path: &Path) -> Result<BTreeMap<String, Address>> {
    let contents = fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&contents).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Pairs every artifact with its deployed address.
///
/// # Errors
///
/// [`Error::MissingDeployment`] if an artifact has no address in
/// `deployments`.
pub fn contract_data(
    artifacts: &[Arc<Artifact>],
    deployments: &BTreeMap<String, Address>,
) -> Result<Vec<ContractData>> {
    artifacts
        .iter()
        .map(|artifact| {
            let address = deployments
                .get(artifact.contract_name())
                .ok_or_else(|| Error::MissingDeployment(artifact.contract_name().to_string()))?;
            Ok(ContractData::new(
                artifact.contract_name(),
                *address,
                artifact.abi().clone(),
            ))
        })
        .collect()
}

/// Source unit ASTs of the artifacts, one per source path.
pub fn source_units(artifacts: &[Arc<Artifact>]) -> Vec<SourceUnit> {
    let mut seen = HashSet::new();
    artifacts
        .iter()
        .filter_map(|artifact| artifact.ast())
        .filter(|unit| seen.insert(unit.absolute_path.clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use serde_json::json;

    use super::*;
    use crate::testing;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!("sol-router-{name}-{}", std::process::id()));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn write(&self, name: &str, value: &serde_json::Value) -> PathBuf {
            let path = self.0.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
            path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn artifact(name: &str) -> serde_json::Value {
        json!({
            "contractName": name,
            "sourceName": format!("contracts/{name}.sol"),
            "abi": [testing::function_fragment("foo", &["uint256"])],
        })
    }

    #[test]
    fn test_cache_invalidates_on_change() {
        let dir = TempDir::new("cache");
        let path = dir.write("A.json", &artifact("ModuleA"));
        let cache = ArtifactCache::new();

        let first = cache.load(&path).unwrap();
        let second = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        dir.write("A.json", &artifact("ModuleB"));
        let third = cache.load(&path).unwrap();
        assert_eq!(third.contract_name(), "ModuleB");
        assert_eq!(cache.len(), 1);

        cache.invalidate(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_artifact() {
        let dir = TempDir::new("invalid");
        let path = dir.write("A.json", &json!({ "abi": [] }));

        assert!(matches!(
            ArtifactCache::new().load(&path),
            Err(Error::Json { .. })
        ));
        assert!(matches!(
            ArtifactCache::new().load(&dir.0.join("missing.json")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_find_artifacts() {
        let dir = TempDir::new("find");
        dir.write("b/B.sol/B.json", &artifact("B"));
        dir.write("b/B.sol/B.dbg.json", &json!({}));
        dir.write("a/A.sol/A.json", &artifact("A"));

        let paths = find_artifacts(&dir.0).unwrap();

        assert_eq!(
            paths,
            vec![dir.0.join("a/A.sol/A.json"), dir.0.join("b/B.sol/B.json")]
        );
    }

    #[tokio::test]
    async fn test_load_artifacts_keeps_order() {
        let dir = TempDir::new("load");
        let paths = (0..8)
            .map(|i| dir.write(&format!("M{i}.json"), &artifact(&format!("Module{i}"))))
            .collect::<Vec<_>>();
        let cache = Arc::new(ArtifactCache::new());

        let artifacts = load_artifacts(cache.clone(), paths).await.unwrap();

        let names = artifacts
            .iter()
            .map(|a| a.contract_name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, (0..8).map(|i| format!("Module{i}")).collect::<Vec<_>>());
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_contract_data() {
        let dir = TempDir::new("deployments");
        let path = dir.write(
            "deployments.json",
            &json!({ "ModuleA": "0x0000000000000000000000000000000000000011" }),
        );
        let deployments = load_deployments(&path).unwrap();
        let artifacts = vec![
            Arc::new(serde_json::from_value::<Artifact>(artifact("ModuleA")).unwrap()),
            Arc::new(serde_json::from_value::<Artifact>(artifact("ModuleB")).unwrap()),
        ];

        let contracts = contract_data(&artifacts[..1], &deployments).unwrap();
        assert_eq!(
            contracts[0].deployed_address(),
            address!("0x0000000000000000000000000000000000000011")
        );
        assert!(matches!(
            contract_data(&artifacts, &deployments),
            Err(Error::MissingDeployment(ref name)) if name == "ModuleB"
        ));
    }
}
