//! Durable name -> address registry, one per target network.
//!
//! The registry is the only authority on what has been deployed. It is stored at
//! `<deployments>/<network>/registry.json` and rewritten atomically on every
//! record, so a crashed or failed run can always be resumed.

use std::{
    collections::{BTreeMap, HashMap},
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;

use crate::{DeployedResource, ProvisionError};

/// The registry file name inside a network directory.
pub const REGISTRY_FILENAME: &str = "registry.json";

const LOCK_FILENAME: &str = ".lock";

/// On-disk layout of the registry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    network: String,
    resources: BTreeMap<String, DeployedResource>,
}

/// Name -> deployed resource mapping for a single network.
pub struct Registry {
    network: String,
    path: Option<PathBuf>,
    resources: Mutex<BTreeMap<String, DeployedResource>>,
    claims: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Held for the registry's lifetime; dropping it releases the advisory lock.
    _lock: Option<File>,
}

impl Registry {
    /// Create a registry that lives only as long as the process.
    pub fn in_memory(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            path: None,
            resources: Mutex::new(BTreeMap::new()),
            claims: Mutex::new(HashMap::new()),
            _lock: None,
        }
    }

    /// Open (or create) the persistent registry for `network` under `deployments_dir`.
    ///
    /// Takes an exclusive advisory lock on the network directory; a second
    /// orchestrator targeting the same network fails fast instead of racing.
    pub fn open(deployments_dir: &Path, network: impl Into<String>) -> anyhow::Result<Self> {
        let network = network.into();
        let dir = deployments_dir.join(&network);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create registry directory {}", dir.display()))?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILENAME))
            .context("Failed to open registry lock file")?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "Registry {} is locked by another process",
                dir.display()
            )
        })?;

        let path = dir.join(REGISTRY_FILENAME);
        let resources = Self::read_file(&path, &network)?;

        tracing::debug!(
            network = %network,
            path = %path.display(),
            resources = resources.len(),
            "Registry opened"
        );

        Ok(Self {
            network,
            path: Some(path),
            resources: Mutex::new(resources),
            claims: Mutex::new(HashMap::new()),
            _lock: Some(lock),
        })
    }

    /// Read a network's registry without locking it.
    ///
    /// Returns an empty list if nothing was ever recorded for the network.
    pub fn load_snapshot(
        deployments_dir: &Path,
        network: &str,
    ) -> anyhow::Result<Vec<DeployedResource>> {
        let path = deployments_dir.join(network).join(REGISTRY_FILENAME);
        Ok(Self::read_file(&path, network)?.into_values().collect())
    }

    fn read_file(path: &Path, network: &str) -> anyhow::Result<BTreeMap<String, DeployedResource>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry from {}", path.display()))?;
        let file: RegistryFile =
            serde_json::from_str(&content).context("Failed to parse registry JSON")?;

        if file.network != network {
            anyhow::bail!(
                "Registry at {} belongs to network '{}', expected '{}'",
                path.display(),
                file.network,
                network
            );
        }

        Ok(file.resources)
    }

    /// The network this registry belongs to.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Path of the backing file, `None` for in-memory registries.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a resource by logical name.
    pub fn resolve(&self, name: &str) -> Option<DeployedResource> {
        self.resources().get(name).cloned()
    }

    /// Record a confirmed resource.
    ///
    /// Recording the same address twice is a no-op. Recording a different
    /// address under an existing name is a [`ProvisionError::DuplicateResource`].
    pub fn record(&self, resource: DeployedResource) -> Result<(), ProvisionError> {
        let mut resources = self.resources();

        if let Some(existing) = resources.get(&resource.name) {
            if existing.address == resource.address {
                return Ok(());
            }
            return Err(ProvisionError::DuplicateResource {
                name: resource.name,
                recorded: existing.address,
                observed: resource.address,
            });
        }

        let (name, address, tx_hash) = (resource.name.clone(), resource.address, resource.tx_hash);
        resources.insert(name.clone(), resource);

        if let Err(e) = self.persist(&resources) {
            resources.remove(&name);
            tracing::error!(
                name = %name,
                address = %address,
                tx_hash = %tx_hash,
                error = %e,
                "Confirmed resource could not be persisted; record it by hand before retrying"
            );
            return Err(ProvisionError::Registry(e.context(format!(
                "{} was deployed at {} (tx {}) but is not recorded",
                name, address, tx_hash
            ))));
        }

        Ok(())
    }

    /// All records, sorted by name.
    pub fn snapshot(&self) -> Vec<DeployedResource> {
        self.resources().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.resources().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources().is_empty()
    }

    /// Serialize work on a single name.
    ///
    /// Different names never contend; concurrent claims on the same name are
    /// granted one at a time.
    pub async fn claim(&self, name: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(claims.entry(name.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    fn resources(&self) -> MutexGuard<'_, BTreeMap<String, DeployedResource>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, resources: &BTreeMap<String, DeployedResource>) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = RegistryFile {
            network: self.network.clone(),
            resources: resources.clone(),
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize registry")?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write registry to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move registry into {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, B256};
    use tempdir::TempDir;

    use super::*;
    use crate::ContractId;

    fn resource(name: &str, byte: u8) -> DeployedResource {
        DeployedResource {
            name: name.to_string(),
            address: Address::repeat_byte(byte),
            contract: ContractId::new("contracts/xUSD.sol", "xUSD"),
            constructor_args: vec![],
            args_hash: "00".to_string(),
            tx_hash: B256::repeat_byte(byte),
            block_number: Some(1),
            deployed_at: 1_737_316_800,
        }
    }

    #[test]
    fn test_resolve_missing() {
        let registry = Registry::in_memory("hardhat");
        assert!(registry.resolve("xUSD").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_same_address_is_noop() {
        let registry = Registry::in_memory("hardhat");
        registry.record(resource("xUSD", 1)).unwrap();
        registry.record(resource("xUSD", 1)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_record_different_address_is_duplicate() {
        let registry = Registry::in_memory("hardhat");
        registry.record(resource("xUSD", 1)).unwrap();

        let err = registry.record(resource("xUSD", 2)).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::DuplicateResource { ref name, .. } if name == "xUSD"
        ));
        assert_eq!(registry.resolve("xUSD").unwrap().address, Address::repeat_byte(1));
    }

    #[test]
    fn test_persist_and_reopen() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");

        {
            let registry = Registry::open(temp_dir.path(), "sepolia").unwrap();
            registry.record(resource("xUSD", 1)).unwrap();
            registry.record(resource("Staking", 2)).unwrap();
        }

        let reopened = Registry::open(temp_dir.path(), "sepolia").unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.resolve("Staking").unwrap(), resource("Staking", 2));

        let names: Vec<_> = reopened.snapshot().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Staking", "xUSD"]);
    }

    #[test]
    fn test_failed_persist_reports_orphaned_address() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");
        let registry = Registry::open(temp_dir.path(), "sepolia").unwrap();
        std::fs::remove_dir_all(temp_dir.path().join("sepolia")).unwrap();

        let err = registry.record(resource("xUSD", 1)).unwrap_err();

        let source = match err {
            ProvisionError::Registry(source) => source,
            other => panic!("expected a registry error, got {other:?}"),
        };
        let message = format!("{:#}", source);
        assert!(message.contains(&Address::repeat_byte(1).to_string()));
        assert!(message.contains(&B256::repeat_byte(1).to_string()));
        assert!(registry.resolve("xUSD").is_none());
    }

    #[test]
    fn test_networks_are_isolated() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");

        let sepolia = Registry::open(temp_dir.path(), "sepolia").unwrap();
        sepolia.record(resource("xUSD", 1)).unwrap();

        let goerli = Registry::open(temp_dir.path(), "goerli").unwrap();
        assert!(goerli.resolve("xUSD").is_none());
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");

        let _first = Registry::open(temp_dir.path(), "sepolia").unwrap();
        assert!(Registry::open(temp_dir.path(), "sepolia").is_err());
    }

    #[test]
    fn test_load_snapshot_without_lock() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");

        let registry = Registry::open(temp_dir.path(), "sepolia").unwrap();
        registry.record(resource("xUSD", 1)).unwrap();

        let snapshot = Registry::load_snapshot(temp_dir.path(), "sepolia").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(Registry::load_snapshot(temp_dir.path(), "mainnet").unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");
        let dir = temp_dir.path().join("sepolia");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(REGISTRY_FILENAME), "{ invalid json }").unwrap();

        assert!(Registry::open(temp_dir.path(), "sepolia").is_err());
    }

    #[tokio::test]
    async fn test_claims_on_different_names_do_not_block() {
        let registry = Registry::in_memory("hardhat");
        let _a = registry.claim("stETH").await;
        let _b = registry.claim("rETH").await;
    }

    #[tokio::test]
    async fn test_claims_on_same_name_are_serialized() {
        let registry = Arc::new(Registry::in_memory("hardhat"));
        let guard = registry.claim("stETH").await;

        let contender = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.claim("stETH").await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
