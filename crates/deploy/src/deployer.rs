use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    ArtifactStore, AssetPrices, DeployedResource, DeploymentPlan, EtherscanVerifier,
    InMemoryNetwork, ProvisionReport, Provisioner, Registry, RpcNetwork, RpcNetworkConfig,
    VerificationConfig, VerificationReporter, xusd_plan,
};

/// The default name for the stablestack configuration file.
pub const CONFIG_FILENAME: &str = "Stablestack.toml";
/// Prefix of environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "STABLESTACK_";
/// Directory under `outdata` holding one registry per network.
pub const DEPLOYMENTS_DIR: &str = "deployments";

const DEFAULT_NETWORK: &str = "localhost";
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Sender used by simulated runs when none is configured.
fn simulation_sender() -> Address {
    Address::repeat_byte(0x5e)
}

/// Everything needed to provision the xUSD fleet on one network.
///
/// Serialized to/from TOML, with `STABLESTACK_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployer {
    /// Network name; keys the registry and decides whether to verify.
    pub network: String,
    /// Sending account. The node's first account when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    /// Root of the compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Path to the output data directory.
    pub outdata: PathBuf,
    /// Deploy the price-feed assets concurrently.
    pub parallel_assets: bool,
    /// JSON-RPC connection settings.
    pub rpc: RpcNetworkConfig,
    /// Mocked asset prices.
    pub prices: AssetPrices,
    /// Explorer verification settings.
    pub verification: VerificationConfig,
}

impl Default for Deployer {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            rpc: RpcNetworkConfig::new(
                DEFAULT_RPC_URL
                    .parse()
                    .expect("default RPC URL is a valid URL"),
            ),
            deployer: None,
            artifacts: PathBuf::from("artifacts"),
            outdata: PathBuf::from("data"),
            parallel_assets: false,
            prices: AssetPrices::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl Deployer {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployer config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file (or a directory containing one).
    ///
    /// Missing keys take their defaults and `STABLESTACK_*` environment
    /// variables override the file, e.g. `STABLESTACK_VERIFICATION__API_KEY`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load config from {}", config_path.display()))?;

        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration to the default location (`Stablestack.toml` in outdata).
    pub fn save_config(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.outdata)
            .context("Failed to create output data directory")?;
        let config_path = self.outdata.join(CONFIG_FILENAME);
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    /// Directory holding the per-network registries.
    pub fn deployments_dir(&self) -> PathBuf {
        self.outdata.join(DEPLOYMENTS_DIR)
    }

    pub fn plan(&self) -> Result<DeploymentPlan> {
        Ok(xusd_plan(&self.prices)?)
    }

    /// Records currently in this network's registry.
    pub fn status(&self) -> Result<Vec<DeployedResource>> {
        Registry::load_snapshot(&self.deployments_dir(), &self.network)
    }

    fn reporter(
        &self,
        artifacts: ArtifactStore,
    ) -> Result<Option<VerificationReporter<EtherscanVerifier>>> {
        let settle_delay = Duration::from_secs(self.verification.settle_delay_secs);
        Ok(EtherscanVerifier::from_config(&self.verification, artifacts)?
            .map(|verifier| VerificationReporter::new(verifier).with_settle_delay(settle_delay)))
    }

    /// Provision the fleet on the configured network.
    ///
    /// Resources already in the registry are reused, so an interrupted run can
    /// simply be started again.
    pub async fn deploy(self) -> Result<ProvisionReport> {
        tracing::info!(network = %self.network, rpc_url = %self.rpc.rpc_url, "Starting deployment process...");

        let plan = self.plan()?;
        let artifacts = ArtifactStore::new(&self.artifacts);
        let network = RpcNetwork::new(self.rpc.clone(), artifacts.clone())?;

        let chain_id = network
            .chain_id()
            .await
            .context("Failed to reach the RPC endpoint")?;

        let sender = match self.deployer {
            Some(address) => address,
            None => network.default_sender().await?,
        };

        tracing::info!(chain_id, sender = %sender, "Connected");

        let registry = Registry::open(&self.deployments_dir(), &self.network)
            .context("Failed to open the deployment registry")?;
        let reporter = self.reporter(artifacts)?;

        let report = Provisioner::new(&network, &registry, sender)
            .parallel_assets(self.parallel_assets)
            .provision(&plan, reporter.as_ref())
            .await?;

        tracing::info!(
            created = report.run.created(),
            reused = report.run.fetched(),
            wiring_confirmed = report.run.confirmed_wiring(),
            verified = report.verification.iter().filter(|o| o.is_verified()).count(),
            "✓ Deployment complete!"
        );

        if let Some(path) = registry.path() {
            tracing::info!(path = %path.display(), "Registry");
        }
        println!("{}", resources_table(&registry.snapshot()));

        Ok(report)
    }

    /// Run the plan against an in-memory network, without touching the
    /// configured RPC endpoint or the on-disk registry.
    pub async fn simulate(&self) -> Result<ProvisionReport> {
        let plan = self.plan()?;
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory(&self.network);
        let sender = self.deployer.unwrap_or_else(simulation_sender);

        let report = Provisioner::new(&network, &registry, sender)
            .parallel_assets(self.parallel_assets)
            .provision(&plan, None::<&VerificationReporter<EtherscanVerifier>>)
            .await?;

        println!("{}", resources_table(&registry.snapshot()));
        Ok(report)
    }
}

/// Render registry records as a table.
pub fn resources_table(resources: &[DeployedResource]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Name", "Address", "Contract", "Block", "Tx"]);

    for resource in resources {
        table.add_row(vec![
            resource.name.clone(),
            resource.address.to_string(),
            resource.contract.to_string(),
            resource
                .block_number
                .map(|block| block.to_string())
                .unwrap_or_default(),
            resource.tx_hash.to_string(),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::ProvisionError;

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");
        let deployer = Deployer {
            network: "sepolia".to_string(),
            deployer: Some(Address::repeat_byte(0x42)),
            outdata: temp_dir.path().to_path_buf(),
            parallel_assets: true,
            ..Default::default()
        };

        let path = deployer.save_config().unwrap();
        assert_eq!(path, temp_dir.path().join(CONFIG_FILENAME));

        let loaded = Deployer::load_from_file(temp_dir.path()).unwrap();
        assert_eq!(loaded, deployer);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let temp_dir = TempDir::new("stablestack-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "network = \"holesky\"\n\n[prices]\nsteth = 2500\nreth = 2040\ncbeth = 1950\ndecimals = 8\n",
        )
        .unwrap();

        let loaded = Deployer::load_from_file(&path).unwrap();
        assert_eq!(loaded.network, "holesky");
        assert_eq!(loaded.prices.steth, 2500);
        assert_eq!(loaded.rpc, Deployer::default().rpc);
    }

    #[test]
    fn test_missing_config() {
        assert!(Deployer::load_from_file(Path::new("/nonexistent/Stablestack.toml")).is_err());
    }

    #[test]
    fn test_api_key_is_not_saved() {
        let mut deployer = Deployer::default();
        deployer.verification.api_key = Some("secret".to_string());
        let toml = toml::to_string_pretty(&deployer).unwrap();
        assert!(!toml.contains("secret"));
    }

    #[tokio::test]
    async fn test_simulate_runs_the_full_plan() {
        let deployer = Deployer {
            network: "sepolia".to_string(),
            ..Default::default()
        };

        let report = deployer.simulate().await.unwrap();
        assert_eq!(report.run.created(), 10);
        assert_eq!(report.run.confirmed_wiring(), 5);
        assert!(report.verification.is_empty());
    }

    #[tokio::test]
    async fn test_simulate_rejects_overflowing_prices() {
        let mut deployer = Deployer::default();
        deployer.prices.decimals = 80;

        let err = deployer.simulate().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::InvalidPlan(_))
        ));
    }
}
