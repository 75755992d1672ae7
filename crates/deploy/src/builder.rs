//! Builder module for creating a [`Deployer`] configuration.
//!
//! This module provides the [`DeployerBuilder`] struct which simplifies the creation
//! of a [`Deployer`] by handling network name detection and output directory creation.

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use url::Url;

use crate::{AssetPrices, Deployer, LsdAsset, RpcNetworkConfig, VerificationConfig, rpc};

/// Network name for a well-known chain id.
pub fn network_name_for_chain(chain_id: u64) -> String {
    match chain_id {
        1 => "mainnet".to_string(),
        17000 => "holesky".to_string(),
        11155111 => "sepolia".to_string(),
        31337 => "localhost".to_string(),
        id => format!("chain-{}", id),
    }
}

/// Builder for creating a [`Deployer`] configuration.
///
/// This builder handles:
/// - Network name detection from the chain id (if not provided)
/// - Output data directory creation
///
/// # Example
///
/// ```no_run
/// use stablestack_deploy::DeployerBuilder;
///
/// # async fn example() -> anyhow::Result<()> {
/// let deployer = DeployerBuilder::new("https://ethereum-sepolia-rpc.publicnode.com".parse()?)
///     .network_name("sepolia")
///     .parallel_assets(true)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeployerBuilder {
    /// The RPC URL (required).
    rpc_url: Url,
    /// The network name (optional, detected from the chain id if not provided).
    network_name: Option<String>,
    /// The sending account (optional, the node's first account if not provided).
    deployer: Option<Address>,
    /// The artifacts root.
    artifacts: Option<PathBuf>,
    /// The output data path.
    outdata: Option<PathBuf>,
    /// Whether price-feed assets are deployed concurrently.
    parallel_assets: bool,
    /// Mocked prices.
    prices: AssetPrices,
    /// Receipt wait limit.
    confirmation_timeout: Option<Duration>,
    /// Explorer settings.
    verification: VerificationConfig,
}

impl DeployerBuilder {
    /// Create a new [`DeployerBuilder`] with the required RPC URL.
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            network_name: None,
            deployer: None,
            artifacts: None,
            outdata: None,
            parallel_assets: false,
            prices: AssetPrices::default(),
            confirmation_timeout: None,
            verification: VerificationConfig::default(),
        }
    }

    /// Set the network name.
    ///
    /// If not set, it is derived from the endpoint's chain id (e.g. "sepolia").
    pub fn network_name(mut self, name: impl Into<String>) -> Self {
        self.network_name = Some(name.into());
        self
    }

    pub fn deployer(mut self, deployer: Address) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Set the compiled artifacts root. Defaults to `./artifacts`.
    pub fn artifacts(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts = Some(path.into());
        self
    }

    /// Set the output data directory path.
    ///
    /// If not set, defaults to `./data-<network-name>`.
    pub fn outdata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.outdata = Some(path.into());
        self
    }

    pub fn parallel_assets(mut self, parallel_assets: bool) -> Self {
        self.parallel_assets = parallel_assets;
        self
    }

    /// Override the mocked USD price of one asset.
    pub fn price(mut self, asset: LsdAsset, usd_price: u64) -> Self {
        self.prices.set_price(asset, usd_price);
        self
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }

    /// Configure explorer verification.
    pub fn verification(mut self, api_url: Option<Url>, api_key: Option<String>) -> Self {
        self.verification.api_url = api_url;
        self.verification.api_key = api_key;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.verification.settle_delay_secs = delay.as_secs();
        self
    }

    pub fn verify(mut self, enabled: bool) -> Self {
        self.verification.enabled = enabled;
        self
    }

    /// Build the [`Deployer`] configuration.
    ///
    /// This method:
    /// 1. Detects the network name from the RPC chain id if not provided
    /// 2. Creates the output data directory if it doesn't exist
    pub async fn build(self) -> Result<Deployer> {
        let network_name = match self.network_name {
            Some(name) => name,
            None => {
                let client = rpc::create_client()?;
                let chain_id = rpc::fetch_chain_id(&client, self.rpc_url.as_str())
                    .await
                    .context("Failed to fetch chain id to name the network")?;
                network_name_for_chain(chain_id)
            }
        };

        let outdata_path = self
            .outdata
            .unwrap_or_else(|| PathBuf::from(format!("data-{}", network_name)));

        // Create the output data directory if it doesn't exist
        if !outdata_path.try_exists().context(format!(
            "Failed to check if output data directory exists at path {}. Ensure you provided valid permissions to the directory.",
            outdata_path.display()
        ))? {
            std::fs::create_dir_all(&outdata_path)
                .context("Failed to create output data directory")?;
        }

        let outdata_path = outdata_path
            .canonicalize()
            .context("Failed to canonicalize output data directory path")?;

        tracing::info!(
            network_name,
            rpc_url = %self.rpc_url,
            outdata_path = %outdata_path.display(),
            "Building xUSD deployer configuration..."
        );

        let mut rpc = RpcNetworkConfig::new(self.rpc_url);
        if let Some(timeout) = self.confirmation_timeout {
            rpc.confirmation_timeout = timeout;
        }

        Ok(Deployer {
            network: network_name,
            deployer: self.deployer,
            artifacts: self.artifacts.unwrap_or_else(|| PathBuf::from("artifacts")),
            outdata: outdata_path,
            parallel_assets: self.parallel_assets,
            rpc,
            prices: self.prices,
            verification: self.verification,
        })
    }
}
