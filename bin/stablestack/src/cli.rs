use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use stablestack_deploy::{Deployer, DeployerBuilder, LsdAsset};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The default RPC endpoint (a local Hardhat or Anvil node).
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

#[derive(Parser)]
#[command(name = "stablestack")]
#[command(
    author,
    version,
    about = "Deploy and wire the xUSD stablecoin contracts in a single command"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "STABLESTACK_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy (or resume deploying) the fleet.
    Deploy(ConfigArgs),

    /// Print the ordered deployment steps.
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Also rehearse the plan against an in-memory chain.
        #[arg(long)]
        simulate: bool,
    },

    /// Print the resources recorded for a network.
    Status(ConfigArgs),

    /// Generate shell completions.
    Completions {
        /// The shell to generate completions for.
        shell: Shell,
    },
}

/// Where the run configuration comes from: a saved config file, or flags.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Path to an existing Stablestack.toml configuration file (or its directory).
    ///
    /// When provided, every other configuration flag is ignored.
    #[arg(long, alias = "conf", env = "STABLESTACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// The network name, used to key the registry.
    ///
    /// If not provided, it is derived from the endpoint's chain id.
    /// `localhost` and `hardhat` are never verified.
    #[arg(short, long, visible_alias = "name", env = "STABLESTACK_NETWORK")]
    pub network: Option<String>,

    /// The JSON-RPC endpoint of the target network.
    #[arg(long, alias = "rpc", env = "STABLESTACK_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: Url,

    /// The sending account, managed by the node.
    ///
    /// If not provided, the node's first account is used.
    #[arg(long, env = "STABLESTACK_DEPLOYER")]
    pub deployer: Option<Address>,

    /// Root of the compiled contract artifacts.
    #[arg(long, env = "STABLESTACK_ARTIFACTS", default_value = "artifacts")]
    pub artifacts: PathBuf,

    /// The path to the output data directory.
    ///
    /// If not provided, the data will be stored at: ./data-<network-name>
    #[arg(long, env = "STABLESTACK_OUTDATA")]
    pub outdata: Option<PathBuf>,

    /// Deploy the price-feed assets concurrently.
    #[arg(long, env = "STABLESTACK_PARALLEL_ASSETS")]
    pub parallel_assets: bool,

    /// Mocked USD price of stETH.
    #[arg(long, env = "STABLESTACK_STETH_PRICE")]
    pub steth_price: Option<u64>,

    /// Mocked USD price of rETH.
    #[arg(long, env = "STABLESTACK_RETH_PRICE")]
    pub reth_price: Option<u64>,

    /// Mocked USD price of cbETH.
    #[arg(long, env = "STABLESTACK_CBETH_PRICE")]
    pub cbeth_price: Option<u64>,

    /// Seconds to wait for a transaction to be mined before giving up.
    #[arg(long, env = "STABLESTACK_CONFIRMATION_TIMEOUT")]
    pub confirmation_timeout: Option<u64>,

    /// Etherscan-compatible API endpoint used for source verification.
    #[arg(long, env = "STABLESTACK_EXPLORER_API_URL")]
    pub explorer_api_url: Option<Url>,

    /// API key for the explorer.
    #[arg(long, env = "STABLESTACK_EXPLORER_API_KEY", hide_env_values = true)]
    pub explorer_api_key: Option<String>,

    /// Seconds to wait before each verification submission.
    #[arg(long, env = "STABLESTACK_SETTLE_DELAY", default_value_t = 10)]
    pub settle_delay: u64,

    /// Skip source verification.
    #[arg(long, env = "STABLESTACK_NO_VERIFY")]
    pub no_verify: bool,
}

impl ConfigArgs {
    fn prices(&self) -> impl Iterator<Item = (LsdAsset, u64)> {
        [
            (LsdAsset::StEth, self.steth_price),
            (LsdAsset::REth, self.reth_price),
            (LsdAsset::CbEth, self.cbeth_price),
        ]
        .into_iter()
        .filter_map(|(asset, price)| price.map(|price| (asset, price)))
    }

    /// Build a [`DeployerBuilder`] from the flags.
    pub fn builder(&self) -> DeployerBuilder {
        let mut builder = DeployerBuilder::new(self.rpc_url.clone())
            .artifacts(&self.artifacts)
            .parallel_assets(self.parallel_assets)
            .verification(self.explorer_api_url.clone(), self.explorer_api_key.clone())
            .settle_delay(Duration::from_secs(self.settle_delay))
            .verify(!self.no_verify);

        if let Some(network) = &self.network {
            builder = builder.network_name(network);
        }
        if let Some(deployer) = self.deployer {
            builder = builder.deployer(deployer);
        }
        if let Some(outdata) = &self.outdata {
            builder = builder.outdata_path(outdata);
        }
        if let Some(timeout) = self.confirmation_timeout {
            builder = builder.confirmation_timeout(Duration::from_secs(timeout));
        }
        for (asset, price) in self.prices() {
            builder = builder.price(asset, price);
        }

        builder
    }

    /// A configuration built without contacting the network or creating directories.
    ///
    /// Used by commands that only read the plan or the registry.
    pub fn offline(&self) -> anyhow::Result<Deployer> {
        if let Some(config) = &self.config {
            return Deployer::load_from_file(config);
        }

        let mut deployer = Deployer {
            parallel_assets: self.parallel_assets,
            deployer: self.deployer,
            artifacts: self.artifacts.clone(),
            ..Default::default()
        };
        if let Some(network) = &self.network {
            deployer.network = network.clone();
        }
        deployer.outdata = self
            .outdata
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("data-{}", deployer.network)));
        for (asset, price) in self.prices() {
            deployer.prices.set_price(asset, price);
        }
        Ok(deployer)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_offline_applies_price_overrides() {
        let cli = Cli::parse_from([
            "stablestack",
            "plan",
            "--network",
            "sepolia",
            "--reth-price",
            "2100",
            "--parallel-assets",
        ]);

        let Command::Plan { config, simulate } = cli.command else {
            panic!("expected the plan command");
        };
        assert!(!simulate);

        let deployer = config.offline().unwrap();
        assert_eq!(deployer.network, "sepolia");
        assert_eq!(deployer.prices.reth, 2100);
        assert_eq!(deployer.prices.steth, 1900);
        assert!(deployer.parallel_assets);
        assert_eq!(deployer.outdata, PathBuf::from("data-sepolia"));
    }
}
