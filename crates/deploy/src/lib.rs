//! stablestack-deploy - Provisioning library for the xUSD stablecoin fleet.
//!
//! This crate deploys the xUSD token, its price oracle, mocked collateral feeds,
//! and the redeem and staking contracts, wires them together and submits them
//! for source verification. Every deployment is recorded in a per-network
//! registry so that runs can be resumed and repeated safely.

pub mod abi;
mod artifacts;
mod builder;
mod deployer;
mod error;
mod network;
mod plan;
mod provision;
mod registry;
mod resource;
mod resource_deployer;
pub mod rpc;
mod verify;
mod wiring;

pub use artifacts::{Artifact, ArtifactStore, BuildInfo};
pub use builder::{DeployerBuilder, network_name_for_chain};
pub use deployer::{CONFIG_FILENAME, DEPLOYMENTS_DIR, Deployer, ENV_PREFIX, resources_table};
pub use error::ProvisionError;
pub use network::{
    CallRecord, Confirmation, CreateRecord, InMemoryNetwork, Network, NetworkEvent, PendingTx,
    RpcNetwork, RpcNetworkConfig,
};
pub use plan::{
    AssetPrices, DEFAULT_PRICE_DECIMALS, DeploymentPlan, LsdAsset, MINTER_ROLE,
    MOCK_TOKEN_DECIMALS, ORACLE, PlanRunner, PriceFeedAsset, REDEEM, RunReport, STAKING, Stage,
    Step, StepOutcome, TOKEN, xusd_plan,
};
pub use provision::{ProvisionReport, Provisioner, verification_requests};
pub use registry::{REGISTRY_FILENAME, Registry};
pub use resource::{
    Arg, ArgValue, ContractId, DeployedResource, ResourceSpec, args_fingerprint,
};
pub use resource_deployer::{DeployOutcome, ResourceDeployer};
pub use verify::{
    DEFAULT_SETTLE_DELAY, EPHEMERAL_NETWORKS, EtherscanVerifier, VerificationConfig,
    VerificationOutcome, VerificationReporter, VerificationRequest, Verifier,
    is_ephemeral_network,
};
pub use wiring::{WiringAction, WiringSpec, apply_wiring};
