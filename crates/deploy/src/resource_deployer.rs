//! Create-or-reuse logic for a single resource.

use alloy_core::primitives::Address;

use crate::{
    Arg, ArgValue, DeployedResource, Network, ProvisionError, Registry, ResourceSpec, abi,
    args_fingerprint,
};

/// Whether a resource was created by this run or found in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Created(DeployedResource),
    Fetched(DeployedResource),
}

impl DeployOutcome {
    pub fn resource(&self) -> &DeployedResource {
        match self {
            Self::Created(resource) | Self::Fetched(resource) => resource,
        }
    }

    pub fn into_resource(self) -> DeployedResource {
        match self {
            Self::Created(resource) | Self::Fetched(resource) => resource,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Deploys resources against a network and records them in a registry.
pub struct ResourceDeployer<'a, N> {
    network: &'a N,
    registry: &'a Registry,
    sender: Address,
}

impl<'a, N: Network> ResourceDeployer<'a, N> {
    pub fn new(network: &'a N, registry: &'a Registry, sender: Address) -> Self {
        Self {
            network,
            registry,
            sender,
        }
    }

    /// Return the recorded resource for `spec.name`, creating it first if needed.
    pub async fn deploy_or_fetch(
        &self,
        spec: &ResourceSpec,
    ) -> Result<DeployedResource, ProvisionError> {
        self.ensure(spec).await.map(DeployOutcome::into_resource)
    }

    /// Same as [`Self::deploy_or_fetch`], also reporting whether a creation happened.
    pub async fn ensure(&self, spec: &ResourceSpec) -> Result<DeployOutcome, ProvisionError> {
        let _claim = self.registry.claim(&spec.name).await;

        if let Some(existing) = self.registry.resolve(&spec.name) {
            self.check_drift(spec, &existing)?;
            tracing::info!(
                name = %spec.name,
                address = %existing.address,
                "Reusing recorded resource"
            );
            return Ok(DeployOutcome::Fetched(existing));
        }

        let args = resolve_args(
            self.network,
            self.registry,
            &spec.name,
            &spec.args,
            |source| ProvisionError::DeploymentFailed {
                name: spec.name.clone(),
                source,
            },
        )
        .await?;

        tracing::info!(
            name = %spec.name,
            contract = %spec.contract,
            args = %display_args(&args),
            "Deploying resource..."
        );

        let failed = |source| ProvisionError::DeploymentFailed {
            name: spec.name.clone(),
            source,
        };

        let pending = self
            .network
            .submit_create(&spec.contract, &args, self.sender)
            .await
            .map_err(failed)?;

        tracing::debug!(name = %spec.name, tx_hash = %pending.hash, "Creation submitted");

        let confirmation = self
            .network
            .await_confirmation(&pending)
            .await
            .map_err(failed)?;

        let address = confirmation.contract_address.ok_or_else(|| {
            failed(anyhow::anyhow!(
                "Creation {} was confirmed without a contract address",
                confirmation.tx_hash
            ))
        })?;

        let resource = DeployedResource {
            name: spec.name.clone(),
            address,
            contract: spec.contract.clone(),
            args_hash: args_fingerprint(&spec.contract, &args),
            constructor_args: args,
            tx_hash: confirmation.tx_hash,
            block_number: confirmation.block_number,
            deployed_at: chrono::Utc::now().timestamp(),
        };

        self.registry.record(resource.clone())?;

        tracing::info!(
            name = %resource.name,
            address = %resource.address,
            tx_hash = %resource.tx_hash,
            block = ?resource.block_number,
            "Resource deployed"
        );

        Ok(DeployOutcome::Created(resource))
    }

    /// Refuse a recorded resource that no longer matches its spec.
    ///
    /// Only specs whose arguments resolve from the registry alone are checked,
    /// so a registry hit never touches the network.
    fn check_drift(
        &self,
        spec: &ResourceSpec,
        existing: &DeployedResource,
    ) -> Result<(), ProvisionError> {
        let Some(args) = spec
            .args
            .iter()
            .map(|arg| resolve_local(self.registry, arg))
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(());
        };

        let current = args_fingerprint(&spec.contract, &args);
        if current == existing.args_hash {
            return Ok(());
        }

        tracing::error!(
            name = %spec.name,
            address = %existing.address,
            recorded_hash = %existing.args_hash,
            current_hash = %current,
            "Recorded resource was created with different arguments"
        );
        Err(ProvisionError::ResourceDrift {
            name: spec.name.clone(),
            address: existing.address,
            recorded_hash: existing.args_hash.clone(),
            current_hash: current,
        })
    }
}

fn resolve_local(registry: &Registry, arg: &Arg) -> Option<ArgValue> {
    match arg {
        Arg::Value(value) => Some(value.clone()),
        Arg::Resource(name) => registry
            .resolve(name)
            .map(|resource| ArgValue::Address(resource.address)),
        Arg::Role { .. } => None,
    }
}

/// Resolve plan arguments into concrete values.
///
/// Resource references must already be recorded. Roles are read from the
/// referenced resource, and a failing read is mapped through `on_network_error`.
pub(crate) async fn resolve_args<N: Network>(
    network: &N,
    registry: &Registry,
    step: &str,
    args: &[Arg],
    on_network_error: impl Fn(anyhow::Error) -> ProvisionError,
) -> Result<Vec<ArgValue>, ProvisionError> {
    let mut values = Vec::with_capacity(args.len());

    for arg in args {
        let value = match arg {
            Arg::Value(value) => value.clone(),
            Arg::Resource(name) => ArgValue::Address(lookup(registry, step, name)?.address),
            Arg::Role { resource, role } => {
                let holder = lookup(registry, step, resource)?;
                let raw = network
                    .read_state(holder.address, &format!("{}()", role))
                    .await
                    .map_err(&on_network_error)?;
                let role = abi::decode_bytes32(&raw).map_err(&on_network_error)?;
                ArgValue::Bytes32(role)
            }
        };
        values.push(value);
    }

    Ok(values)
}

fn lookup(registry: &Registry, step: &str, name: &str) -> Result<DeployedResource, ProvisionError> {
    registry
        .resolve(name)
        .ok_or_else(|| ProvisionError::UnresolvedDependency {
            step: step.to_string(),
            dependency: name.to_string(),
        })
}

pub(crate) fn display_args(args: &[ArgValue]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContractId, InMemoryNetwork};

    fn sender() -> Address {
        Address::repeat_byte(0xde)
    }

    fn token_spec() -> ResourceSpec {
        ResourceSpec::new("xUSD", ContractId::new("contracts/xUSD.sol", "xUSD"))
    }

    fn oracle_spec() -> ResourceSpec {
        ResourceSpec::new(
            "PriceOracleAggregator",
            ContractId::new(
                "contracts/oracle/PriceOracleAggregator.sol",
                "PriceOracleAggregator",
            ),
        )
        .arg(Arg::resource("xUSD"))
    }

    #[tokio::test]
    async fn test_creates_then_fetches() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());

        let first = deployer.ensure(&token_spec()).await.unwrap();
        assert!(first.is_created());

        let second = deployer.ensure(&token_spec()).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(first.resource(), second.resource());
        assert_eq!(network.creates().len(), 1);
    }

    #[tokio::test]
    async fn test_injects_dependency_addresses() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());

        let token = deployer.deploy_or_fetch(&token_spec()).await.unwrap();
        let oracle = deployer.deploy_or_fetch(&oracle_spec()).await.unwrap();

        assert_eq!(oracle.constructor_args, vec![ArgValue::Address(token.address)]);
        assert_eq!(
            network.contract_at(oracle.address),
            Some(oracle_spec().contract)
        );
    }

    #[tokio::test]
    async fn test_missing_dependency_is_unresolved() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());

        let err = deployer.deploy_or_fetch(&oracle_spec()).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::UnresolvedDependency { ref dependency, .. } if dependency == "xUSD"
        ));
        assert!(network.creates().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_creation_is_not_recorded() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());
        network.fail_create_once(|contract, _| contract.name == "xUSD");

        let err = deployer.deploy_or_fetch(&token_spec()).await.unwrap_err();
        assert!(err.is_deployment_failure());
        assert!(registry.resolve("xUSD").is_none());

        deployer.deploy_or_fetch(&token_spec()).await.unwrap();
        assert!(registry.resolve("xUSD").is_some());
    }

    #[tokio::test]
    async fn test_drifted_args_are_rejected() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());

        let original = deployer
            .deploy_or_fetch(&token_spec().arg(ArgValue::uint(1)))
            .await
            .unwrap();
        let err = deployer
            .deploy_or_fetch(&token_spec().arg(ArgValue::uint(2)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::ResourceDrift { ref name, address, .. }
                if name == "xUSD" && address == original.address
        ));
        assert_eq!(registry.resolve("xUSD"), Some(original));
        assert_eq!(network.creates().len(), 1);
    }

    #[tokio::test]
    async fn test_role_args_skip_drift_check() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());

        deployer.deploy_or_fetch(&token_spec()).await.unwrap();
        let spec = ResourceSpec::new("Minter", ContractId::new("contracts/Minter.sol", "Minter"))
            .arg(Arg::role("xUSD", "MINTER_ROLE"));
        let created = deployer.deploy_or_fetch(&spec).await.unwrap();
        let fetched = deployer.deploy_or_fetch(&spec).await.unwrap();

        assert_eq!(created, fetched);
        assert_eq!(network.creates().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_name_creates_once() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let deployer = ResourceDeployer::new(&network, &registry, sender());
        let spec = token_spec();

        let (a, b) = tokio::join!(deployer.ensure(&spec), deployer.ensure(&spec));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.resource().address, b.resource().address);
        assert_eq!(network.creates().len(), 1);
        assert!(a.is_created() ^ b.is_created());
    }
}
