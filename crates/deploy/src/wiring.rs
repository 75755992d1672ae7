//! Configuration calls issued against deployed resources.

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    Arg, ArgValue, Network, ProvisionError, Registry,
    resource_deployer::{display_args, resolve_args},
};

/// A configuration call as written in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringSpec {
    /// Unique label, e.g. `xUSD.grantRole(MINTER_ROLE, Redeem)`.
    pub label: String,
    /// Logical name of the resource the call is sent to.
    pub target: String,
    /// Function signature, e.g. `grantRole(bytes32,address)`.
    pub operation: String,
    pub args: Vec<Arg>,
    /// A failed optional action is reported but does not stop the run.
    pub required: bool,
}

impl WiringSpec {
    /// A required wiring action.
    pub fn new(
        label: impl Into<String>,
        target: impl Into<String>,
        operation: impl Into<String>,
        args: Vec<Arg>,
    ) -> Self {
        Self {
            label: label.into(),
            target: target.into(),
            operation: operation.into(),
            args,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// The target followed by every resource the arguments reference.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.target.as_str()).chain(self.args.iter().filter_map(Arg::dependency))
    }
}

/// A wiring action with every reference resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringAction {
    pub label: String,
    pub target: String,
    pub target_address: Address,
    pub operation: String,
    pub args: Vec<ArgValue>,
    pub required: bool,
    /// Set once the call is confirmed on the network.
    pub confirmed: bool,
}

impl WiringSpec {
    /// Resolve the target and arguments against the registry and the network.
    pub async fn resolve<N: Network>(
        &self,
        network: &N,
        registry: &Registry,
    ) -> Result<WiringAction, ProvisionError> {
        let target = registry.resolve(&self.target).ok_or_else(|| {
            ProvisionError::UnresolvedDependency {
                step: self.label.clone(),
                dependency: self.target.clone(),
            }
        })?;

        let args = resolve_args(network, registry, &self.label, &self.args, |source| {
            ProvisionError::WiringFailed {
                action: self.label.clone(),
                source,
            }
        })
        .await?;

        Ok(WiringAction {
            label: self.label.clone(),
            target: self.target.clone(),
            target_address: target.address,
            operation: self.operation.clone(),
            args,
            required: self.required,
            confirmed: false,
        })
    }
}

/// Submit a wiring call and wait for its confirmation.
///
/// There is no local record of applied wiring: calling this twice sends the
/// transaction twice.
pub async fn apply_wiring<N: Network>(
    network: &N,
    sender: Address,
    mut action: WiringAction,
) -> Result<WiringAction, ProvisionError> {
    let failed = |source| ProvisionError::WiringFailed {
        action: action.label.clone(),
        source,
    };

    tracing::info!(
        action = %action.label,
        target = %action.target_address,
        args = %display_args(&action.args),
        "Applying wiring..."
    );

    let pending = network
        .submit_call(action.target_address, &action.operation, &action.args, sender)
        .await
        .map_err(failed)?;

    let confirmation = network.await_confirmation(&pending).await.map_err(failed)?;

    tracing::info!(
        action = %action.label,
        tx_hash = %confirmation.tx_hash,
        block = ?confirmation.block_number,
        "Wiring confirmed"
    );

    action.confirmed = true;
    Ok(action)
}
