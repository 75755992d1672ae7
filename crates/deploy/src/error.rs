//! Error taxonomy for a provisioning run.

use alloy_core::primitives::Address;
use thiserror::Error;

/// Errors that stop a provisioning run.
///
/// Verification failures never show up here: they are captured per request by
/// the [`VerificationReporter`](crate::VerificationReporter) and only logged.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The network rejected or timed out on a resource creation.
    #[error("Deployment of {name} failed")]
    DeploymentFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A name is already recorded with a different address.
    #[error("Resource {name} is already recorded at {recorded}, refusing to overwrite with {observed}")]
    DuplicateResource {
        name: String,
        recorded: Address,
        observed: Address,
    },

    /// A name is recorded with constructor arguments its current spec no
    /// longer produces. Rename the resource to deploy a new instance.
    #[error(
        "Resource {name} at {address} was created with different arguments \
         (recorded {recorded_hash}, now {current_hash})"
    )]
    ResourceDrift {
        name: String,
        address: Address,
        recorded_hash: String,
        current_hash: String,
    },

    /// A configuration call against a deployed resource was rejected.
    #[error("Wiring action {action} failed")]
    WiringFailed {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step referenced a resource that has not been recorded yet.
    #[error("Step {step} depends on {dependency}, which is not deployed")]
    UnresolvedDependency { step: String, dependency: String },

    /// The deployment plan does not describe a valid dependency order.
    #[error("Invalid deployment plan: {0}")]
    InvalidPlan(String),

    /// The registry could not be read, written or locked.
    #[error("Registry error")]
    Registry(#[source] anyhow::Error),
}

impl ProvisionError {
    /// Whether the error was raised by the network while creating a resource.
    pub fn is_deployment_failure(&self) -> bool {
        matches!(self, Self::DeploymentFailed { .. })
    }
}
