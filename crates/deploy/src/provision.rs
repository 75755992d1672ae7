//! A full provisioning run: execute the plan, then verify on persistent networks.

use alloy_core::primitives::Address;

use crate::{
    DeploymentPlan, Network, PlanRunner, ProvisionError, Registry, RunReport,
    VerificationOutcome, VerificationReporter, VerificationRequest, Verifier,
    is_ephemeral_network,
};

/// Outcome of [`Provisioner::provision`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub run: RunReport,
    /// Empty when verification was skipped.
    pub verification: Vec<VerificationOutcome>,
}

/// Ties a network, a registry and a sender together for a run.
pub struct Provisioner<'a, N> {
    network: &'a N,
    registry: &'a Registry,
    sender: Address,
    parallel_assets: bool,
}

impl<'a, N: Network> Provisioner<'a, N> {
    pub fn new(network: &'a N, registry: &'a Registry, sender: Address) -> Self {
        Self {
            network,
            registry,
            sender,
            parallel_assets: false,
        }
    }

    pub fn parallel_assets(mut self, parallel_assets: bool) -> Self {
        self.parallel_assets = parallel_assets;
        self
    }

    /// Run the plan, then submit verification for every resource that asks for it.
    ///
    /// Verification is skipped on ephemeral networks and when no reporter is given.
    /// Its failures are part of the report, never of the result.
    pub async fn provision<V: Verifier>(
        &self,
        plan: &DeploymentPlan,
        reporter: Option<&VerificationReporter<V>>,
    ) -> Result<ProvisionReport, ProvisionError> {
        tracing::info!(
            network = %self.registry.network(),
            sender = %self.sender,
            steps = plan.steps().count(),
            "Starting provisioning..."
        );

        let run = PlanRunner::new(self.network, self.registry, self.sender)
            .parallel(self.parallel_assets)
            .run(plan)
            .await?;

        let verification = match reporter {
            _ if is_ephemeral_network(self.registry.network()) => {
                tracing::info!(
                    network = %self.registry.network(),
                    "Ephemeral network, skipping verification"
                );
                Vec::new()
            }
            None => {
                tracing::info!("No verifier configured, skipping verification");
                Vec::new()
            }
            Some(reporter) => {
                let requests = verification_requests(plan, self.registry);
                tracing::info!(count = requests.len(), "Verifying resources...");
                reporter.report_all(&requests).await
            }
        };

        Ok(ProvisionReport { run, verification })
    }
}

/// Requests for every recorded resource the plan marks for verification, in plan order.
pub fn verification_requests(
    plan: &DeploymentPlan,
    registry: &Registry,
) -> Vec<VerificationRequest> {
    plan.resources()
        .filter(|spec| spec.verify)
        .filter_map(|spec| registry.resolve(&spec.name))
        .map(|resource| VerificationRequest::from(&resource))
        .collect()
}
