//! Plan execution.

use std::sync::{Mutex, PoisonError};

use alloy_core::primitives::Address;
use futures::future::join_all;

use super::{DeploymentPlan, Step};
use crate::{
    DeployOutcome, Network, ProvisionError, Registry, ResourceDeployer, WiringAction,
    apply_wiring,
};

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Deployed(DeployOutcome),
    Wired(WiringAction),
}

/// What a plan run did, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub resources: Vec<DeployOutcome>,
    /// Every wiring action issued; unconfirmed entries are failed optional actions.
    pub wiring: Vec<WiringAction>,
}

impl RunReport {
    fn push(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Deployed(resource) => self.resources.push(resource),
            StepOutcome::Wired(action) => self.wiring.push(action),
        }
    }

    pub fn created(&self) -> usize {
        self.resources.iter().filter(|r| r.is_created()).count()
    }

    pub fn fetched(&self) -> usize {
        self.resources.len() - self.created()
    }

    pub fn confirmed_wiring(&self) -> usize {
        self.wiring.iter().filter(|a| a.confirmed).count()
    }

    pub fn failed_wiring(&self) -> impl Iterator<Item = &WiringAction> {
        self.wiring.iter().filter(|a| !a.confirmed)
    }
}

/// Executes a [`DeploymentPlan`] stage by stage.
pub struct PlanRunner<'a, N> {
    network: &'a N,
    registry: &'a Registry,
    sender: Address,
    parallel: bool,
    last_completed: Mutex<Option<String>>,
}

impl<'a, N: Network> PlanRunner<'a, N> {
    pub fn new(network: &'a N, registry: &'a Registry, sender: Address) -> Self {
        Self {
            network,
            registry,
            sender,
            parallel: false,
            last_completed: Mutex::new(None),
        }
    }

    /// Run the lanes of concurrent stages in parallel.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run every stage in order.
    ///
    /// A stage starts only after every step of the previous stage is recorded
    /// (resources) or confirmed (wiring). The first fatal error stops the run;
    /// whatever was recorded before it stays in the registry.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<RunReport, ProvisionError> {
        plan.validate()?;

        let mut report = RunReport::default();

        for stage in plan.iter() {
            let parallel = self.parallel && stage.concurrent && stage.lanes.len() > 1;
            tracing::info!(stage = %stage.label, lanes = stage.lanes.len(), parallel, "Starting stage...");

            let lanes = if parallel {
                // Every lane runs to completion or to its own failure, so no
                // in-flight creation is dropped before it is recorded.
                join_all(stage.lanes.iter().map(|lane| self.run_lane(lane)))
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
            } else {
                let mut lanes = Vec::with_capacity(stage.lanes.len());
                let mut failure = None;
                for lane in &stage.lanes {
                    match self.run_lane(lane).await {
                        Ok(outcomes) => lanes.push(outcomes),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure.map_or(Ok(lanes), Err)
            };

            match lanes {
                Ok(lanes) => lanes.into_iter().flatten().for_each(|o| report.push(o)),
                Err(e) => {
                    tracing::error!(
                        stage = %stage.label,
                        last_completed = ?self.last_completed(),
                        error = %e,
                        "Stage failed, stopping the run"
                    );
                    return Err(e);
                }
            }
        }

        tracing::info!(
            created = report.created(),
            reused = report.fetched(),
            wiring_confirmed = report.confirmed_wiring(),
            "Plan complete"
        );

        Ok(report)
    }

    fn last_completed(&self) -> Option<String> {
        self.last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_lane(&self, lane: &[Step]) -> Result<Vec<StepOutcome>, ProvisionError> {
        let mut outcomes = Vec::with_capacity(lane.len());
        for step in lane {
            let outcome = self.run_step(step).await.inspect_err(|e| {
                tracing::error!(step = %step.id(), kind = step.kind(), error = %e, "Step failed");
            })?;
            *self
                .last_completed
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(step.id().to_string());
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run_step(&self, step: &Step) -> Result<StepOutcome, ProvisionError> {
        match step {
            Step::Deploy(spec) => ResourceDeployer::new(self.network, self.registry, self.sender)
                .ensure(spec)
                .await
                .map(StepOutcome::Deployed),
            Step::Wire(spec) => {
                let action = spec.resolve(self.network, self.registry).await?;
                match apply_wiring(self.network, self.sender, action.clone()).await {
                    Ok(action) => Ok(StepOutcome::Wired(action)),
                    Err(e) if !spec.required => {
                        tracing::warn!(
                            action = %spec.label,
                            error = %e,
                            "Optional wiring failed, continuing"
                        );
                        Ok(StepOutcome::Wired(action))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arg, ContractId, InMemoryNetwork, ResourceSpec, Stage, WiringSpec};

    fn sender() -> Address {
        Address::repeat_byte(0xde)
    }

    fn spec(name: &str) -> ResourceSpec {
        ResourceSpec::new(name, ContractId::new(format!("contracts/{name}.sol"), name))
    }

    fn plan(optional: bool) -> DeploymentPlan {
        let mut wire = WiringSpec::new("A.configure(B)", "A", "configure(address)", vec![
            Arg::resource("B"),
        ]);
        if optional {
            wire = wire.optional();
        }

        DeploymentPlan::new(vec![
            Stage::sequential("a", vec![spec("A").into()]),
            Stage::sequential("b", vec![spec("B").arg(Arg::resource("A")).into(), wire.into()]),
            Stage::sequential("c", vec![spec("C").into()]),
        ])
    }

    #[tokio::test]
    async fn test_run_reports_counts() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let report = PlanRunner::new(&network, &registry, sender())
            .run(&plan(false))
            .await
            .unwrap();

        assert_eq!(report.created(), 3);
        assert_eq!(report.fetched(), 0);
        assert_eq!(report.confirmed_wiring(), 1);
    }

    #[tokio::test]
    async fn test_required_wiring_failure_stops_run() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        network.fail_call_once(|operation, _| operation == "configure(address)");

        let err = PlanRunner::new(&network, &registry, sender())
            .run(&plan(false))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::WiringFailed { .. }));
        assert!(registry.resolve("B").is_some());
        assert!(registry.resolve("C").is_none());
    }

    #[tokio::test]
    async fn test_optional_wiring_failure_is_reported() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        network.fail_call_once(|operation, _| operation == "configure(address)");

        let report = PlanRunner::new(&network, &registry, sender())
            .run(&plan(true))
            .await
            .unwrap();

        assert_eq!(report.created(), 3);
        assert_eq!(report.confirmed_wiring(), 0);
        assert_eq!(report.failed_wiring().count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_plan_touches_nothing() {
        let network = InMemoryNetwork::new();
        let registry = Registry::in_memory("testnet");
        let invalid = DeploymentPlan::new(vec![Stage::sequential("b", vec![
            spec("B").arg(Arg::resource("A")).into(),
        ])]);

        let err = PlanRunner::new(&network, &registry, sender())
            .run(&invalid)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidPlan(_)));
        assert!(network.events().is_empty());
    }
}
