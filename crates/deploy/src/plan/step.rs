//! Step and stage descriptors.

use std::collections::HashSet;

use derive_more::Deref;

use crate::{ProvisionError, ResourceSpec, WiringSpec};

/// A single unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Create a resource (or fetch it from the registry).
    Deploy(ResourceSpec),
    /// Issue a configuration call against deployed resources.
    Wire(WiringSpec),
}

impl Step {
    /// Unique identifier: the resource name or the wiring label.
    pub fn id(&self) -> &str {
        match self {
            Self::Deploy(spec) => &spec.name,
            Self::Wire(spec) => &spec.label,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deploy(_) => "deploy",
            Self::Wire(_) => "wire",
        }
    }

    /// The resource name this step makes available to later steps.
    pub fn produces(&self) -> Option<&str> {
        match self {
            Self::Deploy(spec) => Some(&spec.name),
            Self::Wire(_) => None,
        }
    }

    /// Resource names that must exist before this step runs.
    pub fn consumes(&self) -> Vec<&str> {
        match self {
            Self::Deploy(spec) => spec.dependencies().collect(),
            Self::Wire(spec) => spec.dependencies().collect(),
        }
    }
}

impl From<ResourceSpec> for Step {
    fn from(spec: ResourceSpec) -> Self {
        Self::Deploy(spec)
    }
}

impl From<WiringSpec> for Step {
    fn from(spec: WiringSpec) -> Self {
        Self::Wire(spec)
    }
}

/// A group of steps executed before any later stage starts.
///
/// A stage has one or more lanes. Steps within a lane run in order. Lanes of a
/// concurrent stage have no dependencies on each other and may run in parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub label: String,
    pub lanes: Vec<Vec<Step>>,
    pub concurrent: bool,
}

impl Stage {
    /// A stage with a single lane.
    pub fn sequential(label: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            label: label.into(),
            lanes: vec![steps],
            concurrent: false,
        }
    }

    /// A stage whose lanes are independent of each other.
    pub fn concurrent(label: impl Into<String>, lanes: Vec<Vec<Step>>) -> Self {
        Self {
            label: label.into(),
            lanes,
            concurrent: true,
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.lanes.iter().flatten()
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct DeploymentPlan {
    stages: Vec<Stage>,
}

impl DeploymentPlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// All steps in execution order (lanes of a stage in declaration order).
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(Stage::steps)
    }

    /// All resources the plan deploys.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.steps().filter_map(|step| match step {
            Step::Deploy(spec) => Some(spec),
            Step::Wire(_) => None,
        })
    }

    /// All wiring actions the plan issues.
    pub fn wiring(&self) -> impl Iterator<Item = &WiringSpec> {
        self.steps().filter_map(|step| match step {
            Step::Wire(spec) => Some(spec),
            Step::Deploy(_) => None,
        })
    }

    /// Check that the plan is a valid topological order.
    ///
    /// Every step id is unique, every resource is produced once, and every
    /// consumed name is produced by an earlier stage or earlier in the same
    /// lane. Lanes of one stage can't see each other's resources.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let mut ids = HashSet::new();
        let mut produced: HashSet<&str> = HashSet::new();

        for stage in &self.stages {
            if stage.lanes.iter().all(Vec::is_empty) {
                return Err(ProvisionError::InvalidPlan(format!(
                    "stage '{}' has no steps",
                    stage.label
                )));
            }

            let mut stage_produced: HashSet<&str> = HashSet::new();

            for lane in &stage.lanes {
                let mut visible = produced.clone();

                for step in lane {
                    if !ids.insert(step.id()) {
                        return Err(ProvisionError::InvalidPlan(format!(
                            "step '{}' appears more than once",
                            step.id()
                        )));
                    }

                    if let Some(missing) = step
                        .consumes()
                        .into_iter()
                        .find(|name| !visible.contains(name))
                    {
                        return Err(ProvisionError::InvalidPlan(format!(
                            "step '{}' consumes '{}' before it is produced",
                            step.id(),
                            missing
                        )));
                    }

                    if let Some(name) = step.produces() {
                        if produced.contains(name) || !stage_produced.insert(name) {
                            return Err(ProvisionError::InvalidPlan(format!(
                                "resource '{}' is produced more than once",
                                name
                            )));
                        }
                        visible.insert(name);
                    }
                }
            }

            produced.extend(stage_produced);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arg, ContractId};

    fn deploy(name: &str, deps: &[&str]) -> Step {
        let mut spec = ResourceSpec::new(name, ContractId::new("contracts/Mock.sol", "Mock"));
        for dep in deps {
            spec = spec.arg(Arg::resource(*dep));
        }
        Step::Deploy(spec)
    }

    fn wire(label: &str, target: &str, deps: &[&str]) -> Step {
        Step::Wire(WiringSpec::new(
            label,
            target,
            "configure(address)",
            deps.iter().map(|d| Arg::resource(*d)).collect(),
        ))
    }

    #[test]
    fn test_valid_chain() {
        let plan = DeploymentPlan::new(vec![
            Stage::sequential("a", vec![deploy("A", &[])]),
            Stage::sequential("b", vec![deploy("B", &["A"]), wire("A.configure(B)", "A", &["B"])]),
        ]);
        plan.validate().unwrap();
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let plan = DeploymentPlan::new(vec![
            Stage::sequential("b", vec![deploy("B", &["A"])]),
            Stage::sequential("a", vec![deploy("A", &[])]),
        ]);
        assert!(matches!(plan.validate(), Err(ProvisionError::InvalidPlan(_))));
    }

    #[test]
    fn test_wiring_target_must_exist() {
        let plan = DeploymentPlan::new(vec![Stage::sequential(
            "a",
            vec![deploy("A", &[]), wire("B.configure(A)", "B", &["A"])],
        )]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_cross_lane_dependency_is_rejected() {
        let plan = DeploymentPlan::new(vec![Stage::concurrent(
            "lanes",
            vec![vec![deploy("A", &[])], vec![deploy("B", &["A"])]],
        )]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_duplicate_producer_is_rejected() {
        let plan = DeploymentPlan::new(vec![
            Stage::sequential("a", vec![deploy("A", &[])]),
            Stage::sequential("again", vec![deploy("A", &[])]),
        ]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_empty_stage_is_rejected() {
        let plan = DeploymentPlan::new(vec![Stage::sequential("empty", vec![])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_lanes_see_earlier_stages() {
        let plan = DeploymentPlan::new(vec![
            Stage::sequential("a", vec![deploy("A", &[])]),
            Stage::concurrent(
                "lanes",
                vec![
                    vec![deploy("B", &["A"]), wire("A.configure(B)", "A", &["B"])],
                    vec![deploy("C", &["A"]), wire("A.configure(C)", "A", &["C"])],
                ],
            ),
        ]);
        plan.validate().unwrap();
        assert_eq!(plan.resources().count(), 3);
        assert_eq!(plan.wiring().count(), 2);
    }
}
