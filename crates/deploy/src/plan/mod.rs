//! Deployment plans: ordered stages of deploy and wiring steps.

mod runner;
mod standard;
mod step;

pub use runner::{PlanRunner, RunReport, StepOutcome};
pub use standard::{
    AssetPrices, DEFAULT_PRICE_DECIMALS, LsdAsset, MINTER_ROLE, MOCK_TOKEN_DECIMALS, ORACLE,
    PriceFeedAsset, REDEEM, STAKING, TOKEN, xusd_plan,
};
pub use step::{DeploymentPlan, Stage, Step};

use comfy_table::{Table, presets::UTF8_FULL};

impl DeploymentPlan {
    /// Render the plan as a table, one row per step.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["#", "Stage", "Kind", "Step", "Contract / Operation", "Arguments"]);

        let mut index = 0;
        for stage in self.iter() {
            for (lane_index, lane) in stage.lanes.iter().enumerate() {
                let stage_label = if stage.lanes.len() > 1 {
                    format!("{} [{}]", stage.label, lane_index + 1)
                } else {
                    stage.label.clone()
                };

                for step in lane {
                    index += 1;
                    let (target, args) = match step {
                        Step::Deploy(spec) => (spec.contract.to_string(), &spec.args),
                        Step::Wire(spec) => {
                            (format!("{}.{}", spec.target, spec.operation), &spec.args)
                        }
                    };
                    let args = args
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");

                    table.add_row(vec![
                        index.to_string(),
                        stage_label.clone(),
                        step.kind().to_string(),
                        step.id().to_string(),
                        target,
                        args,
                    ]);
                }
            }
        }

        table
    }
}
