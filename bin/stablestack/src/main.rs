//! stablestack is a CLI tool to deploy and wire the xUSD stablecoin contracts in a single command.

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};

use cli::{Cli, Command, ConfigArgs};
use stablestack_deploy::{Deployer, resources_table};

async fn load_or_build(args: &ConfigArgs) -> Result<Deployer> {
    if let Some(config_path) = &args.config {
        let deployer = Deployer::load_from_file(config_path)?;

        tracing::info!(
            config_path = %config_path.display(),
            outdata_path = %deployer.outdata.display(),
            network = %deployer.network,
            "Loading deployment from config file..."
        );

        return Ok(deployer);
    }

    let deployer = args.builder().build().await?;

    // Save the configuration to Stablestack.toml before deploying
    deployer.save_config()?;

    Ok(deployer)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy(args) => {
            let deployer = load_or_build(&args).await?;
            deployer.deploy().await?;
        }
        Command::Plan { config, simulate } => {
            let deployer = config.offline()?;
            let plan = deployer.plan()?;
            plan.validate()?;
            println!("{}", plan.to_table());

            if simulate {
                tracing::info!(network = %deployer.network, "Simulating the plan in memory...");
                deployer.simulate().await?;
            }
        }
        Command::Status(args) => {
            let deployer = if args.config.is_some() || args.network.is_some() {
                args.offline()?
            } else {
                args.builder().build().await?
            };
            let resources = deployer.status()?;

            if resources.is_empty() {
                tracing::info!(network = %deployer.network, "Nothing recorded yet");
            } else {
                println!("{}", resources_table(&resources));
            }
        }
        Command::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "stablestack",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
