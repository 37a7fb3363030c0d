//! Runs the finality stall recovery scenario against a local validator
//! cluster. Exits with 0 if finalization recovered, 1 otherwise.
use anyhow::Context as _;
use clap::Parser;
use finality_recovery::{clock::RealClock, Scenario};
use finality_recovery_tools::{config, LocalCluster};
use std::{path::PathBuf, process::ExitCode};

mod utils;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "tester")]
struct TesterCLI {
    /// Path to a JSON scenario config. Falls back to `SCENARIO_CONFIG`, then
    /// to the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the working directory of the cluster.
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Stop the nodes and purge their state after a successful run.
    #[arg(long)]
    cleanup: bool,
    /// Write DEBUG logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

async fn run(args: TesterCLI) -> anyhow::Result<()> {
    let mut config = config::load(args.config.as_deref()).context("config::load()")?;
    if let Some(workdir) = args.workdir {
        config.workdir = workdir;
    }
    config.cleanup_on_success |= args.cleanup;
    tracing::debug!(?config, "loaded config");

    let cluster = LocalCluster::new(config.workdir.clone(), config.rpc_timeout());
    let mut scenario = Scenario::new(config, cluster, RealClock.into());
    let report = scenario.run().await?;
    tracing::info!(
        stalled_at = %report.stalled_at,
        resumed_at = %report.resumed_at,
        chainspec = %report.patched_descriptor.display(),
        "Test Passed!"
    );
    Ok(())
}

/// Main function for the test.
#[tokio::main]
async fn main() -> ExitCode {
    let args = TesterCLI::parse();
    if let Err(err) = utils::init_logging(args.log_file.as_deref()) {
        eprintln!("failed to set up logging: {err:#}");
        return ExitCode::FAILURE;
    }
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Test Failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
