use std::process::ExitCode;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use reflection_crank::config::{load_keypair, CrankArgs};
use reflection_crank::engine::{Orchestrator, RunOutcome};
use reflection_crank::logging;
use reflection_crank::rpc::SolanaLedger;
use reflection_crank::states::JsonFileStore;
use swap_router::JupiterClient;
use tracing::{error, info};

async fn run(args: CrankArgs) -> anyhow::Result<RunOutcome> {
    let config = args.into_config()?;
    let keypair = load_keypair(&config.treasury_keypair_path)?;

    let client = SolanaLedger::new(config.rpc_url.clone(), keypair);
    let store = JsonFileStore::new(&config.state_dir).with_lease_ttl(config.lease_ttl);
    info!(state_dir = %store.dir().display(), "Using ledger state directory");
    let router = JupiterClient::new(config.jupiter_api_url.clone(), config.router_timeout)
        .context("Unable to build swap router client")?;

    let mut orchestrator = Orchestrator::new(&config, &client, &store, &router);
    let outcome = orchestrator.run().await;
    let phase = orchestrator.phase();
    outcome.with_context(|| format!("Run aborted during {phase}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CrankArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    if let Err(err) = logging::init(&args.log_file()) {
        eprintln!("Unable to open log file {}: {err}", args.log_file().display());
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(RunOutcome::Completed(summary)) => {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "=== Reflection Distribution Complete ==="
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Skipped(reason)) => {
            info!(%reason, "=== Reflection Distribution Skipped ===");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("Fatal error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
