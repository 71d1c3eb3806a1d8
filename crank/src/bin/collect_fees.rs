//! Harvests withheld transfer fees for a mint into the treasury and,
//! optionally, splits the harvested amount across wallets by percentage.

use std::path::PathBuf;
use std::process::ExitCode;

use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::Signer;
use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use reflection_crank::config::{default_keypair_path, default_log_file, load_keypair, parse_pubkey};
use reflection_crank::engine::balance::format_amount;
use reflection_crank::engine::disburse::{disburse, DisbursementPlan};
use reflection_crank::engine::harvest::harvest;
use reflection_crank::engine::split::{plan_split, SplitRecipient};
use reflection_crank::logging::{self, SUCCESS_TARGET};
use reflection_crank::rpc::SolanaLedger;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Cluster {
    Devnet,
    Testnet,
    MainnetBeta,
    Localhost,
}

impl Cluster {
    fn url(self) -> &'static str {
        match self {
            Self::Devnet => "https://api.devnet.solana.com",
            Self::Testnet => "https://api.testnet.solana.com",
            Self::MainnetBeta => "https://api.mainnet-beta.solana.com",
            Self::Localhost => "http://127.0.0.1:8899",
        }
    }
}

/// Collect withheld Token-2022 transfer fees into a treasury account
#[derive(Parser, Debug)]
#[command(name = "collect-fees", version, about)]
struct CollectArgs {
    /// Fee-bearing mint
    #[arg(long)]
    mint: String,

    /// Withdraw-withheld authority keypair; also pays fees
    #[arg(long)]
    authority: Option<PathBuf>,

    /// Wallet owning the treasury token account (defaults to the authority)
    #[arg(long)]
    treasury: Option<String>,

    /// Keypair of the treasury wallet; co-signs the split when the
    /// treasury is not the authority
    #[arg(long)]
    treasury_authority: Option<PathBuf>,

    /// Token accounts to harvest; scanned when omitted
    #[arg(long, value_delimiter = ',')]
    accounts: Vec<String>,

    /// Custom RPC endpoint
    #[arg(long, conflicts_with = "cluster")]
    url: Option<String>,

    #[arg(long, value_enum, default_value_t = Cluster::Devnet)]
    cluster: Cluster,

    /// Split the harvested amount, e.g. `wallet1:70,wallet2:30`
    #[arg(long)]
    split: Option<String>,

    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

/// Treasury wallet, and whether this invocation holds a key that can move
/// funds out of it
fn resolve_treasury(
    explicit: Option<Pubkey>,
    treasury_signer: Option<Pubkey>,
    authority: Pubkey,
) -> anyhow::Result<(Pubkey, bool)> {
    let treasury = explicit.or(treasury_signer).unwrap_or(authority);
    match treasury_signer {
        Some(signer) if signer != treasury => {
            bail!("Treasury authority {signer} does not own treasury {treasury}")
        }
        Some(_) => Ok((treasury, true)),
        None => Ok((treasury, treasury == authority)),
    }
}

async fn collect(args: CollectArgs) -> anyhow::Result<()> {
    let mint = parse_pubkey("mint", &args.mint)?;
    let recipients = args
        .split
        .as_deref()
        .map(SplitRecipient::parse_list)
        .transpose()?;
    let explicit = args
        .accounts
        .iter()
        .map(|a| parse_pubkey("token account", a))
        .collect::<Result<Vec<_>, _>>()?;

    let authority = load_keypair(&args.authority.unwrap_or_else(default_keypair_path))?;
    let treasury_signer = args
        .treasury_authority
        .as_deref()
        .map(load_keypair)
        .transpose()?;
    let explicit_treasury = args
        .treasury
        .as_deref()
        .map(|t| parse_pubkey("treasury owner", t))
        .transpose()?;
    let (treasury, can_sign_for_treasury) = resolve_treasury(
        explicit_treasury,
        treasury_signer.as_ref().map(|signer| signer.pubkey()),
        authority.pubkey(),
    )?;

    let rpc_url = args.url.unwrap_or_else(|| args.cluster.url().to_string());
    let mut client = SolanaLedger::new(rpc_url.clone(), authority);
    if let Some(signer) = treasury_signer {
        client = client.with_cosigner(signer);
    }

    info!(%mint, rpc = %rpc_url, "Collecting transfer fees");
    let report = harvest(
        &client,
        &mint,
        &treasury,
        (!explicit.is_empty()).then_some(explicit.as_slice()),
    )
    .await?;
    let asset = report.mint.asset();
    info!(
        target: SUCCESS_TARGET,
        amount = %format_amount(report.delta, asset.decimals),
        treasury_account = %report.treasury_account,
        "Collected fees into treasury"
    );

    let Some(recipients) = recipients else {
        return Ok(());
    };
    if report.delta == 0 {
        info!("Nothing collected; split skipped");
        return Ok(());
    }
    if !can_sign_for_treasury {
        bail!("Split from treasury {treasury} requires --treasury-authority");
    }

    let allocations = plan_split(&recipients, report.delta)?;
    let plan = DisbursementPlan {
        reward: asset,
        source_account: report.treasury_account,
        authority: treasury,
        // one atomic transaction for the whole split
        batch_size: allocations.len(),
        failed_batch_retries: 0,
    };
    let payout = disburse(&client, &plan, &allocations).await;
    if payout.failed > 0 {
        bail!("Split transaction failed; collected fees remain in the treasury");
    }

    for record in &payout.records {
        info!(
            recipient = %record.owner,
            amount = %format_amount(record.amount, asset.decimals),
            signature = %record.batch_ref,
            "Distributed collected fees"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CollectArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::FAILURE,
            };
        }
    };

    let log_file = args.log_file.clone().unwrap_or_else(default_log_file);
    if let Err(err) = logging::init(&log_file) {
        eprintln!("Unable to open log file {}: {err}", log_file.display());
        return ExitCode::FAILURE;
    }

    match collect(args).await.context("Fee collection failed") {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
