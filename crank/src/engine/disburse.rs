use anchor_client::solana_sdk::instruction::Instruction;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::Signature;
use tracing::{error, info, warn};

use crate::engine::allocation::Allocation;
use crate::engine::balance::TokenAsset;
use crate::errors::{CrankError, Result};
use crate::events::{self, PayoutBatchSettled};
use crate::instructions;
use crate::logging::SUCCESS_TARGET;
use crate::rpc::LedgerClient;

#[derive(Debug, Clone, Copy)]
pub struct DisbursementPlan {
    pub reward: TokenAsset,
    /// Treasury account funding the payouts
    pub source_account: Pubkey,
    /// Owner of `source_account`; must be the payer or one of the
    /// client's co-signers
    pub authority: Pubkey,
    pub batch_size: usize,
    /// Extra submissions of a failed batch within this run
    pub failed_batch_retries: u8,
}

/// A confirmed payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRecord {
    pub owner: Pubkey,
    pub amount: u64,
    pub batch_ref: Signature,
}

#[derive(Debug, Clone, Default)]
pub struct DisbursementReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Sum over confirmed batches only
    pub total_paid: u64,
    pub records: Vec<PayoutRecord>,
    pub failed_recipients: Vec<Allocation<Pubkey>>,
}

fn batch_instructions(
    payer: &Pubkey,
    plan: &DisbursementPlan,
    batch: &[Allocation<Pubkey>],
) -> Result<Vec<Instruction>> {
    let mut ixs = Vec::with_capacity(batch.len() * 2);
    for allocation in batch {
        ixs.extend(instructions::payout_instructions(
            payer,
            &plan.authority,
            &plan.source_account,
            &plan.reward,
            &allocation.recipient,
            allocation.amount,
        )?);
    }
    Ok(ixs)
}

/// Submits a batch once and waits for it. An unconfirmed batch is
/// settled first: it counts as paid if it landed late, and is reported
/// failed only once it can no longer land.
async fn submit_once<C: LedgerClient + ?Sized>(client: &C, ixs: &[Instruction]) -> Attempt {
    let signature = match client.submit_batch(ixs).await {
        Ok(signature) => signature,
        Err(err) => return Attempt::Failed(err),
    };
    let unconfirmed = match client.confirm_batch(&signature).await {
        Ok(()) => return Attempt::Landed(signature),
        Err(err) => err,
    };

    warn!(%signature, error = %unconfirmed, "Batch unconfirmed, waiting for it to expire");
    match client.settle_unconfirmed(&signature).await {
        Ok(true) => {
            info!(%signature, "Batch landed after its confirmation window");
            Attempt::Landed(signature)
        }
        Ok(false) => Attempt::Failed(unconfirmed),
        Err(err) => Attempt::Unknown(err),
    }
}

enum Attempt {
    Landed(Signature),
    /// Known not to have executed; safe to resubmit
    Failed(CrankError),
    /// May still have executed; never resubmitted
    Unknown(CrankError),
}

async fn settle_batch<C: LedgerClient + ?Sized>(
    client: &C,
    plan: &DisbursementPlan,
    batch: &[Allocation<Pubkey>],
) -> (u8, Result<Signature>) {
    let ixs = match batch_instructions(&client.payer(), plan, batch) {
        Ok(ixs) => ixs,
        Err(err) => return (0, Err(err)),
    };

    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        match submit_once(client, &ixs).await {
            Attempt::Landed(signature) => return (attempt, Ok(signature)),
            Attempt::Failed(err) if attempt <= plan.failed_batch_retries => {
                warn!(attempt, error = %err, "Batch failed, resubmitting");
            }
            Attempt::Failed(err) | Attempt::Unknown(err) => return (attempt, Err(err)),
        }
    }
}

/// Pays `allocations` out of the treasury in batches of
/// `plan.batch_size`, one atomic transaction per batch.
///
/// A failed batch fails every recipient in it and never affects other
/// batches. Failures are reported, not returned.
pub async fn disburse<C: LedgerClient + ?Sized>(
    client: &C,
    plan: &DisbursementPlan,
    allocations: &[Allocation<Pubkey>],
) -> DisbursementReport {
    let mut report = DisbursementReport::default();
    let batch_size = plan.batch_size.max(1);

    for (index, batch) in allocations.chunks(batch_size).enumerate() {
        let batch_number = index + 1;
        let amount: u64 = batch.iter().map(|a| a.amount).sum();
        info!(batch = batch_number, recipients = batch.len(), amount, "Distributing to holders");

        let (attempts, outcome) = settle_batch(client, plan, batch).await;
        match &outcome {
            Ok(signature) => {
                info!(target: SUCCESS_TARGET, batch = batch_number, %signature, "Batch confirmed");
                report.succeeded += batch.len();
                report.total_paid = report.total_paid.saturating_add(amount);
                report.records.extend(batch.iter().map(|a| PayoutRecord {
                    owner: a.recipient,
                    amount: a.amount,
                    batch_ref: *signature,
                }));
            }
            Err(err) => {
                error!(batch = batch_number, error = %err, "Batch failed");
                report.failed += batch.len();
                report.failed_recipients.extend_from_slice(batch);
            }
        }

        events::emit(&PayoutBatchSettled {
            batch: batch_number,
            recipients: batch.len(),
            amount,
            attempts,
            signature: outcome.as_ref().ok().map(ToString::to_string),
            error: outcome.as_ref().err().map(ToString::to_string),
            timestamp: events::now(),
        });
    }

    report
}
