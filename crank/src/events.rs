use serde::Serialize;
use tracing::{info, warn};

use crate::engine::swap::{SwapPlan, SwapResult};

pub const EVENTS_TARGET: &str = "events";

/// Structured run event, written to the log as a JSON payload
pub trait RunEvent: Serialize {
    const NAME: &'static str;
}

pub fn emit<E: RunEvent>(event: &E) {
    match serde_json::to_string(event) {
        Ok(payload) => info!(target: EVENTS_TARGET, event = E::NAME, %payload),
        Err(err) => warn!(event = E::NAME, error = %err, "Unable to serialize run event"),
    }
}

/// Unix timestamp in seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Event emitted when withheld fees are swept into the treasury
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeesHarvested {
    /// The fee-bearing mint
    pub mint: String,
    /// Treasury token account receiving the fees
    pub treasury_account: String,
    /// Number of holder accounts swept
    pub accounts_harvested: usize,
    /// Amount withdrawn from the mint-level pool
    pub mint_pool_withdrawn: u64,
    /// Treasury balance before the sweep
    pub balance_before: u64,
    /// Treasury balance after the sweep
    pub balance_after: u64,
    /// Observed increase, the pool available for distribution
    pub harvested: u64,
    /// Timestamp of the harvest
    pub timestamp: i64,
}

impl RunEvent for FeesHarvested {
    const NAME: &'static str = "FeesHarvested";
}

/// Event emitted after the single swap attempt of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSettled {
    /// Fee asset sold
    pub input_mint: String,
    /// Reward asset bought
    pub output_mint: String,
    /// Amount of the fee asset offered
    pub input_amount: u64,
    /// Reward received; absent when the swap failed
    pub output_amount: Option<u64>,
    /// Swap transaction signature
    pub signature: Option<String>,
    /// Failure reason
    pub error: Option<String>,
    /// Existing reward balance available as fallback
    pub fallback_amount: Option<u64>,
    /// Timestamp of the attempt
    pub timestamp: i64,
}

impl SwapSettled {
    pub fn new(plan: &SwapPlan, result: &SwapResult) -> Self {
        let mut event = Self {
            input_mint: plan.from.mint.to_string(),
            output_mint: plan.to.mint.to_string(),
            input_amount: plan.amount,
            output_amount: None,
            signature: None,
            error: None,
            fallback_amount: None,
            timestamp: now(),
        };
        match result {
            SwapResult::Completed {
                output_amount,
                signature,
            } => {
                event.output_amount = Some(*output_amount);
                event.signature = Some(signature.to_string());
            }
            SwapResult::Failed {
                reason,
                fallback_amount,
            } => {
                event.error = Some(reason.clone());
                event.fallback_amount = *fallback_amount;
            }
        }
        event
    }
}

impl RunEvent for SwapSettled {
    const NAME: &'static str = "SwapSettled";
}

/// Event emitted once per disbursement batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutBatchSettled {
    /// 1-based batch number within the run
    pub batch: usize,
    /// Recipients in the batch
    pub recipients: usize,
    /// Sum of the batch's payouts
    pub amount: u64,
    /// Submissions made, including retries
    pub attempts: u8,
    /// Confirmed transaction signature
    pub signature: Option<String>,
    /// Failure reason of the last attempt
    pub error: Option<String>,
    /// Timestamp of settlement
    pub timestamp: i64,
}

impl RunEvent for PayoutBatchSettled {
    const NAME: &'static str = "PayoutBatchSettled";
}

/// Event emitted when a distribution run is recorded
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRunCompleted {
    /// The fee-bearing mint
    pub mint: String,
    /// Asset paid out
    pub reward_mint: String,
    /// Pool the allocation was computed from
    pub pool: u64,
    /// Amount confirmed on chain this run
    pub total_distributed: u64,
    /// Lifetime total after this run, as a decimal string
    pub lifetime_distributed: String,
    /// Recipients paid
    pub success_count: usize,
    /// Recipients in failed batches
    pub fail_count: usize,
    /// Timestamp of completion
    pub timestamp: i64,
}

impl RunEvent for DistributionRunCompleted {
    const NAME: &'static str = "DistributionRunCompleted";
}
