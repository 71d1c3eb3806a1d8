//! End-to-end distribution run.
//!
//! `Idle -> Harvesting -> Enumerating -> Filtering -> [Swapping] ->
//! Allocating -> Disbursing -> Recording -> Idle`, with early exits when
//! the pool is below the configured minimum or nobody is eligible. The
//! mint's run lease is held for the whole run and released on every exit
//! path.

use std::fmt;

use anchor_client::solana_sdk::pubkey::Pubkey;
use chrono::Utc;
use swap_router::SwapRouter;
use tracing::{info, warn};

use crate::config::DistributionConfig;
use crate::engine::allocation::{allocate, total_allocated, Allocation, RemainderPolicy};
use crate::engine::balance::{self, format_amount, TokenAsset};
use crate::engine::disburse::{disburse, DisbursementPlan, DisbursementReport};
use crate::engine::eligibility::{filter_eligible, group_by_owner};
use crate::engine::harvest::harvest;
use crate::engine::holders::enumerate_holders;
use crate::engine::swap::{resolve_reward_pool, swap_or_fallback, SwapPlan, SwapResult};
use crate::errors::Result;
use crate::events::{self, DistributionRunCompleted};
use crate::logging::SUCCESS_TARGET;
use crate::rpc::LedgerClient;
use crate::states::{DistributionRecord, LedgerStore, RunLease, RunRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Harvesting,
    Enumerating,
    Filtering,
    Swapping,
    Allocating,
    Disbursing,
    Recording,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Normal early exits; nothing is paid and the ledger is not written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    PoolBelowMinimum { pool: u64, minimum: u64 },
    NoEligibleHolders,
    /// Every proportional share rounded down to zero
    NothingAllocated { pool: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolBelowMinimum { pool, minimum } => {
                write!(f, "pool ({pool}) below minimum ({minimum})")
            }
            Self::NoEligibleHolders => f.write_str("no eligible holders"),
            Self::NothingAllocated { pool } => {
                write!(f, "pool ({pool}) too small for any holder share")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mint: Pubkey,
    pub reward_mint: Pubkey,
    /// Observed treasury delta from the harvest
    pub harvested: u64,
    /// Amount the allocation was computed from (reward units)
    pub pool: u64,
    pub swap: Option<SwapResult>,
    pub holders_found: usize,
    pub eligible_holders: usize,
    /// Recipients left out by the per-run cap
    pub capped_recipients: usize,
    pub allocated: u64,
    pub succeeded: usize,
    pub failed: usize,
    pub total_distributed: u64,
    pub lifetime_distributed: u128,
}

impl RunSummary {
    /// Pool left in the treasury after this run
    pub fn remaining_pool(&self) -> u64 {
        self.pool.saturating_sub(self.total_distributed)
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed(RunSummary),
}

/// Largest payouts first, ties by owner, at most `cap` entries. Returns
/// how many were cut.
fn rank_and_cap(allocations: &mut Vec<Allocation<Pubkey>>, cap: usize) -> usize {
    allocations.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.recipient.cmp(&b.recipient))
    });
    let capped = allocations.len().saturating_sub(cap);
    allocations.truncate(cap);
    capped
}

fn run_record(report: &DisbursementReport) -> RunRecord {
    RunRecord {
        timestamp: Utc::now(),
        success_count: report.succeeded,
        fail_count: report.failed,
        total_distributed: report.total_paid,
        records: report
            .records
            .iter()
            .map(|payout| DistributionRecord {
                owner: payout.owner.to_string(),
                amount: payout.amount,
                batch_ref: payout.batch_ref.to_string(),
            })
            .collect(),
    }
}

pub struct Orchestrator<'a, C: ?Sized, S: ?Sized, R: ?Sized> {
    config: &'a DistributionConfig,
    client: &'a C,
    store: &'a S,
    router: &'a R,
    phase: RunPhase,
}

impl<'a, C, S, R> Orchestrator<'a, C, S, R>
where
    C: LedgerClient + ?Sized,
    S: LedgerStore + ?Sized,
    R: SwapRouter + ?Sized,
{
    pub fn new(config: &'a DistributionConfig, client: &'a C, store: &'a S, router: &'a R) -> Self {
        Self {
            config,
            client,
            store,
            router,
            phase: RunPhase::Idle,
        }
    }

    /// Phase reached by the last run; where it stopped if it failed
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        self.phase = phase;
        info!(phase = %phase, "=== {phase} ===");
    }

    pub async fn run(&mut self) -> Result<RunOutcome> {
        let config = self.config;
        let mint = config.mint;
        self.phase = RunPhase::Idle;

        let _lease = RunLease::acquire(self.store, &mint)?;
        let mut state = self.store.load(&mint)?;

        let treasury = self.client.payer();
        info!(%treasury, fee_mint = %mint, "=== Starting Hourly Reflection Distribution ===");
        if config.needs_swap() {
            info!(reward_mint = %config.reward_mint, "Reward token differs from fee token (swap required)");
        } else {
            info!("Distributing same token as fees (no swap needed)");
        }

        self.enter(RunPhase::Harvesting);
        let harvested = harvest(
            self.client,
            &mint,
            &treasury,
            config.harvest_accounts.as_deref(),
        )
        .await?;
        let fee_asset = harvested.mint.asset();
        info!(
            supply = harvested.mint.supply,
            decimals = fee_asset.decimals,
            program = %fee_asset.token_program,
            collected = harvested.delta,
            "Fees harvested"
        );
        if harvested.delta < config.min_total_pool {
            return Ok(self.skip(SkipReason::PoolBelowMinimum {
                pool: harvested.delta,
                minimum: config.min_total_pool,
            }));
        }

        self.enter(RunPhase::Enumerating);
        let holders = enumerate_holders(self.client, &mint, &fee_asset.token_program).await?;

        self.enter(RunPhase::Filtering);
        let eligible = filter_eligible(&holders, config.min_holding, &config.excluded_wallets, &treasury);
        let participants = group_by_owner(&eligible)?;
        info!(
            eligible = eligible.len(),
            holders = holders.len(),
            wallets = participants.len(),
            "Eligible holders"
        );
        if participants.is_empty() {
            return Ok(self.skip(SkipReason::NoEligibleHolders));
        }

        let (reward, pool, swap) = if config.needs_swap() {
            self.enter(RunPhase::Swapping);
            let reward = balance::read_mint(self.client, &config.reward_mint).await?.asset();
            let plan = SwapPlan {
                from: fee_asset,
                to: reward,
                amount: harvested.delta,
                slippage_bps: config.slippage_bps,
            };
            let result = swap_or_fallback(self.client, self.router, &plan).await?;
            let pool = resolve_reward_pool(&result, config.min_total_pool)?;
            if pool < config.min_total_pool {
                return Ok(self.skip(SkipReason::PoolBelowMinimum {
                    pool,
                    minimum: config.min_total_pool,
                }));
            }
            (reward, pool, Some(result))
        } else {
            (fee_asset, harvested.delta, None)
        };

        self.enter(RunPhase::Allocating);
        let weighted: Vec<(Pubkey, u64)> = participants.iter().map(|p| (p.owner, p.weight)).collect();
        // holder reflections never redistribute rounding dust
        let mut allocations = allocate(&weighted, pool, RemainderPolicy::Retain)?;
        let capped_recipients = rank_and_cap(&mut allocations, config.max_distributions_per_run);
        if capped_recipients > 0 {
            warn!(
                capped = capped_recipients,
                cap = config.max_distributions_per_run,
                "Distribution cap reached; smallest shares stay in treasury"
            );
        }
        if allocations.is_empty() {
            return Ok(self.skip(SkipReason::NothingAllocated { pool }));
        }
        let allocated = total_allocated(&allocations);
        info!(
            pool,
            recipients = allocations.len(),
            allocated,
            "Reflections calculated"
        );

        self.enter(RunPhase::Disbursing);
        let plan = DisbursementPlan {
            reward,
            source_account: reward.account_of(&treasury),
            authority: treasury,
            batch_size: config.batch_size,
            failed_batch_retries: config.failed_batch_retries,
        };
        let report = disburse(self.client, &plan, &allocations).await;

        self.enter(RunPhase::Recording);
        state.record_run(run_record(&report))?;
        self.store.save(&mint, &state)?;

        let summary = RunSummary {
            mint,
            reward_mint: reward.mint,
            harvested: harvested.delta,
            pool,
            swap,
            holders_found: holders.len(),
            eligible_holders: eligible.len(),
            capped_recipients,
            allocated,
            succeeded: report.succeeded,
            failed: report.failed,
            total_distributed: report.total_paid,
            lifetime_distributed: state.total_distributed,
        };
        self.log_summary(&summary, &reward);

        self.phase = RunPhase::Idle;
        Ok(RunOutcome::Completed(summary))
    }

    fn skip(&mut self, reason: SkipReason) -> RunOutcome {
        warn!(%reason, "Skipping distribution");
        self.phase = RunPhase::Idle;
        RunOutcome::Skipped(reason)
    }

    fn log_summary(&self, summary: &RunSummary, reward: &TokenAsset) {
        info!("=== Distribution Summary ===");
        info!(target: SUCCESS_TARGET, holders = summary.succeeded, "Successful payouts");
        if summary.failed > 0 {
            warn!(holders = summary.failed, "Failed payouts");
        }
        info!(
            amount = summary.total_distributed,
            tokens = %format_amount(summary.total_distributed, reward.decimals),
            "Total distributed"
        );
        info!(amount = summary.remaining_pool(), "Remaining pool");
        info!(amount = %summary.lifetime_distributed, "Lifetime distributed");

        events::emit(&DistributionRunCompleted {
            mint: summary.mint.to_string(),
            reward_mint: summary.reward_mint.to_string(),
            pool: summary.pool,
            total_distributed: summary.total_distributed,
            lifetime_distributed: summary.lifetime_distributed.to_string(),
            success_count: summary.succeeded,
            fail_count: summary.failed,
            timestamp: events::now(),
        });
    }
}
