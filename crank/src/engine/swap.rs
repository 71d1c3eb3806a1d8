use anchor_client::solana_sdk::signature::Signature;
use swap_router::{QuoteRequest, SwapRouter};
use tracing::{error, info, warn};

use crate::engine::balance::{self, TokenAsset};
use crate::errors::{CrankError, Result};
use crate::events::{self, SwapSettled};
use crate::logging::SUCCESS_TARGET;
use crate::rpc::LedgerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapPlan {
    pub from: TokenAsset,
    pub to: TokenAsset,
    /// Input amount in base units of `from`
    pub amount: u64,
    pub slippage_bps: u16,
}

/// Outcome of the single swap attempt of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapResult {
    /// `output_amount` is the observed increase of the treasury's reward
    /// balance
    Completed {
        output_amount: u64,
        signature: Signature,
    },
    /// `fallback_amount` is what the treasury already held of the reward
    /// asset, `None` when it has no reward account at all
    Failed {
        reason: String,
        fallback_amount: Option<u64>,
    },
}

async fn execute<C, R>(client: &C, router: &R, plan: &SwapPlan) -> Result<Signature>
where
    C: LedgerClient + ?Sized,
    R: SwapRouter + ?Sized,
{
    info!("Fetching swap quote");
    let quote = router
        .quote(&QuoteRequest {
            input_mint: plan.from.mint,
            output_mint: plan.to.mint,
            amount: plan.amount,
            slippage_bps: plan.slippage_bps,
        })
        .await?;
    info!(
        expected_out = quote.out_amount,
        minimum_out = quote.other_amount_threshold,
        price_impact_pct = %quote.price_impact_pct,
        "Quote received"
    );

    let transaction = router
        .build_swap_transaction(&quote, &client.payer())
        .await?;
    info!("Sending swap transaction");
    client.submit_serialized(&transaction.serialized).await
}

/// Converts `plan.amount` of the fee asset into the reward asset.
///
/// Router and submission failures come back as [`SwapResult::Failed`];
/// only failing to read the treasury's reward balance is an error.
pub async fn swap_or_fallback<C, R>(client: &C, router: &R, plan: &SwapPlan) -> Result<SwapResult>
where
    C: LedgerClient + ?Sized,
    R: SwapRouter + ?Sized,
{
    let reward_account = plan.to.account_of(&client.payer());
    let balance_before = balance::read_token_balance(client, &reward_account).await?;

    info!(
        amount = plan.amount,
        from = %plan.from.mint,
        to = %plan.to.mint,
        slippage_bps = plan.slippage_bps,
        "Initiating swap"
    );

    let result = match execute(client, router, plan).await {
        Ok(signature) => {
            let balance_after = balance::read_token_balance(client, &reward_account)
                .await?
                .unwrap_or_default();
            let output_amount = balance_after.saturating_sub(balance_before.unwrap_or_default());
            info!(target: SUCCESS_TARGET, %signature, output_amount, "Swap confirmed");
            SwapResult::Completed {
                output_amount,
                signature,
            }
        }
        Err(err) => {
            error!(error = %err, "Swap failed");
            SwapResult::Failed {
                reason: err.to_string(),
                fallback_amount: balance_before,
            }
        }
    };

    events::emit(&SwapSettled::new(plan, &result));
    Ok(result)
}

/// Reward pool to distribute after the swap step.
///
/// A completed swap yields its output (the caller still applies the
/// minimum-pool check). A failed swap falls back to the existing treasury
/// balance only if it reaches `min_total_pool`.
pub fn resolve_reward_pool(result: &SwapResult, min_total_pool: u64) -> Result<u64> {
    match result {
        SwapResult::Completed { output_amount, .. } => Ok(*output_amount),
        SwapResult::Failed {
            reason,
            fallback_amount,
        } => match fallback_amount {
            Some(available) if *available >= min_total_pool => {
                info!(available, "Using existing treasury reward balance");
                Ok(*available)
            }
            _ => {
                warn!(available = ?fallback_amount, minimum = min_total_pool, "No usable reward balance in treasury");
                Err(CrankError::SwapFallbackUnavailable {
                    reason: reason.clone(),
                    available: *fallback_amount,
                    minimum: min_total_pool,
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockLedger, MockRouter};
    use anchor_client::solana_sdk::pubkey::Pubkey;
    use anchor_spl::token_2022::spl_token_2022;

    fn plan() -> SwapPlan {
        SwapPlan {
            from: TokenAsset {
                mint: Pubkey::new_unique(),
                token_program: spl_token_2022::ID,
                decimals: 6,
            },
            to: TokenAsset {
                mint: Pubkey::new_unique(),
                token_program: anchor_spl::token::ID,
                decimals: 9,
            },
            amount: 40_000,
            slippage_bps: 100,
        }
    }

    #[tokio::test]
    async fn completed_swap_reports_observed_output() {
        let ledger = MockLedger::new();
        let plan = plan();
        let reward_account = plan.to.account_of(&ledger.payer());
        ledger.set_account(reward_account, mock::token_account(&plan.to.mint, &ledger.payer(), 200));
        ledger.after_serialized(
            reward_account,
            mock::token_account(&plan.to.mint, &ledger.payer(), 3_200),
        );
        let router = MockRouter::quoting(3_100);

        let result = swap_or_fallback(&ledger, &router, &plan).await.unwrap();
        match result {
            SwapResult::Completed { output_amount, .. } => assert_eq!(output_amount, 3_000),
            other => panic!("unexpected {other:?}"),
        }

        let requests = router.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, 40_000);
        assert_eq!(requests[0].slippage_bps, 100);
        assert_eq!(ledger.serialized(), vec![vec![7u8; 16]]);
    }

    #[tokio::test]
    async fn router_failure_reports_existing_balance() {
        let ledger = MockLedger::new();
        let plan = plan();
        let reward_account = plan.to.account_of(&ledger.payer());
        ledger.set_account(reward_account, mock::token_account(&plan.to.mint, &ledger.payer(), 5_000));

        let result = swap_or_fallback(&ledger, &MockRouter::failing(), &plan)
            .await
            .unwrap();
        assert!(matches!(
            result,
            SwapResult::Failed { fallback_amount: Some(5_000), .. }
        ));
        assert!(ledger.serialized().is_empty());
        assert_eq!(resolve_reward_pool(&result, 1_000).unwrap(), 5_000);
    }

    #[tokio::test]
    async fn missing_reward_account_has_no_fallback() {
        let ledger = MockLedger::new();
        let result = swap_or_fallback(&ledger, &MockRouter::failing(), &plan())
            .await
            .unwrap();
        assert!(matches!(result, SwapResult::Failed { fallback_amount: None, .. }));
        assert!(matches!(
            resolve_reward_pool(&result, 1_000),
            Err(CrankError::SwapFallbackUnavailable { available: None, minimum: 1_000, .. })
        ));
    }

    #[test]
    fn fallback_below_minimum_aborts() {
        let failed = SwapResult::Failed {
            reason: "no route".to_string(),
            fallback_amount: Some(999),
        };
        assert!(matches!(
            resolve_reward_pool(&failed, 1_000),
            Err(CrankError::SwapFallbackUnavailable { available: Some(999), .. })
        ));
    }

    #[test]
    fn fallback_exactly_at_minimum_is_used() {
        let failed = SwapResult::Failed {
            reason: "no route".to_string(),
            fallback_amount: Some(1_000),
        };
        assert_eq!(resolve_reward_pool(&failed, 1_000).unwrap(), 1_000);
    }

    #[test]
    fn completed_swap_passes_output_through() {
        let completed = SwapResult::Completed {
            output_amount: 12,
            signature: Signature::default(),
        };
        assert_eq!(resolve_reward_pool(&completed, 1_000).unwrap(), 12);
    }
}
