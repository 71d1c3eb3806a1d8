use anchor_client::solana_sdk::instruction::Instruction;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_spl::associated_token::spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use anchor_spl::token_2022::spl_token_2022;

use crate::engine::balance::TokenAsset;
use crate::errors::{CrankError, Result};

/// Creates `wallet`'s associated account for `asset` unless it exists
pub fn create_account_idempotent(payer: &Pubkey, wallet: &Pubkey, asset: &TokenAsset) -> Instruction {
    create_associated_token_account_idempotent(payer, wallet, &asset.mint, &asset.token_program)
}

/// Idempotent account creation (funded by `payer`) followed by a checked
/// transfer of `amount` from `source`, owned by `authority`, to the
/// recipient's associated account
pub fn payout_instructions(
    payer: &Pubkey,
    authority: &Pubkey,
    source: &Pubkey,
    asset: &TokenAsset,
    recipient: &Pubkey,
    amount: u64,
) -> Result<[Instruction; 2]> {
    let destination = asset.account_of(recipient);
    let transfer = spl_token_2022::instruction::transfer_checked(
        &asset.token_program,
        source,
        &asset.mint,
        &destination,
        authority,
        &[],
        amount,
        asset.decimals,
    )
    .map_err(|e| CrankError::InstructionBuild(e.to_string()))?;

    Ok([create_account_idempotent(payer, recipient, asset), transfer])
}
