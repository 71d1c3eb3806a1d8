use anchor_client::solana_sdk::instruction::Instruction;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_spl::token_2022::spl_token_2022;
use spl_token_2022::extension::transfer_fee::instruction::{
    withdraw_withheld_tokens_from_accounts, withdraw_withheld_tokens_from_mint,
};

use crate::errors::{CrankError, Result};

/// Moves withheld fees from `sources` into `destination`. `authority` must
/// be the mint's withdraw-withheld authority.
pub fn withdraw_from_accounts(
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    sources: &[Pubkey],
) -> Result<Instruction> {
    let sources: Vec<&Pubkey> = sources.iter().collect();
    withdraw_withheld_tokens_from_accounts(
        &spl_token_2022::ID,
        mint,
        destination,
        authority,
        &[],
        &sources,
    )
    .map_err(|e| CrankError::InstructionBuild(e.to_string()))
}

/// Moves the mint-level withheld pool into `destination`
pub fn withdraw_from_mint(
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
) -> Result<Instruction> {
    withdraw_withheld_tokens_from_mint(&spl_token_2022::ID, mint, destination, authority, &[])
        .map_err(|e| CrankError::InstructionBuild(e.to_string()))
}
