use std::collections::{HashMap, HashSet};

use anchor_client::solana_sdk::pubkey::Pubkey;

use crate::engine::holders::HolderAccount;
use crate::errors::{CrankError, Result};

/// Wallet that receives a reflection, weighted by its eligible balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibleParticipant {
    pub owner: Pubkey,
    pub weight: u64,
}

/// The system program address doubles as the burn address
pub fn burn_address() -> Pubkey {
    anchor_lang::system_program::ID
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Deny-list plus treasury and burn address, lowercased
pub fn exclusion_set(excluded_wallets: &[String], treasury_wallet: &Pubkey) -> HashSet<String> {
    excluded_wallets
        .iter()
        .map(|wallet| normalize(wallet))
        .filter(|wallet| !wallet.is_empty())
        .chain([
            normalize(&treasury_wallet.to_string()),
            normalize(&burn_address().to_string()),
        ])
        .collect()
}

/// Holders whose owner is not excluded and whose balance is at least
/// `min_holding`. Input order is preserved.
pub fn filter_eligible(
    holders: &[HolderAccount],
    min_holding: u64,
    excluded_wallets: &[String],
    treasury_wallet: &Pubkey,
) -> Vec<HolderAccount> {
    let excluded = exclusion_set(excluded_wallets, treasury_wallet);
    holders
        .iter()
        .filter(|holder| !excluded.contains(&normalize(&holder.owner.to_string())))
        .filter(|holder| holder.balance >= min_holding)
        .copied()
        .collect()
}

/// Merges accounts sharing an owner, keeping first-seen order
pub fn group_by_owner(holders: &[HolderAccount]) -> Result<Vec<EligibleParticipant>> {
    let mut index: HashMap<Pubkey, usize> = HashMap::new();
    let mut participants: Vec<EligibleParticipant> = Vec::new();

    for holder in holders {
        match index.get(&holder.owner) {
            Some(&position) => {
                let participant = &mut participants[position];
                participant.weight = participant
                    .weight
                    .checked_add(holder.balance)
                    .ok_or(CrankError::MathOverflow)?;
            }
            None => {
                index.insert(holder.owner, participants.len());
                participants.push(EligibleParticipant {
                    owner: holder.owner,
                    weight: holder.balance,
                });
            }
        }
    }

    Ok(participants)
}
