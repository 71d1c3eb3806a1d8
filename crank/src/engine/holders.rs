use anchor_client::solana_sdk::account::Account;
use anchor_client::solana_sdk::pubkey::Pubkey;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info, warn};

use crate::constants::ACCOUNT_FETCH_CHUNK_SIZE;
use crate::errors::Result;
use crate::rpc::LedgerClient;

/// One token account holding the mint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolderAccount {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub balance: u64,
}

/// Leading bytes of the SPL token account layout, shared by both token
/// programs. Token-2022 extensions start after the 165-byte base.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TokenAccountHead {
    mint: [u8; 32],
    owner: [u8; 32],
    amount: [u8; 8],
    delegate_tag: [u8; 4],
    delegate: [u8; 32],
    state: u8,
}

const HEAD_LEN: usize = std::mem::size_of::<TokenAccountHead>();
const UNINITIALIZED: u8 = 0;

fn decode_holder(
    address: &Pubkey,
    account: &Account,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> std::result::Result<HolderAccount, String> {
    if account.owner != *token_program {
        return Err(format!("owned by {}", account.owner));
    }
    let head = account
        .data
        .get(..HEAD_LEN)
        .ok_or_else(|| format!("{} bytes is too short for a token account", account.data.len()))?;
    let head: &TokenAccountHead = bytemuck::try_from_bytes(head).map_err(|e| e.to_string())?;

    if head.state == UNINITIALIZED {
        return Err("account is not initialized".to_string());
    }
    if head.mint != mint.to_bytes() {
        return Err(format!("belongs to mint {}", Pubkey::new_from_array(head.mint)));
    }

    Ok(HolderAccount {
        address: *address,
        owner: Pubkey::new_from_array(head.owner),
        balance: u64::from_le_bytes(head.amount),
    })
}

/// Every account of `mint` with a positive balance, ordered by account
/// address. Accounts that fail to decode are skipped.
pub async fn enumerate_holders<C: LedgerClient + ?Sized>(
    client: &C,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Result<Vec<HolderAccount>> {
    info!(mint = %mint, "Fetching all token accounts");

    let mut addresses = client.scan_token_accounts(token_program, mint).await?;
    addresses.sort();
    addresses.dedup();
    info!(accounts = addresses.len(), "Found token accounts");

    let mut holders = Vec::new();
    for chunk in addresses.chunks(ACCOUNT_FETCH_CHUNK_SIZE) {
        let accounts = client.get_multiple_accounts(chunk).await?;
        for (address, account) in chunk.iter().zip(accounts) {
            let Some(account) = account else {
                debug!(account = %address, "account closed since scan");
                continue;
            };
            match decode_holder(address, &account, mint, token_program) {
                Ok(holder) if holder.balance > 0 => holders.push(holder),
                Ok(_) => {}
                Err(reason) => warn!(account = %address, %reason, "Error reading account"),
            }
        }
    }

    Ok(holders)
}
