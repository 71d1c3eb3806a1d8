use anchor_client::solana_sdk::account::Account;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::Signature;
use anchor_spl::token_2022::spl_token_2022;
use spl_token_2022::extension::transfer_fee::TransferFeeAmount;
use spl_token_2022::extension::{BaseStateWithExtensions, StateWithExtensions};
use spl_token_2022::state::Account as TokenAccount;
use tracing::{info, warn};

use crate::constants::{ACCOUNT_FETCH_CHUNK_SIZE, HARVEST_SOURCES_PER_TX};
use crate::engine::balance::{self, MintInfo, TokenAsset};
use crate::errors::{CrankError, Result};
use crate::events::{self, FeesHarvested};
use crate::instructions;
use crate::rpc::{submit_and_confirm, LedgerClient};

#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub mint: MintInfo,
    pub treasury_account: Pubkey,
    pub balance_before: u64,
    pub balance_after: u64,
    /// Observed treasury delta; the authoritative pool size
    pub delta: u64,
    pub accounts_harvested: usize,
    pub mint_pool_withdrawn: u64,
    pub signatures: Vec<Signature>,
}

/// Withheld fee sitting on a Token-2022 account
pub fn withheld_amount(address: &Pubkey, account: &Account, mint: &Pubkey) -> Result<u64> {
    let decode_error = |reason: String| CrankError::AccountDecode {
        address: *address,
        reason,
    };
    let state = StateWithExtensions::<TokenAccount>::unpack(&account.data)
        .map_err(|e| decode_error(e.to_string()))?;
    if state.base.mint != *mint {
        return Err(decode_error(format!("belongs to mint {}", state.base.mint)));
    }
    match state.get_extension::<TransferFeeAmount>() {
        Ok(extension) => Ok(u64::from(extension.withheld_amount)),
        Err(_) => Ok(0),
    }
}

/// Accounts of `mint` with a non-zero withheld fee
pub async fn discover_withheld_accounts<C: LedgerClient + ?Sized>(
    client: &C,
    mint: &Pubkey,
) -> Result<Vec<Pubkey>> {
    let mut addresses = client
        .scan_token_accounts(&spl_token_2022::ID, mint)
        .await?;
    addresses.sort();

    let mut candidates = Vec::new();
    for chunk in addresses.chunks(ACCOUNT_FETCH_CHUNK_SIZE) {
        let accounts = client.get_multiple_accounts(chunk).await?;
        for (address, account) in chunk.iter().zip(accounts) {
            let Some(account) = account else { continue };
            match withheld_amount(address, &account, mint) {
                Ok(0) => {}
                Ok(_) => candidates.push(*address),
                Err(err) => warn!(account = %address, error = %err, "Skipping undecodable account"),
            }
        }
    }

    Ok(candidates)
}

/// Makes sure `wallet` has an associated account for `asset` and returns
/// it with its current balance
pub async fn ensure_token_account<C: LedgerClient + ?Sized>(
    client: &C,
    wallet: &Pubkey,
    asset: &TokenAsset,
) -> Result<(Pubkey, u64)> {
    let address = asset.account_of(wallet);
    if let Some(balance) = balance::read_token_balance(client, &address).await? {
        return Ok((address, balance));
    }

    info!(account = %address, owner = %wallet, "Creating treasury token account");
    let create = instructions::create_account_idempotent(&client.payer(), wallet, asset);
    submit_and_confirm(client, &[create]).await?;
    Ok((address, 0))
}

/// Sweeps withheld transfer fees from holder accounts and from the mint
/// into the treasury's associated token account.
///
/// With `explicit_accounts` the discovery scan is skipped. The returned
/// `delta` is read back from the treasury rather than summed from the
/// withdrawals.
pub async fn harvest<C: LedgerClient + ?Sized>(
    client: &C,
    mint: &Pubkey,
    treasury_wallet: &Pubkey,
    explicit_accounts: Option<&[Pubkey]>,
) -> Result<HarvestReport> {
    let mint_info = balance::read_mint(client, mint).await?;
    if !mint_info.is_token_2022() || mint_info.transfer_fee().is_none() {
        return Err(CrankError::NotFeeBearing(*mint));
    }
    let asset = mint_info.asset();
    let authority = client.payer();

    let (treasury_account, balance_before) =
        ensure_token_account(client, treasury_wallet, &asset).await?;
    info!(treasury = %treasury_account, balance = balance_before, "Treasury balance before harvest");

    let sources = match explicit_accounts {
        Some(accounts) => accounts.to_vec(),
        None => {
            info!("Discovering token accounts with withheld fees");
            discover_withheld_accounts(client, mint).await?
        }
    };
    info!(accounts = sources.len(), "Accounts to harvest");

    let mut signatures = Vec::new();
    for chunk in sources.chunks(HARVEST_SOURCES_PER_TX) {
        let instruction =
            instructions::withdraw_from_accounts(mint, &treasury_account, &authority, chunk)?;
        let signature = submit_and_confirm(client, &[instruction]).await?;
        info!(%signature, accounts = chunk.len(), "Withheld fees withdrawn from accounts");
        signatures.push(signature);
    }

    let refreshed = balance::read_mint(client, mint).await?;
    let mint_pool = refreshed
        .transfer_fee()
        .map(|fee| fee.withheld_amount)
        .unwrap_or_default();
    if mint_pool > 0 {
        let instruction = instructions::withdraw_from_mint(mint, &treasury_account, &authority)?;
        let signature = submit_and_confirm(client, &[instruction]).await?;
        info!(%signature, amount = mint_pool, "Withheld fees withdrawn from mint pool");
        signatures.push(signature);
    }

    let balance_after = balance::read_token_balance(client, &treasury_account)
        .await?
        .unwrap_or_default();
    let delta = balance_after.saturating_sub(balance_before);

    events::emit(&FeesHarvested {
        mint: mint.to_string(),
        treasury_account: treasury_account.to_string(),
        accounts_harvested: sources.len(),
        mint_pool_withdrawn: mint_pool,
        balance_before,
        balance_after,
        harvested: delta,
        timestamp: events::now(),
    });

    Ok(HarvestReport {
        mint: mint_info,
        treasury_account,
        balance_before,
        balance_after,
        delta,
        accounts_harvested: sources.len(),
        mint_pool_withdrawn: mint_pool,
        signatures,
    })
}
