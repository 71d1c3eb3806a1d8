use anchor_client::solana_sdk::account::Account;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_spl::associated_token::get_associated_token_address_with_program_id;
use anchor_spl::token_2022::spl_token_2022;
use spl_token_2022::extension::interest_bearing_mint::InterestBearingConfig;
use spl_token_2022::extension::mint_close_authority::MintCloseAuthority;
use spl_token_2022::extension::permanent_delegate::PermanentDelegate;
use spl_token_2022::extension::transfer_fee::TransferFeeConfig;
use spl_token_2022::extension::transfer_hook::TransferHook;
use spl_token_2022::extension::{BaseStateWithExtensions, ExtensionType, StateWithExtensions};
use spl_token_2022::state::{Account as TokenAccount, Mint};

use crate::errors::{CrankError, Result};
use crate::rpc::LedgerClient;

/// Transfer fee parameters of a fee-bearing mint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFeeSettings {
    pub basis_points: u16,
    pub maximum_fee: u64,
    /// Fees already swept into the mint-level pool
    pub withheld_amount: u64,
}

/// Token-2022 mint extensions the crank understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintExtension {
    TransferFee(TransferFeeSettings),
    InterestBearing { rate_bps: i16 },
    PermanentDelegate { delegate: Option<Pubkey> },
    NonTransferable,
    MintCloseAuthority { authority: Option<Pubkey> },
    TransferHook { program_id: Option<Pubkey> },
    Unrecognized(u16),
}

/// Token mint as seen by the crank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAsset {
    pub mint: Pubkey,
    pub token_program: Pubkey,
    pub decimals: u8,
}

impl TokenAsset {
    /// Associated token account of `wallet` for this asset
    pub fn account_of(&self, wallet: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(wallet, &self.mint, &self.token_program)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintInfo {
    pub address: Pubkey,
    pub token_program: Pubkey,
    pub decimals: u8,
    pub supply: u64,
    pub extensions: Vec<MintExtension>,
}

impl MintInfo {
    pub fn asset(&self) -> TokenAsset {
        TokenAsset {
            mint: self.address,
            token_program: self.token_program,
            decimals: self.decimals,
        }
    }

    pub fn transfer_fee(&self) -> Option<&TransferFeeSettings> {
        self.extensions.iter().find_map(|extension| match extension {
            MintExtension::TransferFee(settings) => Some(settings),
            _ => None,
        })
    }

    pub fn is_token_2022(&self) -> bool {
        self.token_program == spl_token_2022::ID
    }
}

fn decode_error(address: &Pubkey, reason: impl ToString) -> CrankError {
    CrankError::AccountDecode {
        address: *address,
        reason: reason.to_string(),
    }
}

/// Only the two SPL token programs own accounts we can read
pub fn is_token_program(program: &Pubkey) -> bool {
    *program == spl_token_2022::ID || *program == anchor_spl::token::ID
}

pub fn decode_mint(address: &Pubkey, account: &Account) -> Result<MintInfo> {
    if !is_token_program(&account.owner) {
        return Err(decode_error(
            address,
            format!("owned by {}, not a token program", account.owner),
        ));
    }

    let state = StateWithExtensions::<Mint>::unpack(&account.data)
        .map_err(|e| decode_error(address, e))?;
    let extension_types = state
        .get_extension_types()
        .map_err(|e| decode_error(address, e))?;

    let mut extensions = Vec::with_capacity(extension_types.len());
    for extension_type in extension_types {
        let extension = match extension_type {
            ExtensionType::TransferFeeConfig => {
                let config = state
                    .get_extension::<TransferFeeConfig>()
                    .map_err(|e| decode_error(address, e))?;
                MintExtension::TransferFee(TransferFeeSettings {
                    basis_points: u16::from(config.newer_transfer_fee.transfer_fee_basis_points),
                    maximum_fee: u64::from(config.newer_transfer_fee.maximum_fee),
                    withheld_amount: u64::from(config.withheld_amount),
                })
            }
            ExtensionType::InterestBearingConfig => {
                let config = state
                    .get_extension::<InterestBearingConfig>()
                    .map_err(|e| decode_error(address, e))?;
                MintExtension::InterestBearing {
                    rate_bps: i16::from(config.current_rate),
                }
            }
            ExtensionType::PermanentDelegate => {
                let config = state
                    .get_extension::<PermanentDelegate>()
                    .map_err(|e| decode_error(address, e))?;
                MintExtension::PermanentDelegate {
                    delegate: Option::<Pubkey>::from(config.delegate),
                }
            }
            ExtensionType::NonTransferable => MintExtension::NonTransferable,
            ExtensionType::MintCloseAuthority => {
                let config = state
                    .get_extension::<MintCloseAuthority>()
                    .map_err(|e| decode_error(address, e))?;
                MintExtension::MintCloseAuthority {
                    authority: Option::<Pubkey>::from(config.close_authority),
                }
            }
            ExtensionType::TransferHook => {
                let config = state
                    .get_extension::<TransferHook>()
                    .map_err(|e| decode_error(address, e))?;
                MintExtension::TransferHook {
                    program_id: Option::<Pubkey>::from(config.program_id),
                }
            }
            other => MintExtension::Unrecognized(other as u16),
        };
        extensions.push(extension);
    }

    Ok(MintInfo {
        address: *address,
        token_program: account.owner,
        decimals: state.base.decimals,
        supply: state.base.supply,
        extensions,
    })
}

pub async fn read_mint<C: LedgerClient + ?Sized>(client: &C, mint: &Pubkey) -> Result<MintInfo> {
    let account = client
        .get_account(mint)
        .await?
        .ok_or(CrankError::MintNotFound(*mint))?;
    decode_mint(mint, &account)
}

/// Balance held by a token account (either token program)
pub fn decode_token_amount(address: &Pubkey, account: &Account) -> Result<u64> {
    if !is_token_program(&account.owner) {
        return Err(decode_error(address, "not a token account"));
    }
    let state = StateWithExtensions::<TokenAccount>::unpack(&account.data)
        .map_err(|e| decode_error(address, e))?;
    Ok(state.base.amount)
}

/// `None` when the account does not exist yet
pub async fn read_token_balance<C: LedgerClient + ?Sized>(
    client: &C,
    token_account: &Pubkey,
) -> Result<Option<u64>> {
    match client.get_account(token_account).await? {
        Some(account) => decode_token_amount(token_account, &account).map(Some),
        None => Ok(None),
    }
}

/// `amount` in whole tokens, e.g. `1500000` with 6 decimals is `1.500000`
pub fn format_amount(amount: u64, decimals: u8) -> String {
    match 10u128.checked_pow(u32::from(decimals)) {
        Some(scale) if decimals > 0 => {
            let amount = u128::from(amount);
            format!(
                "{}.{:0width$}",
                amount / scale,
                amount % scale,
                width = usize::from(decimals)
            )
        }
        _ => amount.to_string(),
    }
}
