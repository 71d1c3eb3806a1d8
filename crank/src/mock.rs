//! In-memory ledger and router doubles for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anchor_client::solana_client::client_error::{ClientError, ClientErrorKind};
use anchor_client::solana_sdk::account::Account;
use anchor_client::solana_sdk::instruction::Instruction;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::Signature;
use anchor_spl::token_2022::spl_token_2022;
use async_trait::async_trait;
use spl_token_2022::extension::transfer_fee::{TransferFeeAmount, TransferFeeConfig};
use spl_token_2022::extension::{BaseStateWithExtensionsMut, ExtensionType, StateWithExtensionsMut};
use spl_token_2022::solana_program::program_option::COption;
use spl_token_2022::solana_program::program_pack::Pack;
use spl_token_2022::state::{Account as TokenAccount, AccountState, Mint};
use swap_router::{Quote, QuoteRequest, RouterError, RouterResult, SwapRouter, SwapTransaction};

use crate::errors::{CrankError, Result};
use crate::rpc::LedgerClient;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

fn signature_for(index: usize) -> Signature {
    let mut bytes = [0u8; 64];
    bytes[..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
    Signature::from(bytes)
}

fn index_of(signature: &Signature) -> usize {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&signature.as_ref()[..8]);
    u64::from_le_bytes(raw) as usize - 1
}

#[derive(Default)]
pub struct MockLedger {
    payer: Pubkey,
    accounts: Mutex<HashMap<Pubkey, Account>>,
    scan_fails: Mutex<bool>,
    submissions: Mutex<Vec<Vec<Instruction>>>,
    failing: Mutex<HashSet<usize>>,
    landed_late: Mutex<HashSet<usize>>,
    status_lost: Mutex<HashSet<usize>>,
    settled: Mutex<Vec<usize>>,
    scheduled: Mutex<Vec<(usize, Pubkey, Account)>>,
    fetch_sizes: Mutex<Vec<usize>>,
    serialized: Mutex<Vec<Vec<u8>>>,
    serialized_updates: Mutex<Vec<(Pubkey, Account)>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::with_payer(Pubkey::new_unique())
    }

    pub fn with_payer(payer: Pubkey) -> Self {
        Self {
            payer,
            ..Self::default()
        }
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        lock(&self.accounts).insert(address, account);
    }

    pub fn fail_scan(&self) {
        *lock(&self.scan_fails) = true;
    }

    /// Submission `index` (0-based) fails to confirm
    pub fn fail_submission(&self, index: usize) {
        lock(&self.failing).insert(index);
    }

    /// Submission `index` misses its confirmation window but lands anyway
    pub fn land_late(&self, index: usize) {
        lock(&self.landed_late).insert(index);
    }

    /// Submission `index` fails to confirm and its final status is unknown
    pub fn lose_status(&self, index: usize) {
        lock(&self.status_lost).insert(index);
    }

    /// Submissions that went through `settle_unconfirmed`
    pub fn settled(&self) -> Vec<usize> {
        lock(&self.settled).clone()
    }

    fn apply_scheduled(&self, index: usize) {
        let mut scheduled = lock(&self.scheduled);
        let mut accounts = lock(&self.accounts);
        scheduled.retain(|(at, address, account)| {
            if *at == index {
                accounts.insert(*address, account.clone());
                false
            } else {
                true
            }
        });
    }

    /// Applies `account` at `address` once submission `index` confirms
    pub fn after_submission(&self, index: usize, address: Pubkey, account: Account) {
        lock(&self.scheduled).push((index, address, account));
    }

    /// Applies `account` at `address` when a serialized transaction lands
    pub fn after_serialized(&self, address: Pubkey, account: Account) {
        lock(&self.serialized_updates).push((address, account));
    }

    pub fn submissions(&self) -> Vec<Vec<Instruction>> {
        lock(&self.submissions).clone()
    }

    pub fn fetch_sizes(&self) -> Vec<usize> {
        lock(&self.fetch_sizes).clone()
    }

    pub fn serialized(&self) -> Vec<Vec<u8>> {
        lock(&self.serialized).clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn payer(&self) -> Pubkey {
        self.payer
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(lock(&self.accounts).get(address).cloned())
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        lock(&self.fetch_sizes).push(addresses.len());
        let accounts = lock(&self.accounts);
        Ok(addresses.iter().map(|a| accounts.get(a).cloned()).collect())
    }

    async fn scan_token_accounts(&self, program_id: &Pubkey, mint: &Pubkey) -> Result<Vec<Pubkey>> {
        if *lock(&self.scan_fails) {
            return Err(CrankError::Rpc(ClientError::from(ClientErrorKind::Custom(
                "getProgramAccounts unavailable".to_string(),
            ))));
        }
        let accounts = lock(&self.accounts);
        Ok(accounts
            .iter()
            .filter(|(_, account)| account.owner == *program_id)
            .filter(|(_, account)| account.data.len() >= 32 && account.data[..32] == mint.to_bytes())
            .map(|(address, _)| *address)
            .collect())
    }

    async fn submit_batch(&self, instructions: &[Instruction]) -> Result<Signature> {
        let mut submissions = lock(&self.submissions);
        let index = submissions.len();
        submissions.push(instructions.to_vec());
        Ok(signature_for(index))
    }

    async fn confirm_batch(&self, signature: &Signature) -> Result<()> {
        let index = index_of(signature);
        let unconfirmed = lock(&self.failing).contains(&index)
            || lock(&self.landed_late).contains(&index)
            || lock(&self.status_lost).contains(&index);
        if unconfirmed {
            return Err(CrankError::BatchNotConfirmed {
                signature: signature.to_string(),
                reason: "confirmation timed out".to_string(),
            });
        }
        self.apply_scheduled(index);
        Ok(())
    }

    async fn settle_unconfirmed(&self, signature: &Signature) -> Result<bool> {
        let index = index_of(signature);
        lock(&self.settled).push(index);
        if lock(&self.status_lost).contains(&index) {
            return Err(CrankError::BatchNotConfirmed {
                signature: signature.to_string(),
                reason: "signature status unavailable".to_string(),
            });
        }
        if lock(&self.landed_late).contains(&index) {
            self.apply_scheduled(index);
            return Ok(true);
        }
        Ok(false)
    }

    async fn submit_serialized(&self, wire: &[u8]) -> Result<Signature> {
        lock(&self.serialized).push(wire.to_vec());
        let mut accounts = lock(&self.accounts);
        for (address, account) in lock(&self.serialized_updates).drain(..) {
            accounts.insert(address, account);
        }
        Ok(signature_for(1_000))
    }
}

/// Router double that either quotes `out_amount` or fails every call
pub struct MockRouter {
    pub out_amount: Option<u64>,
    pub requests: Mutex<Vec<QuoteRequest>>,
}

impl MockRouter {
    pub fn quoting(out_amount: u64) -> Self {
        Self {
            out_amount: Some(out_amount),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            out_amount: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<QuoteRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl SwapRouter for MockRouter {
    async fn quote(&self, request: &QuoteRequest) -> RouterResult<Quote> {
        lock(&self.requests).push(request.clone());
        let out_amount = self.out_amount.ok_or(RouterError::NoRoute {
            input: request.input_mint,
            output: request.output_mint,
        })?;
        Ok(Quote {
            input_mint: request.input_mint,
            output_mint: request.output_mint,
            in_amount: request.amount,
            out_amount,
            other_amount_threshold: out_amount,
            price_impact_pct: "0".to_string(),
            slippage_bps: request.slippage_bps,
            raw: serde_json::Value::Null,
        })
    }

    async fn build_swap_transaction(
        &self,
        _quote: &Quote,
        _signer: &Pubkey,
    ) -> RouterResult<SwapTransaction> {
        Ok(SwapTransaction {
            serialized: vec![7; 16],
            last_valid_block_height: 1,
        })
    }
}

fn owned_by(program: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: 2_039_280,
        data,
        owner: program,
        executable: false,
        rent_epoch: 0,
    }
}

pub fn plain_mint(program: Pubkey, decimals: u8, supply: u64) -> Account {
    let mut data = vec![0u8; Mint::LEN];
    let mint = Mint {
        mint_authority: COption::None,
        supply,
        decimals,
        is_initialized: true,
        freeze_authority: COption::None,
    };
    Mint::pack(mint, &mut data).unwrap();
    owned_by(program, data)
}

pub fn fee_mint(decimals: u8, supply: u64, basis_points: u16, withheld: u64, maximum_fee: u64) -> Account {
    let space =
        ExtensionType::try_calculate_account_len::<Mint>(&[ExtensionType::TransferFeeConfig])
            .unwrap();
    let mut data = vec![0u8; space];
    let mut state = StateWithExtensionsMut::<Mint>::unpack_uninitialized(&mut data).unwrap();
    let config = state.init_extension::<TransferFeeConfig>(true).unwrap();
    config.withheld_amount = withheld.into();
    config.newer_transfer_fee.transfer_fee_basis_points = basis_points.into();
    config.newer_transfer_fee.maximum_fee = maximum_fee.into();
    config.older_transfer_fee = config.newer_transfer_fee;
    state.base = Mint {
        mint_authority: COption::None,
        supply,
        decimals,
        is_initialized: true,
        freeze_authority: COption::None,
    };
    state.pack_base();
    state.init_account_type().unwrap();
    owned_by(spl_token_2022::ID, data)
}

fn base_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> TokenAccount {
    TokenAccount {
        mint: *mint,
        owner: *owner,
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    }
}

/// Token-2022 account without extensions
pub fn token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Account {
    let mut data = vec![0u8; TokenAccount::LEN];
    TokenAccount::pack(base_account(mint, owner, amount), &mut data).unwrap();
    owned_by(spl_token_2022::ID, data)
}

/// Token-2022 account carrying a withheld transfer fee
pub fn fee_account(mint: &Pubkey, owner: &Pubkey, amount: u64, withheld: u64) -> Account {
    let space = ExtensionType::try_calculate_account_len::<TokenAccount>(&[
        ExtensionType::TransferFeeAmount,
    ])
    .unwrap();
    let mut data = vec![0u8; space];
    let mut state =
        StateWithExtensionsMut::<TokenAccount>::unpack_uninitialized(&mut data).unwrap();
    let extension = state.init_extension::<TransferFeeAmount>(true).unwrap();
    extension.withheld_amount = withheld.into();
    state.base = base_account(mint, owner, amount);
    state.pack_base();
    state.init_account_type().unwrap();
    owned_by(spl_token_2022::ID, data)
}
