//! Ledger capability set used by the engine.
//!
//! Everything the crank does on chain goes through [`LedgerClient`]:
//! account reads, the mint-filtered program-account scan, and submitting
//! one atomic batch of instructions signed by the treasury. The Solana RPC
//! implementation lives here; tests use an in-memory double.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anchor_client::solana_client::nonblocking::rpc_client::RpcClient;
use anchor_client::solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use anchor_client::solana_client::rpc_filter::{Memcmp, RpcFilterType};
use anchor_client::solana_sdk::account::Account;
use anchor_client::solana_sdk::commitment_config::CommitmentConfig;
use anchor_client::solana_sdk::hash::Hash;
use anchor_client::solana_sdk::instruction::Instruction;
use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::{Keypair, Signature, Signer};
use anchor_client::solana_sdk::transaction::{Transaction, VersionedTransaction};
use async_trait::async_trait;
use tracing::debug;

use crate::constants::EXPIRY_POLL_INTERVAL_MS;
use crate::errors::{CrankError, Result};

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fee payer and signing authority (the treasury wallet)
    fn payer(&self) -> Pubkey;

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;

    /// Addresses of every account owned by `program_id` whose mint field
    /// (offset 0) equals `mint`
    async fn scan_token_accounts(&self, program_id: &Pubkey, mint: &Pubkey) -> Result<Vec<Pubkey>>;

    /// Signs `instructions` as a single transaction and submits it
    async fn submit_batch(&self, instructions: &[Instruction]) -> Result<Signature>;

    async fn confirm_batch(&self, signature: &Signature) -> Result<()>;

    /// For a batch whose confirmation failed: waits until it can no longer
    /// land, then reports whether it executed. Errors when that cannot be
    /// determined, in which case the batch must not be resubmitted.
    async fn settle_unconfirmed(&self, signature: &Signature) -> Result<bool>;

    /// Re-signs an externally built wire transaction with the payer, then
    /// submits and confirms it
    async fn submit_serialized(&self, wire: &[u8]) -> Result<Signature>;
}

/// Submits a batch and waits for confirmation
pub async fn submit_and_confirm<C: LedgerClient + ?Sized>(
    client: &C,
    instructions: &[Instruction],
) -> Result<Signature> {
    let signature = client.submit_batch(instructions).await?;
    client.confirm_batch(&signature).await?;
    Ok(signature)
}

/// Signs `instructions` with the payer plus whichever of `cosigners` the
/// message requires
pub fn sign_batch(
    payer: &Keypair,
    cosigners: &[Keypair],
    instructions: &[Instruction],
    blockhash: Hash,
) -> Result<Transaction> {
    let mut transaction = Transaction::new_with_payer(instructions, Some(&payer.pubkey()));
    let message = &transaction.message;
    let required = &message.account_keys[..usize::from(message.header.num_required_signatures)];

    let mut signers: Vec<&dyn Signer> = vec![payer];
    signers.extend(
        cosigners
            .iter()
            .filter(|cosigner| required.contains(&cosigner.pubkey()))
            .map(|cosigner| cosigner as &dyn Signer),
    );
    transaction
        .try_sign(&signers, blockhash)
        .map_err(|e| CrankError::TransactionRejected(e.to_string()))?;
    Ok(transaction)
}

pub struct SolanaLedger {
    rpc: RpcClient,
    payer: Keypair,
    /// Extra signers, e.g. the owner of a treasury the payer doesn't own
    cosigners: Vec<Keypair>,
    commitment: CommitmentConfig,
    /// Last valid block height of each submitted, not yet settled batch
    pending: Mutex<HashMap<Signature, u64>>,
}

impl SolanaLedger {
    pub fn new(rpc_url: impl Into<String>, payer: Keypair) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.into(), commitment),
            payer,
            cosigners: Vec::new(),
            commitment,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cosigner(mut self, cosigner: Keypair) -> Self {
        self.cosigners.push(cosigner);
        self
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<Signature, u64>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn landed(&self, signature: &Signature) -> Result<Option<bool>> {
        let status = self
            .rpc
            .get_signature_status_with_commitment(signature, self.commitment)
            .await?;
        Ok(status.map(|result| result.is_ok()))
    }
}

#[async_trait]
impl LedgerClient for SolanaLedger {
    fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let response = self
            .rpc
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn scan_token_accounts(&self, program_id: &Pubkey, mint: &Pubkey) -> Result<Vec<Pubkey>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![RpcFilterType::Memcmp(Memcmp::new_base58_encoded(
                0,
                mint.as_ref(),
            ))]),
            account_config: RpcAccountInfoConfig {
                commitment: Some(self.commitment),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };
        let accounts = self
            .rpc
            .get_program_accounts_with_config(program_id, config)
            .await?;
        debug!(program = %program_id, mint = %mint, found = accounts.len(), "program account scan");
        Ok(accounts.into_iter().map(|(address, _)| address).collect())
    }

    async fn submit_batch(&self, instructions: &[Instruction]) -> Result<Signature> {
        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(self.commitment)
            .await?;
        let transaction = sign_batch(&self.payer, &self.cosigners, instructions, blockhash)?;
        let signature = self.rpc.send_transaction(&transaction).await?;
        self.pending().insert(signature, last_valid_block_height);
        Ok(signature)
    }

    async fn confirm_batch(&self, signature: &Signature) -> Result<()> {
        self.rpc
            .poll_for_signature_with_commitment(signature, self.commitment)
            .await?;
        match self
            .rpc
            .get_signature_status_with_commitment(signature, self.commitment)
            .await?
        {
            Some(Ok(())) => {
                self.pending().remove(signature);
                Ok(())
            }
            Some(Err(err)) => Err(CrankError::BatchNotConfirmed {
                signature: signature.to_string(),
                reason: err.to_string(),
            }),
            None => Err(CrankError::BatchNotConfirmed {
                signature: signature.to_string(),
                reason: "signature status unavailable".to_string(),
            }),
        }
    }

    async fn settle_unconfirmed(&self, signature: &Signature) -> Result<bool> {
        let last_valid_block_height = self.pending().remove(signature).ok_or_else(|| {
            CrankError::BatchNotConfirmed {
                signature: signature.to_string(),
                reason: "blockhash expiry unknown".to_string(),
            }
        })?;

        loop {
            if let Some(executed) = self.landed(signature).await? {
                return Ok(executed);
            }
            // a finalized height past the limit rules out every fork
            let height = self
                .rpc
                .get_block_height_with_commitment(CommitmentConfig::finalized())
                .await?;
            if height > last_valid_block_height {
                let executed = self.landed(signature).await?.unwrap_or(false);
                debug!(%signature, height, last_valid_block_height, executed, "batch blockhash expired");
                return Ok(executed);
            }
            tokio::time::sleep(Duration::from_millis(EXPIRY_POLL_INTERVAL_MS)).await;
        }
    }

    async fn submit_serialized(&self, wire: &[u8]) -> Result<Signature> {
        let unsigned: VersionedTransaction = bincode::deserialize(wire)
            .map_err(|e| CrankError::TransactionRejected(format!("undecodable transaction: {e}")))?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[&self.payer])
            .map_err(|e| CrankError::TransactionRejected(e.to_string()))?;
        Ok(self.rpc.send_and_confirm_transaction(&signed).await?)
    }
}
