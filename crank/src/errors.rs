use anchor_client::solana_client::client_error::ClientError;
use anchor_client::solana_sdk::pubkey::Pubkey;

#[derive(Debug, thiserror::Error)]
pub enum CrankError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unable to load keypair from {path}: {reason}")]
    Keypair { path: String, reason: String },
    #[error("RPC request failed: {0}")]
    Rpc(#[from] ClientError),
    #[error("Mint {0} not found")]
    MintNotFound(Pubkey),
    #[error("Account {address} could not be decoded: {reason}")]
    AccountDecode { address: Pubkey, reason: String },
    #[error("Mint {0} has no transfer fee extension - nothing to harvest")]
    NotFeeBearing(Pubkey),
    #[error("Instruction could not be built: {0}")]
    InstructionBuild(String),
    #[error("Batch {signature} was not confirmed: {reason}")]
    BatchNotConfirmed { signature: String, reason: String },
    #[error("Swap router error: {0}")]
    Router(#[from] swap_router::RouterError),
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),
    #[error("Swap failed and treasury holds {available:?} of the reward token (minimum {minimum})")]
    SwapFallbackUnavailable {
        reason: String,
        available: Option<u64>,
        minimum: u64,
    },
    #[error("A distribution run for mint {0} is already in progress")]
    RunInProgress(Pubkey),
    #[error("Ledger state I/O failed: {0}")]
    LedgerIo(#[from] std::io::Error),
    #[error("Ledger state is malformed: {0}")]
    LedgerFormat(#[from] serde_json::Error),
    #[error("Math overflow occurred during calculation")]
    MathOverflow,
}

pub type Result<T> = std::result::Result<T, CrankError>;
