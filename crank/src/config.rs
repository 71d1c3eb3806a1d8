use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anchor_client::solana_sdk::pubkey::Pubkey;
use anchor_client::solana_sdk::signature::Keypair;
use clap::Parser;
use serde::Deserialize;
use swap_router::jupiter::DEFAULT_JUPITER_URL;

use crate::constants::*;
use crate::errors::{CrankError, Result};

/// Hourly reflection job: harvests withheld transfer fees and pays them out
/// to holders of the mint in proportion to their balances.
#[derive(Parser, Debug, Clone)]
#[command(name = "reflection-crank", version, about)]
pub struct CrankArgs {
    /// Fee-bearing Token-2022 mint
    #[arg(long, env = "MINT_ADDRESS")]
    pub mint: Option<String>,

    /// Treasury keypair; signs every transaction and must be the mint's
    /// withdraw-withheld authority
    #[arg(long, env = "TREASURY_KEYPAIR_PATH")]
    pub treasury_keypair: Option<PathBuf>,

    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    /// Asset paid to holders; defaults to the fee mint
    #[arg(long, env = "REWARD_TOKEN_MINT")]
    pub reward_mint: Option<String>,

    #[arg(long, env = "SWAP_SLIPPAGE_BPS", default_value_t = DEFAULT_SWAP_SLIPPAGE_BPS)]
    pub slippage_bps: u16,

    /// Smallest balance (base units) that earns a reflection
    #[arg(long, env = "MIN_HOLDING", default_value_t = DEFAULT_MIN_HOLDING)]
    pub min_holding: u64,

    /// Comma-separated wallets never paid (pools, team wallets)
    #[arg(long, env = "EXCLUDED_WALLETS", value_delimiter = ',')]
    pub excluded_wallets: Vec<String>,

    #[arg(long, env = "MAX_DISTRIBUTIONS_PER_RUN", default_value_t = DEFAULT_MAX_DISTRIBUTIONS_PER_RUN)]
    pub max_distributions_per_run: usize,

    /// Pool (base units) below which the run is skipped
    #[arg(long, env = "MIN_TOTAL_POOL", default_value_t = DEFAULT_MIN_TOTAL_POOL)]
    pub min_total_pool: u64,

    #[arg(long, env = "STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[arg(long, env = "DISBURSE_BATCH_SIZE", default_value_t = DEFAULT_DISBURSE_BATCH_SIZE)]
    pub batch_size: usize,

    /// Resubmissions of a failed payout batch within a run (0 drops it)
    #[arg(long, env = "FAILED_BATCH_RETRIES", default_value_t = DEFAULT_FAILED_BATCH_RETRIES)]
    pub failed_batch_retries: u8,

    /// Comma-separated token accounts to harvest instead of scanning
    #[arg(long, env = "HARVEST_ACCOUNTS", value_delimiter = ',')]
    pub harvest_accounts: Vec<String>,

    #[arg(long, env = "JUPITER_API_URL", default_value = DEFAULT_JUPITER_URL)]
    pub jupiter_api_url: String,

    #[arg(long, env = "ROUTER_TIMEOUT_MS", default_value_t = DEFAULT_ROUTER_TIMEOUT_MS)]
    pub router_timeout_ms: u64,

    /// Age after which a run lease left by a dead process is reclaimed
    #[arg(long, env = "LEASE_TTL_SECS", default_value_t = DEFAULT_LEASE_TTL_SECS)]
    pub lease_ttl_secs: u64,
}

/// Validated settings for one distribution run
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// Fee-bearing mint
    pub mint: Pubkey,
    /// Asset paid to holders
    pub reward_mint: Pubkey,
    pub treasury_keypair_path: PathBuf,
    pub rpc_url: String,
    pub slippage_bps: u16,
    pub min_holding: u64,
    pub excluded_wallets: Vec<String>,
    pub max_distributions_per_run: usize,
    pub min_total_pool: u64,
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
    pub batch_size: usize,
    pub failed_batch_retries: u8,
    /// Explicit harvest sources; `None` scans the mint
    pub harvest_accounts: Option<Vec<Pubkey>>,
    pub jupiter_api_url: String,
    pub router_timeout: Duration,
    pub lease_ttl: Duration,
}

impl DistributionConfig {
    pub fn needs_swap(&self) -> bool {
        self.mint != self.reward_mint
    }

    /// Defaults for everything but the mint
    pub fn for_mint(mint: Pubkey) -> Self {
        Self {
            mint,
            reward_mint: mint,
            treasury_keypair_path: default_keypair_path(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            slippage_bps: DEFAULT_SWAP_SLIPPAGE_BPS,
            min_holding: DEFAULT_MIN_HOLDING,
            excluded_wallets: Vec::new(),
            max_distributions_per_run: DEFAULT_MAX_DISTRIBUTIONS_PER_RUN,
            min_total_pool: DEFAULT_MIN_TOTAL_POOL,
            state_dir: default_state_dir(),
            log_file: default_log_file(),
            batch_size: DEFAULT_DISBURSE_BATCH_SIZE,
            failed_batch_retries: DEFAULT_FAILED_BATCH_RETRIES,
            harvest_accounts: None,
            jupiter_api_url: DEFAULT_JUPITER_URL.to_string(),
            router_timeout: Duration::from_millis(DEFAULT_ROUTER_TIMEOUT_MS),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
        }
    }
}

fn invalid(message: impl Into<String>) -> CrankError {
    CrankError::InvalidConfig(message.into())
}

pub fn parse_pubkey(label: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim())
        .map_err(|_| invalid(format!("{label} must be a valid base58 public key, got \"{value}\"")))
}

fn app_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".reflection-crank"))
        .unwrap_or_else(|| PathBuf::from(".reflection-crank"))
}

pub fn default_state_dir() -> PathBuf {
    app_dir().join("state")
}

pub fn default_log_file() -> PathBuf {
    app_dir().join("logs").join("reflections.log")
}

pub fn default_keypair_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config")
        .join("solana")
        .join("id.json")
}

impl CrankArgs {
    /// Log destination, known before the rest of the config is validated
    pub fn log_file(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(default_log_file)
    }

    pub fn into_config(self) -> Result<DistributionConfig> {
        let mint = match self.mint.as_deref().map(str::trim) {
            Some(mint) if !mint.is_empty() => parse_pubkey("MINT_ADDRESS", mint)?,
            _ => return Err(invalid("MINT_ADDRESS is required")),
        };
        let reward_mint = match self.reward_mint.as_deref().map(str::trim) {
            Some(reward) if !reward.is_empty() => parse_pubkey("REWARD_TOKEN_MINT", reward)?,
            _ => mint,
        };

        if u64::from(self.slippage_bps) > MAX_BPS {
            return Err(invalid(format!(
                "SWAP_SLIPPAGE_BPS must be at most {MAX_BPS}, got {}",
                self.slippage_bps
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_DISBURSE_BATCH_SIZE {
            return Err(invalid(format!(
                "DISBURSE_BATCH_SIZE must be between 1 and {MAX_DISBURSE_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.failed_batch_retries > MAX_FAILED_BATCH_RETRIES {
            return Err(invalid(format!(
                "FAILED_BATCH_RETRIES must be at most {MAX_FAILED_BATCH_RETRIES}, got {}",
                self.failed_batch_retries
            )));
        }
        if self.max_distributions_per_run == 0 {
            return Err(invalid("MAX_DISTRIBUTIONS_PER_RUN must be positive"));
        }
        if self.lease_ttl_secs == 0 {
            return Err(invalid("LEASE_TTL_SECS must be positive"));
        }

        let harvest_accounts: Vec<Pubkey> = self
            .harvest_accounts
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(|a| parse_pubkey("HARVEST_ACCOUNTS entry", a))
            .collect::<Result<_>>()?;

        let excluded_wallets = self
            .excluded_wallets
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        Ok(DistributionConfig {
            mint,
            reward_mint,
            treasury_keypair_path: self.treasury_keypair.unwrap_or_else(default_keypair_path),
            rpc_url: self.rpc_url,
            slippage_bps: self.slippage_bps,
            min_holding: self.min_holding,
            excluded_wallets,
            max_distributions_per_run: self.max_distributions_per_run,
            min_total_pool: self.min_total_pool,
            state_dir: self.state_dir.unwrap_or_else(default_state_dir),
            log_file: self.log_file.unwrap_or_else(default_log_file),
            batch_size: self.batch_size,
            failed_batch_retries: self.failed_batch_retries,
            harvest_accounts: (!harvest_accounts.is_empty()).then_some(harvest_accounts),
            jupiter_api_url: self.jupiter_api_url,
            router_timeout: Duration::from_millis(self.router_timeout_ms),
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
        })
    }
}

/// Keypair files written by the Solana CLI (a JSON byte array) or by
/// wallet exports (`{"secretKey": [...]}`)
#[derive(Deserialize)]
#[serde(untagged)]
enum KeypairFile {
    Bytes(Vec<u8>),
    Wrapped {
        #[serde(rename = "secretKey")]
        secret_key: Vec<u8>,
    },
}

pub fn load_keypair(path: &Path) -> Result<Keypair> {
    let failure = |reason: String| CrankError::Keypair {
        path: path.display().to_string(),
        reason,
    };

    let contents = fs::read_to_string(path).map_err(|e| failure(e.to_string()))?;
    let bytes = match serde_json::from_str::<KeypairFile>(&contents)
        .map_err(|e| failure(format!("unrecognized keypair format: {e}")))?
    {
        KeypairFile::Bytes(bytes) => bytes,
        KeypairFile::Wrapped { secret_key } => secret_key,
    };
    if bytes.len() != 64 {
        return Err(failure(format!("expected 64 secret key bytes, found {}", bytes.len())));
    }

    Keypair::try_from(bytes.as_slice()).map_err(|e| failure(e.to_string()))
}
