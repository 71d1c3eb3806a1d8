// Ledger query limits
pub const ACCOUNT_FETCH_CHUNK_SIZE: usize = 50; // getMultipleAccounts round trip
pub const HARVEST_SOURCES_PER_TX: usize = 20; // withdraw-withheld sources per transaction

// Disbursement defaults
pub const DEFAULT_DISBURSE_BATCH_SIZE: usize = 5; // recipients per atomic transaction
pub const DEFAULT_FAILED_BATCH_RETRIES: u8 = 0; // 0 = drop failed batches
pub const DEFAULT_MAX_DISTRIBUTIONS_PER_RUN: usize = 100;

// Pool thresholds (base units)
pub const DEFAULT_MIN_TOTAL_POOL: u64 = 1_000;
pub const DEFAULT_MIN_HOLDING: u64 = 0;

// Swap defaults
pub const DEFAULT_SWAP_SLIPPAGE_BPS: u16 = 100; // 1%
pub const DEFAULT_ROUTER_TIMEOUT_MS: u64 = 15_000;
pub const MAX_BPS: u64 = 10_000;

// Run history
pub const MAX_RUN_HISTORY: usize = 100;

// Persisted state file naming
pub const STATE_FILE_PREFIX: &str = "state-";
pub const STATE_FILE_EXTENSION: &str = "json";
pub const LEASE_FILE_EXTENSION: &str = "lock";
pub const DEFAULT_LEASE_TTL_SECS: u64 = 3_600;

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

// Config bounds
pub const MAX_DISBURSE_BATCH_SIZE: usize = 10; // two instructions per recipient
pub const MAX_FAILED_BATCH_RETRIES: u8 = 10;

// Unconfirmed batches are polled until their blockhash expires
pub const EXPIRY_POLL_INTERVAL_MS: u64 = 2_000;
