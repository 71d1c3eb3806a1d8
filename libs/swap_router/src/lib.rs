//! Interface to the external liquidity router used to turn harvested fees
//! into a different reward asset.
//!
//! The crank only needs two calls: a quote for an exact-in swap and a
//! serialized transaction executing that quote for a given signer. Both are
//! exposed through [`SwapRouter`] so the engine can run against a test
//! double.

use anchor_client::solana_sdk::pubkey::Pubkey;
use async_trait::async_trait;

pub mod jupiter;

pub use jupiter::JupiterClient;

/// Exact-in swap request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Input amount in base units of `input_mint`
    pub amount: u64,
    pub slippage_bps: u16,
}

/// Router quote. `raw` is the untouched router payload and must be handed
/// back as-is when building the swap transaction.
#[derive(Debug, Clone)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output after slippage
    pub other_amount_threshold: u64,
    pub price_impact_pct: String,
    pub slippage_bps: u16,
    pub raw: serde_json::Value,
}

/// Unsigned (or partially signed) wire transaction returned by the router
#[derive(Debug, Clone)]
pub struct SwapTransaction {
    /// bincode-encoded `VersionedTransaction`
    pub serialized: Vec<u8>,
    pub last_valid_block_height: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("router request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("router returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed router response: {0}")]
    Malformed(String),

    #[error("no route from {input} to {output}")]
    NoRoute { input: Pubkey, output: Pubkey },
}

pub type RouterResult<T> = Result<T, RouterError>;

#[async_trait]
pub trait SwapRouter: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> RouterResult<Quote>;

    async fn build_swap_transaction(
        &self,
        quote: &Quote,
        signer: &Pubkey,
    ) -> RouterResult<SwapTransaction>;
}
