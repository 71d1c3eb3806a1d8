use std::str::FromStr;
use std::time::Duration;

use anchor_client::solana_sdk::pubkey;
use anchor_client::solana_sdk::pubkey::Pubkey;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Quote, QuoteRequest, RouterError, RouterResult, SwapRouter, SwapTransaction};

pub const DEFAULT_JUPITER_URL: &str = "https://quote-api.jup.ag/v6";

/// Wrapped SOL
pub const NATIVE_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotePayload {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
    #[serde(default)]
    slippage_bps: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapPayload {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: u64,
}

/// Jupiter v6 HTTP client
pub struct JupiterClient {
    base_url: String,
    http: Client,
}

impl JupiterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RouterResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn read_json(response: reqwest::Response) -> RouterResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl SwapRouter for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> RouterResult<Quote> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
            ])
            .send()
            .await?;

        let raw = Self::read_json(response).await?;
        let quote = parse_quote(raw)?;
        if quote.out_amount == 0 {
            return Err(RouterError::NoRoute {
                input: request.input_mint,
                output: request.output_mint,
            });
        }
        debug!(
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            price_impact = %quote.price_impact_pct,
            "jupiter quote received"
        );
        Ok(quote)
    }

    async fn build_swap_transaction(
        &self,
        quote: &Quote,
        signer: &Pubkey,
    ) -> RouterResult<SwapTransaction> {
        let url = format!("{}/swap", self.base_url);
        let body = swap_body(quote, signer);
        let response = self.http.post(&url).json(&body).send().await?;
        let raw = Self::read_json(response).await?;
        parse_swap(raw)
    }
}

/// Wrapped SOL output stays wrapped so it lands in the signer's token
/// account rather than as lamports
pub(crate) fn swap_body(quote: &Quote, signer: &Pubkey) -> Value {
    json!({
        "quoteResponse": quote.raw,
        "userPublicKey": signer.to_string(),
        "wrapAndUnwrapSol": quote.output_mint != NATIVE_MINT,
        "dynamicComputeUnitLimit": true,
        "prioritizationFeeLamports": "auto",
    })
}

fn parse_amount(field: &str, value: &str) -> RouterResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| RouterError::Malformed(format!("{field} is not an integer: {value}")))
}

fn parse_pubkey(field: &str, value: &str) -> RouterResult<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|_| RouterError::Malformed(format!("{field} is not a valid address: {value}")))
}

pub(crate) fn parse_quote(raw: Value) -> RouterResult<Quote> {
    let payload: QuotePayload = serde_json::from_value(raw.clone())
        .map_err(|e| RouterError::Malformed(e.to_string()))?;

    Ok(Quote {
        input_mint: parse_pubkey("inputMint", &payload.input_mint)?,
        output_mint: parse_pubkey("outputMint", &payload.output_mint)?,
        in_amount: parse_amount("inAmount", &payload.in_amount)?,
        out_amount: parse_amount("outAmount", &payload.out_amount)?,
        other_amount_threshold: parse_amount(
            "otherAmountThreshold",
            &payload.other_amount_threshold,
        )?,
        price_impact_pct: payload.price_impact_pct.unwrap_or_else(|| "0".to_string()),
        slippage_bps: payload.slippage_bps,
        raw,
    })
}

pub(crate) fn parse_swap(raw: Value) -> RouterResult<SwapTransaction> {
    let payload: SwapPayload =
        serde_json::from_value(raw).map_err(|e| RouterError::Malformed(e.to_string()))?;
    let serialized = base64::engine::general_purpose::STANDARD
        .decode(payload.swap_transaction.as_bytes())
        .map_err(|e| RouterError::Malformed(format!("swapTransaction: {e}")))?;

    Ok(SwapTransaction {
        serialized,
        last_valid_block_height: payload.last_valid_block_height,
    })
}
