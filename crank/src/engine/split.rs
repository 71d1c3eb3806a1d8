use std::str::FromStr;

use anchor_client::solana_sdk::pubkey::Pubkey;

use crate::engine::allocation::{allocate, Allocation, RemainderPolicy};
use crate::errors::{CrankError, Result};

/// Downstream wallet receiving a fixed share of harvested fees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRecipient {
    pub wallet: Pubkey,
    /// Weight in basis points; weights need not sum to 10_000
    pub bps: u64,
}

impl FromStr for SplitRecipient {
    type Err = CrankError;

    /// Parses `wallet:percent`, e.g. `9xQe...:70` or `9xQe...:12.5`
    fn from_str(entry: &str) -> Result<Self> {
        let invalid = |reason: &str| CrankError::InvalidConfig(format!("split entry \"{entry}\": {reason}"));

        let (address, percent) = entry
            .split_once(':')
            .map(|(a, p)| (a.trim(), p.trim()))
            .filter(|(a, p)| !a.is_empty() && !p.is_empty())
            .ok_or_else(|| invalid("expected wallet:percent"))?;

        let wallet = Pubkey::from_str(address).map_err(|_| invalid("not a valid wallet address"))?;
        let percent: f64 = percent
            .parse()
            .map_err(|_| invalid("percentage must be a number"))?;
        if !percent.is_finite() || percent <= 0.0 {
            return Err(invalid("percentage must be positive"));
        }

        let bps = (percent * 100.0).round();
        if bps < 1.0 {
            return Err(invalid("percentage is too small to allocate"));
        }

        Ok(Self {
            wallet,
            bps: bps as u64,
        })
    }
}

impl SplitRecipient {
    /// Comma-separated `wallet:percent` entries
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        let recipients = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::from_str)
            .collect::<Result<Vec<_>>>()?;
        if recipients.is_empty() {
            return Err(CrankError::InvalidConfig(
                "split must include at least one wallet:percent pair".to_string(),
            ));
        }
        Ok(recipients)
    }
}

/// Divides `amount` across `recipients` by weight. The last recipient
/// absorbs the rounding remainder so the whole amount is paid out.
pub fn plan_split(recipients: &[SplitRecipient], amount: u64) -> Result<Vec<Allocation<Pubkey>>> {
    let weighted: Vec<(Pubkey, u64)> = recipients.iter().map(|r| (r.wallet, r.bps)).collect();
    allocate(&weighted, amount, RemainderPolicy::LastRecipient)
}
