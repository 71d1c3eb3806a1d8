use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_RUN_HISTORY;
use crate::errors::{CrankError, Result};

/// One confirmed payout within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRecord {
    /// Recipient wallet (base58)
    pub owner: String,
    /// Amount paid in reward base units
    #[serde(with = "decimal_string")]
    pub amount: u64,
    /// Signature of the batch transaction that paid it
    #[serde(alias = "signature")]
    pub batch_ref: String,
}

/// Outcome of one distribution run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// When the run was recorded
    pub timestamp: DateTime<Utc>,
    /// Recipients paid
    pub success_count: usize,
    /// Recipients in failed batches
    pub fail_count: usize,
    /// Amount confirmed on chain this run
    #[serde(with = "decimal_string")]
    pub total_distributed: u64,
    /// Confirmed payouts
    #[serde(default)]
    pub records: Vec<DistributionRecord>,
}

/// Persisted per-mint distribution state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    /// Timestamp of the last recorded run
    pub last_distribution: Option<DateTime<Utc>>,
    /// Lifetime amount distributed
    #[serde(with = "decimal_string")]
    pub total_distributed: u128,
    /// Most recent runs, oldest first
    #[serde(default)]
    pub distributions: Vec<RunRecord>,
}

impl LedgerState {
    /// Appends `run`, bumps the lifetime total and evicts the oldest
    /// history beyond [`MAX_RUN_HISTORY`]
    pub fn record_run(&mut self, run: RunRecord) -> Result<()> {
        self.total_distributed = self
            .total_distributed
            .checked_add(u128::from(run.total_distributed))
            .ok_or(CrankError::MathOverflow)?;
        self.last_distribution = Some(run.timestamp);
        self.distributions.push(run);

        if self.distributions.len() > MAX_RUN_HISTORY {
            let excess = self.distributions.len() - MAX_RUN_HISTORY;
            self.distributions.drain(..excess);
        }
        Ok(())
    }

    pub fn run_count(&self) -> usize {
        self.distributions.len()
    }
}

/// Integers persisted as decimal strings. Plain JSON numbers are accepted
/// on load.
mod decimal_string {
    use std::fmt::{self, Display};
    use std::marker::PhantomData;
    use std::str::FromStr;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    struct DecimalVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for DecimalVisitor<T>
    where
        T: FromStr + TryFrom<u64>,
    {
        type Value = T;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative integer or decimal string")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<T, E> {
            value
                .trim()
                .parse()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<T, E> {
            T::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + TryFrom<u64>,
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DecimalVisitor(PhantomData))
    }
}
