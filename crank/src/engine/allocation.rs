use ruint::aliases::U256;

use crate::errors::{CrankError, Result};

/// What happens to the integer-division dust of a proportional split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainderPolicy {
    /// Dust stays with the payer. Holder reflections use this.
    Retain,
    /// The last weighted recipient receives `pool - Σ(previous shares)`.
    /// Only fee-split recipients use this.
    LastRecipient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation<K> {
    pub recipient: K,
    pub amount: u64,
}

/// Splits `pool` across `participants` in proportion to their weights.
///
/// Each share is `floor(weight * pool / total_weight)`, computed in 256-bit
/// arithmetic so any pair of u64 inputs is exact. Zero shares are dropped.
/// Iteration order is the input order, so identical inputs always produce
/// identical outputs.
pub fn allocate<K: Clone>(
    participants: &[(K, u64)],
    pool: u64,
    policy: RemainderPolicy,
) -> Result<Vec<Allocation<K>>> {
    if pool == 0 || participants.is_empty() {
        return Ok(Vec::new());
    }

    let total_weight = participants
        .iter()
        .fold(U256::ZERO, |sum, (_, weight)| sum + U256::from(*weight));
    if total_weight.is_zero() {
        return Ok(Vec::new());
    }

    let last_weighted = participants.iter().rposition(|(_, weight)| *weight > 0);
    let pool_wide = U256::from(pool);
    let mut distributed: u64 = 0;
    let mut allocations = Vec::with_capacity(participants.len());

    for (index, (recipient, weight)) in participants.iter().enumerate() {
        if *weight == 0 {
            continue;
        }

        let share = U256::from(*weight) * pool_wide / total_weight;
        let mut amount = u64::try_from(share).map_err(|_| CrankError::MathOverflow)?;

        if policy == RemainderPolicy::LastRecipient && Some(index) == last_weighted {
            amount = pool
                .checked_sub(distributed)
                .ok_or(CrankError::MathOverflow)?;
        }
        if amount == 0 {
            continue;
        }

        distributed = distributed
            .checked_add(amount)
            .ok_or(CrankError::MathOverflow)?;
        allocations.push(Allocation {
            recipient: recipient.clone(),
            amount,
        });
    }

    Ok(allocations)
}

pub fn total_allocated<K>(allocations: &[Allocation<K>]) -> u64 {
    allocations.iter().map(|a| a.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amounts(allocations: &[Allocation<&'static str>]) -> Vec<(&'static str, u64)> {
        allocations.iter().map(|a| (a.recipient, a.amount)).collect()
    }

    #[test]
    fn exact_proportional_split() {
        let holders = [("A", 100_000), ("B", 200_000), ("C", 700_000)];
        let result = allocate(&holders, 10_000, RemainderPolicy::Retain).unwrap();
        assert_eq!(amounts(&result), vec![("A", 1_000), ("B", 2_000), ("C", 7_000)]);
        assert_eq!(total_allocated(&result), 10_000);
    }

    #[test]
    fn retain_policy_drops_dust() {
        let holders = [("A", 1), ("B", 1), ("C", 1)];
        let result = allocate(&holders, 10, RemainderPolicy::Retain).unwrap();
        assert_eq!(amounts(&result), vec![("A", 3), ("B", 3), ("C", 3)]);
        assert_eq!(total_allocated(&result), 9);
    }

    #[test]
    fn last_recipient_policy_absorbs_dust() {
        let holders = [("A", 1), ("B", 1), ("C", 1)];
        let result = allocate(&holders, 10, RemainderPolicy::LastRecipient).unwrap();
        assert_eq!(amounts(&result), vec![("A", 3), ("B", 3), ("C", 4)]);
        assert_eq!(total_allocated(&result), 10);
    }

    #[test]
    fn last_recipient_skips_trailing_zero_weights() {
        let holders = [("A", 7_000), ("B", 3_000), ("C", 0)];
        let result = allocate(&holders, 1_001, RemainderPolicy::LastRecipient).unwrap();
        assert_eq!(amounts(&result), vec![("A", 700), ("B", 301)]);
    }

    #[test]
    fn empty_inputs_allocate_nothing() {
        let none: [(&str, u64); 0] = [];
        assert!(allocate(&none, 1_000, RemainderPolicy::Retain).unwrap().is_empty());
        assert!(allocate(&[("A", 5)], 0, RemainderPolicy::Retain).unwrap().is_empty());
        assert!(allocate(&[("A", 0), ("B", 0)], 50, RemainderPolicy::LastRecipient)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn small_holders_receive_nothing_rather_than_rounding_up() {
        let holders = [("whale", 1_000_000), ("dust", 1)];
        let result = allocate(&holders, 100, RemainderPolicy::Retain).unwrap();
        assert_eq!(amounts(&result), vec![("whale", 99)]);
    }

    #[test]
    fn never_exceeds_pool_and_is_deterministic() {
        // deterministic pseudo-random weights
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for round in 0..200u64 {
            let count = (round % 17 + 1) as usize;
            let participants: Vec<(usize, u64)> = (0..count)
                .map(|i| {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    (i, seed % 1_000_000_007)
                })
                .collect();
            let pool = seed % 10_000_000_000;

            for policy in [RemainderPolicy::Retain, RemainderPolicy::LastRecipient] {
                let first = allocate(&participants, pool, policy).unwrap();
                let second = allocate(&participants, pool, policy).unwrap();
                assert_eq!(first, second);

                let sum = total_allocated(&first);
                assert!(sum <= pool);
                if policy == RemainderPolicy::LastRecipient
                    && participants.iter().any(|(_, w)| *w > 0)
                {
                    assert_eq!(sum, pool);
                }
            }
        }
    }

    #[test]
    fn full_range_balances_do_not_overflow() {
        let holders = [("A", u64::MAX), ("B", u64::MAX)];
        let result = allocate(&holders, u64::MAX, RemainderPolicy::Retain).unwrap();
        assert_eq!(result[0].amount, u64::MAX / 2);
        assert_eq!(result[1].amount, u64::MAX / 2);
    }
}
