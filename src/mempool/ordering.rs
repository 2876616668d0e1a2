//! Canonical transaction ordering within a candidate block.
//!
//! The rules make block assembly deterministic and remove the block
//! producer's freedom to reorder transactions for profit: a sender's
//! nonced transactions appear in strictly increasing nonce order, and
//! nonce-less transactions from one sender are ordered by offered fee.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::{SequencingError, SequencingResult};
use crate::types::{Address, Transaction};

/// Validate a candidate ordering. Rules are checked in priority order:
///
/// 1. A reward entry, if present, must be the first entry (and unique).
/// 2. No two entries may share a txid.
/// 3. A sender's nonced entries must appear in strictly increasing nonce
///    order.
/// 4. A sender with no nonced entries must have fees in non-increasing
///    order.
pub fn validate_ordering(transactions: &[Transaction]) -> SequencingResult<()> {
    let reward_count = transactions.iter().filter(|tx| tx.is_coinbase()).count();
    if reward_count > 1 {
        return Err(SequencingError::MultipleCoinbase);
    }
    if reward_count == 1 && !transactions[0].is_coinbase() {
        return Err(SequencingError::CoinbaseNotFirst);
    }

    let mut seen = HashSet::with_capacity(transactions.len());
    for tx in transactions {
        let txid = tx.txid();
        if !seen.insert(txid) {
            return Err(SequencingError::DuplicateTxId(txid));
        }
    }

    // Group by sender, preserving appearance order.
    let mut groups: HashMap<&Address, Vec<&Transaction>> = HashMap::new();
    for tx in transactions.iter().filter(|tx| !tx.is_coinbase()) {
        groups.entry(&tx.sender).or_default().push(tx);
    }

    for (sender, group) in groups {
        let nonced = group.iter().filter(|tx| tx.nonce.is_some()).count();
        if nonced > 0 && nonced != group.len() {
            return Err(SequencingError::MixedNonceUsage(sender.to_string()));
        }

        if nonced > 0 {
            let mut previous: Option<u64> = None;
            for tx in &group {
                let nonce = tx.nonce.unwrap_or_default();
                match previous {
                    Some(p) if nonce == p => {
                        return Err(SequencingError::NonceReused(sender.to_string()))
                    }
                    Some(p) if nonce < p => {
                        return Err(SequencingError::NonceOutOfOrder(
                            sender.to_string(),
                        ))
                    }
                    _ => previous = Some(nonce),
                }
            }
        } else {
            let mut previous: Option<u64> = None;
            for tx in &group {
                if let Some(p) = previous {
                    if tx.fee > p {
                        return Err(SequencingError::FeeOutOfOrder(
                            sender.to_string(),
                        ));
                    }
                }
                previous = Some(tx.fee);
            }
        }
    }

    Ok(())
}

/// Produce the one canonical ordering of an arbitrary transaction set.
///
/// Stable sort: reward entry forced first, then by sender; within a sender
/// nonced entries ascend by nonce, nonce-less entries descend by fee. The
/// output of `canonicalize` always satisfies [`validate_ordering`] when the
/// input set itself is orderable (at most one reward entry, unique txids,
/// no mixed nonce usage per sender).
pub fn canonicalize(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.sort_by(|a, b| {
        match (a.is_coinbase(), b.is_coinbase()) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (true, true) => return Ordering::Equal,
            (false, false) => {}
        }
        a.sender
            .cmp(&b.sender)
            .then_with(|| match (a.nonce, b.nonce) {
                (Some(an), Some(bn)) => an.cmp(&bn),
                (None, None) => b.fee.cmp(&a.fee),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
            })
    });
    transactions
}
