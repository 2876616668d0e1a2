//! Mempool: the pool of not-yet-confirmed candidate transactions.
//!
//! Admission is gated at this boundary: nonce violations and duplicates
//! are rejected synchronously with a specific reason code and never reach
//! the reorg coordinator. The mempool lock may be held independently of
//! the chain lock but is always acquired *after* it when both are needed.

pub mod ordering;

pub use ordering::{canonicalize, validate_ordering};

use indexmap::IndexMap;

use crate::error::{SequencingError, SequencingResult};
use crate::state::NonceTracker;
use crate::types::{Block, Transaction, TxId};

/// Pool of pending transactions, bounded, insertion-ordered.
pub struct Mempool {
    transactions: IndexMap<TxId, Transaction>,
    max_transactions: usize,
}

impl Mempool {
    pub fn new(max_transactions: usize) -> Self {
        Self {
            transactions: IndexMap::new(),
            max_transactions,
        }
    }

    /// Admit a transaction. Nonced transactions must carry exactly the
    /// sender's next valid nonce; accepted nonces advance the tracker's
    /// pending watermark.
    pub fn submit(
        &mut self,
        tx: Transaction,
        nonces: &NonceTracker,
    ) -> SequencingResult<TxId> {
        if tx.is_coinbase() {
            return Err(SequencingError::UnexpectedCoinbase);
        }

        let txid = tx.txid();
        if self.transactions.contains_key(&txid) {
            return Err(SequencingError::DuplicateTxId(txid));
        }
        if self.transactions.len() >= self.max_transactions {
            return Err(SequencingError::MempoolFull);
        }

        if let Some(nonce) = tx.nonce {
            if !nonces.validate_nonce(&tx.sender, nonce) {
                return Err(SequencingError::StaleNonce {
                    address: tx.sender.to_string(),
                    expected: nonces.next_nonce(&tx.sender),
                    got: nonce,
                });
            }
            nonces.reserve_nonce(&tx.sender, nonce);
        }

        tracing::debug!("Admitted transaction {} from {}", txid, tx.sender);
        self.transactions.insert(txid, tx);
        Ok(txid)
    }

    /// Drop transactions confirmed by a connected block.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.transactions.shift_remove(&tx.txid());
        }
    }

    /// Re-admit transactions from disconnected blocks after a reorg,
    /// skipping any that conflict with the new canonical state.
    pub fn readmit(
        &mut self,
        transactions: impl IntoIterator<Item = Transaction>,
        nonces: &NonceTracker,
    ) {
        for tx in transactions {
            if tx.is_coinbase() {
                continue;
            }
            if let Err(e) = self.submit(tx, nonces) {
                tracing::debug!(
                    "Dropping disconnected transaction: {}",
                    e.reason_code()
                );
            }
        }
    }

    /// Rebuild the advisory pending watermarks after a restart, from the
    /// surviving pool contents.
    pub fn rebuild_pending(&self, nonces: &NonceTracker) {
        for tx in self.transactions.values() {
            if let Some(nonce) = tx.nonce {
                nonces.reserve_nonce(&tx.sender, nonce);
            }
        }
    }

    /// Select up to `limit` transactions in canonical order for a new
    /// candidate block. The pool keeps its contents; confirmation removes
    /// them later.
    pub fn select_canonical(&self, limit: usize) -> Vec<Transaction> {
        let selected: Vec<Transaction> =
            self.transactions.values().take(limit).cloned().collect();
        canonicalize(selected)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.transactions.contains_key(txid)
    }
}
