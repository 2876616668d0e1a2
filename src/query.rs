//! Indexed transaction-history queries.
//!
//! The per-address index makes history lookups O(log n + k) instead of a
//! full chain rescan. Every returned entry is integrity-checked against
//! the block store by re-deriving its txid; corrupt or unloadable entries
//! are skipped and logged rather than failing the whole window, so index
//! damage degrades history instead of removing it.

use std::collections::HashMap;

use crate::error::{Result, ValidationError};
use crate::storage::BlockStore;
use crate::types::{Address, Block, TxId};

/// One indexed appearance of an address in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTxIndexEntry {
    pub block_height: u64,
    /// Position of the transaction within its block.
    pub tx_index: u32,
    pub txid: TxId,
    /// Whether the address is the sender (as opposed to an output owner).
    pub is_sender: bool,
    /// Total value moved toward the address, or moved by the sender.
    pub amount: u64,
    pub timestamp: u64,
}

/// Serves indexed historical lookups without rescanning the chain.
///
/// The index is only mutated after a block connect or disconnect has
/// committed, under the chain lock; a failed reorg never touches it.
#[derive(Debug, Default)]
pub struct TransactionQueryManager {
    /// Entries per address, ascending (height, tx_index); queries walk the
    /// vector backwards for (height desc, tx_index desc) pagination.
    index: HashMap<Address, Vec<AddressTxIndexEntry>>,
}

impl TransactionQueryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a newly connected block.
    pub fn connect_block(&mut self, block: &Block) {
        let height = block.header.height;
        let timestamp = block.header.timestamp;

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            let outgoing: u64 = tx.outputs.iter().map(|out| out.value).sum();

            if !tx.sender.is_system() {
                self.push_entry(
                    tx.sender.clone(),
                    AddressTxIndexEntry {
                        block_height: height,
                        tx_index: tx_index as u32,
                        txid,
                        is_sender: true,
                        amount: outgoing + tx.fee,
                        timestamp,
                    },
                );
            }

            let mut received: HashMap<&Address, u64> = HashMap::new();
            for output in &tx.outputs {
                *received.entry(&output.owner).or_default() += output.value;
            }
            for (owner, amount) in received {
                if *owner == tx.sender {
                    continue;
                }
                self.push_entry(
                    owner.clone(),
                    AddressTxIndexEntry {
                        block_height: height,
                        tx_index: tx_index as u32,
                        txid,
                        is_sender: false,
                        amount,
                        timestamp,
                    },
                );
            }
        }
    }

    /// Drop the index entries of a disconnected block.
    pub fn disconnect_block(&mut self, block: &Block) {
        self.disconnect_height(block.header.height);
    }

    /// Drop every index entry recorded at the given height.
    pub fn disconnect_height(&mut self, height: u64) {
        self.index.retain(|_, entries| {
            entries.retain(|entry| entry.block_height != height);
            !entries.is_empty()
        });
    }

    /// Drop the whole index (startup rebuild path).
    pub fn clear(&mut self) {
        self.index.clear();
    }

    fn push_entry(&mut self, address: Address, entry: AddressTxIndexEntry) {
        self.index.entry(address).or_default().push(entry);
    }

    /// Paginated history for an address, newest first.
    ///
    /// Returns at most `limit` verified entries plus the total indexed
    /// match count. Entries whose block cannot be loaded or whose
    /// re-derived txid disagrees with the index are skipped and logged.
    pub async fn history_window<S: BlockStore>(
        &self,
        address: &Address,
        limit: usize,
        offset: usize,
        store: &S,
    ) -> Result<(Vec<AddressTxIndexEntry>, usize)> {
        if limit == 0 {
            return Err(ValidationError::InvalidQuery(
                "limit must be greater than 0".to_string(),
            )
            .into());
        }

        let Some(entries) = self.index.get(address) else {
            return Ok((Vec::new(), 0));
        };
        let total_count = entries.len();

        let mut window = Vec::with_capacity(limit.min(total_count));
        for entry in entries.iter().rev().skip(offset).take(limit) {
            match store.block_by_height(entry.block_height).await {
                Ok(Some(block)) => {
                    let derived = block
                        .transactions
                        .get(entry.tx_index as usize)
                        .map(|tx| tx.txid());
                    if derived == Some(entry.txid) {
                        window.push(entry.clone());
                    } else {
                        tracing::warn!(
                            "Skipping index entry for {} at height {}: txid mismatch",
                            address,
                            entry.block_height
                        );
                    }
                }
                Ok(None) => {
                    tracing::warn!(
                        "Skipping index entry for {} at height {}: block missing",
                        address,
                        entry.block_height
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Skipping index entry for {} at height {}: {}",
                        address,
                        entry.block_height,
                        e
                    );
                }
            }
        }

        Ok((window, total_count))
    }

    /// Number of indexed entries for an address.
    pub fn indexed_count(&self, address: &Address) -> usize {
        self.index.get(address).map(Vec::len).unwrap_or(0)
    }
}
