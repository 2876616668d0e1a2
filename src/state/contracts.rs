//! Contract storage manager.
//!
//! The virtual machine itself is an external collaborator; this manager
//! owns the durable key/value slice contracts write to, and keeps a
//! per-block undo log so applied writes can be reverted exactly.

use std::collections::HashMap;

use crate::error::{Result, StorageError, ValidationError};
use crate::state::StateManager;
use crate::types::{Block, BlockHash, TxPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
struct UndoRecord {
    contract: String,
    key: String,
    previous: Option<String>,
}

/// Snapshot of contract storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSnapshot {
    values: HashMap<String, HashMap<String, String>>,
    undo: HashMap<BlockHash, Vec<UndoRecord>>,
}

/// Key/value storage per contract, with per-block undo records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractStore {
    values: HashMap<String, HashMap<String, String>>,
    undo: HashMap<BlockHash, Vec<UndoRecord>>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a contract storage slot.
    pub fn get(&self, contract: &str, key: &str) -> Option<&String> {
        self.values.get(contract)?.get(key)
    }
}

impl StateManager for ContractStore {
    type Snapshot = ContractSnapshot;

    fn snapshot(&self) -> Result<ContractSnapshot> {
        Ok(ContractSnapshot {
            values: self.values.clone(),
            undo: self.undo.clone(),
        })
    }

    fn restore(&mut self, snapshot: ContractSnapshot) -> Result<()> {
        self.values = snapshot.values;
        self.undo = snapshot.undo;
        Ok(())
    }

    fn apply_block(&mut self, block: &Block) -> Result<()> {
        let mut records = Vec::new();
        for tx in &block.transactions {
            let TxPayload::ContractWrite {
                contract,
                key,
                value,
            } = &tx.payload
            else {
                continue;
            };
            if contract.is_empty() || key.is_empty() {
                return Err(ValidationError::ContractViolation(
                    "empty contract id or key".to_string(),
                )
                .into());
            }

            let slots = self.values.entry(contract.clone()).or_default();
            let previous = slots.insert(key.clone(), value.clone());
            records.push(UndoRecord {
                contract: contract.clone(),
                key: key.clone(),
                previous,
            });
        }

        if !records.is_empty() {
            self.undo.insert(block.block_hash(), records);
        }
        Ok(())
    }

    fn revert_block(&mut self, block: &Block) -> Result<()> {
        let block_hash = block.block_hash();
        let Some(records) = self.undo.remove(&block_hash) else {
            let had_writes = block
                .transactions
                .iter()
                .any(|tx| matches!(tx.payload, TxPayload::ContractWrite { .. }));
            if had_writes {
                return Err(StorageError::InconsistentState(format!(
                    "no undo records for block {}",
                    block_hash
                ))
                .into());
            }
            return Ok(());
        };

        for record in records.into_iter().rev() {
            let slots = self.values.entry(record.contract.clone()).or_default();
            match record.previous {
                Some(previous) => {
                    slots.insert(record.key, previous);
                }
                None => {
                    slots.remove(&record.key);
                }
            }
            if self.values.get(&record.contract).is_some_and(|s| s.is_empty()) {
                self.values.remove(&record.contract);
            }
        }
        Ok(())
    }
}
