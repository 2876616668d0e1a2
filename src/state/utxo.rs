//! Unspent-output ledger.

use std::collections::HashMap;

use crate::error::{Result, StorageError, ValidationError};
use crate::state::StateManager;
use crate::types::{Address, Block, OutPoint, TxOutput};

/// Snapshot of the UTXO set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoSnapshot {
    utxos: HashMap<OutPoint, TxOutput>,
}

/// Tracks the set of unspent transaction outputs.
///
/// Inputs carry the value and owner of the output they consume, so a block
/// can be reverted from its own contents alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoLedger {
    utxos: HashMap<OutPoint, TxOutput>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of unspent output values payable to the address.
    pub fn balance(&self, address: &Address) -> u64 {
        self.utxos.values().filter(|out| &out.owner == address).map(|out| out.value).sum()
    }

    /// Look up an unspent output.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.utxos.get(outpoint)
    }

    /// Number of unspent outputs.
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

impl StateManager for UtxoLedger {
    type Snapshot = UtxoSnapshot;

    fn snapshot(&self) -> Result<UtxoSnapshot> {
        Ok(UtxoSnapshot {
            utxos: self.utxos.clone(),
        })
    }

    fn restore(&mut self, snapshot: UtxoSnapshot) -> Result<()> {
        self.utxos = snapshot.utxos;
        Ok(())
    }

    fn apply_block(&mut self, block: &Block) -> Result<()> {
        for tx in &block.transactions {
            for input in &tx.inputs {
                let existing = self.utxos.get(&input.outpoint).ok_or_else(|| {
                    ValidationError::UnknownInput(input.outpoint.to_string())
                })?;
                if existing.value != input.value || existing.owner != input.owner {
                    return Err(ValidationError::InputMismatch(
                        input.outpoint.to_string(),
                    )
                    .into());
                }
                self.utxos.remove(&input.outpoint);
            }

            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                self.utxos.insert(
                    OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    output.clone(),
                );
            }
        }
        Ok(())
    }

    fn revert_block(&mut self, block: &Block) -> Result<()> {
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for vout in 0..tx.outputs.len() {
                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                };
                if self.utxos.remove(&outpoint).is_none() {
                    return Err(StorageError::InconsistentState(format!(
                        "output {} missing during revert",
                        outpoint
                    ))
                    .into());
                }
            }

            for input in tx.inputs.iter().rev() {
                let reinstated = TxOutput {
                    value: input.value,
                    owner: input.owner.clone(),
                };
                if self.utxos.insert(input.outpoint, reinstated).is_some() {
                    return Err(StorageError::InconsistentState(format!(
                        "input {} already unspent during revert",
                        input.outpoint
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use crate::test_utils::{block_with, genesis_header, header_extending, transfer_tx};
    use crate::types::{Transaction, TxPayload};

    fn funding_block() -> (Block, Transaction) {
        let funding = Transaction {
            sender: Address::system(),
            nonce: None,
            fee: 0,
            inputs: vec![],
            outputs: vec![TxOutput {
                value: 100,
                owner: Address::from("alice"),
            }],
            payload: TxPayload::Coinbase {
                height: 0,
            },
        };
        (block_with(genesis_header(), vec![funding.clone()]), funding)
    }

    #[test]
    fn test_apply_revert_round_trip() {
        let mut ledger = UtxoLedger::new();
        let (genesis, funding) = funding_block();
        ledger.apply_block(&genesis).unwrap();

        let before = ledger.clone();

        let tx = transfer_tx(&funding, 0, "alice", 0, "bob", 30);
        let block =
            block_with(header_extending(&genesis.header, 1), vec![tx]);

        ledger.apply_block(&block).unwrap();
        assert_eq!(ledger.balance(&Address::from("bob")), 30);
        assert_eq!(ledger.balance(&Address::from("alice")), 70);

        ledger.revert_block(&block).unwrap();
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_double_spend_rejected() {
        let mut ledger = UtxoLedger::new();
        let (genesis, funding) = funding_block();
        ledger.apply_block(&genesis).unwrap();

        let spend = transfer_tx(&funding, 0, "alice", 0, "bob", 100);
        let block1 =
            block_with(header_extending(&genesis.header, 1), vec![spend.clone()]);
        ledger.apply_block(&block1).unwrap();

        // Same outpoint again.
        let double = transfer_tx(&funding, 0, "alice", 1, "carol", 100);
        let block2 =
            block_with(header_extending(&block1.header, 2), vec![double]);
        let err = ledger.apply_block(&block2).unwrap_err();
        assert!(matches!(
            err,
            ChainError::Validation(ValidationError::UnknownInput(_))
        ));
    }

    #[test]
    fn test_input_mismatch_rejected() {
        let mut ledger = UtxoLedger::new();
        let (genesis, funding) = funding_block();
        ledger.apply_block(&genesis).unwrap();

        let mut tx = transfer_tx(&funding, 0, "alice", 0, "bob", 100);
        tx.inputs[0].value = 999;
        let block = block_with(header_extending(&genesis.header, 1), vec![tx]);
        let err = ledger.apply_block(&block).unwrap_err();
        assert!(matches!(
            err,
            ChainError::Validation(ValidationError::InputMismatch(_))
        ));
    }

    #[test]
    fn test_intra_block_spend_chain() {
        let mut ledger = UtxoLedger::new();
        let (genesis, funding) = funding_block();
        ledger.apply_block(&genesis).unwrap();

        // alice -> bob, then bob -> carol within the same block.
        let to_bob = transfer_tx(&funding, 0, "alice", 0, "bob", 100);
        let to_carol = transfer_tx(&to_bob, 0, "bob", 0, "carol", 100);
        let block = block_with(
            header_extending(&genesis.header, 1),
            vec![to_bob, to_carol],
        );

        let before = ledger.clone();
        ledger.apply_block(&block).unwrap();
        assert_eq!(ledger.balance(&Address::from("carol")), 100);

        ledger.revert_block(&block).unwrap();
        assert_eq!(ledger, before);
    }
}
