//! Consensus state managers and the snapshot/restore contract.
//!
//! Each manager owns one slice of consensus state. The reorg coordinator
//! never reaches into manager internals; it only drives the
//! [`StateManager`] contract: snapshot before mutating, apply forward,
//! revert backward, restore on failure.

pub mod contracts;
pub mod finality;
pub mod governance;
pub mod nonce;
pub mod utxo;

pub use contracts::{ContractSnapshot, ContractStore};
pub use finality::{FinalitySnapshot, FinalityTracker};
pub use governance::{GovernanceSnapshot, GovernanceTallies};
pub use nonce::{NonceSnapshot, NonceTracker};
pub use utxo::{UtxoLedger, UtxoSnapshot};

use crate::error::Result;
use crate::types::Block;

/// Contract every state manager implements, polymorphic over the slice of
/// state it tracks.
pub trait StateManager {
    /// Typed capture of the manager's full mutable state.
    type Snapshot;

    /// Capture current state. Cost is proportional to live state, not
    /// history.
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Replace current state exactly with the captured state. Idempotent;
    /// applies fully or not at all.
    fn restore(&mut self, snapshot: Self::Snapshot) -> Result<()>;

    /// Mutate state forward for one block. Fails with a validation error if
    /// the block's effects are inconsistent with current state.
    fn apply_block(&mut self, block: &Block) -> Result<()>;

    /// Mutate state backward for one block; the inverse of `apply_block`
    /// for the same block. `revert_block` after `apply_block` restores the
    /// manager to its pre-apply state exactly.
    fn revert_block(&mut self, block: &Block) -> Result<()>;
}

/// Snapshots of every registered manager, typed per manager kind so a
/// snapshot can only ever be restored into the manager it was taken from.
pub struct StateSnapshotSet {
    pub utxo: UtxoSnapshot,
    pub nonce: NonceSnapshot,
    pub contracts: ContractSnapshot,
    pub governance: GovernanceSnapshot,
    pub finality: FinalitySnapshot,
}

/// The full set of registered state managers.
///
/// Apply order is fixed: utxo, nonce, contracts, governance, finality.
/// Revert order is the exact reverse. The managers own disjoint state
/// slices and carry no cross-manager invariants, so the order is a
/// documented convention rather than a correctness requirement.
pub struct StateManagerSet {
    pub utxo: UtxoLedger,
    pub nonces: NonceTracker,
    pub contracts: ContractStore,
    pub governance: GovernanceTallies,
    pub finality: FinalityTracker,
}

impl StateManagerSet {
    pub fn new(nonces: NonceTracker) -> Self {
        Self {
            utxo: UtxoLedger::new(),
            nonces,
            contracts: ContractStore::new(),
            governance: GovernanceTallies::new(),
            finality: FinalityTracker::new(),
        }
    }

    /// Snapshot every manager, in apply order, before any mutation begins.
    pub fn snapshot_all(&self) -> Result<StateSnapshotSet> {
        Ok(StateSnapshotSet {
            utxo: self.utxo.snapshot()?,
            nonce: self.nonces.snapshot()?,
            contracts: self.contracts.snapshot()?,
            governance: self.governance.snapshot()?,
            finality: self.finality.snapshot()?,
        })
    }

    /// Restore every manager from its snapshot.
    pub fn restore_all(&mut self, snapshots: StateSnapshotSet) -> Result<()> {
        self.utxo.restore(snapshots.utxo)?;
        self.nonces.restore(snapshots.nonce)?;
        self.contracts.restore(snapshots.contracts)?;
        self.governance.restore(snapshots.governance)?;
        self.finality.restore(snapshots.finality)?;
        Ok(())
    }

    /// Apply one block to every manager, in the fixed order.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        self.utxo.apply_block(block)?;
        self.nonces.apply_block(block)?;
        self.contracts.apply_block(block)?;
        self.governance.apply_block(block)?;
        self.finality.apply_block(block)?;
        Ok(())
    }

    /// Revert one block in every manager, in reverse apply order.
    pub fn revert_block(&mut self, block: &Block) -> Result<()> {
        self.finality.revert_block(block)?;
        self.governance.revert_block(block)?;
        self.contracts.revert_block(block)?;
        self.nonces.revert_block(block)?;
        self.utxo.revert_block(block)?;
        Ok(())
    }

    /// Clear every manager back to genesis-empty state. Used only by the
    /// startup rebuild path.
    pub fn reset_all(&mut self) -> Result<()> {
        self.utxo = UtxoLedger::new();
        self.nonces.reset()?;
        self.contracts = ContractStore::new();
        self.governance = GovernanceTallies::new();
        self.finality = FinalityTracker::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_with, genesis_header, transfer_tx};
    use crate::types::{Address, TxOutput, TxPayload};

    #[test]
    fn test_set_round_trip_across_managers() {
        let mut managers = StateManagerSet::new(NonceTracker::in_memory());

        // Seed a spendable output.
        let funding = crate::types::Transaction {
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
        let genesis = block_with(genesis_header(), vec![funding.clone()]);
        managers.apply_block(&genesis).unwrap();

        let before = managers.snapshot_all().unwrap();

        let tx = transfer_tx(&funding, 0, "alice", 0, "bob", 40);
        let block = block_with(
            crate::test_utils::header_extending(&genesis.header, 1),
            vec![tx],
        );

        managers.apply_block(&block).unwrap();
        assert_eq!(managers.utxo.balance(&Address::from("bob")), 40);

        managers.revert_block(&block).unwrap();
        assert_eq!(managers.utxo.balance(&Address::from("bob")), 0);
        assert_eq!(managers.utxo.balance(&Address::from("alice")), 100);

        // Restoring the pre-block snapshot is a no-op after a clean revert.
        managers.restore_all(before).unwrap();
        assert_eq!(managers.utxo.balance(&Address::from("alice")), 100);
        assert_eq!(managers.nonces.next_nonce(&Address::from("alice")), 0);
    }
}
