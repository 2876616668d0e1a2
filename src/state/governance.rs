//! Governance vote tally manager.
//!
//! Proposal business rules (quorums, thresholds, execution) live outside
//! this crate; the engine only keeps the per-proposal vote counts
//! consistent with the canonical chain, including retraction on reorg.

use std::collections::HashMap;

use crate::error::{Result, ValidationError};
use crate::state::StateManager;
use crate::types::{Block, TxPayload};

/// Vote counts for one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub approve: u64,
    pub reject: u64,
}

/// Snapshot of all governance tallies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernanceSnapshot {
    tallies: HashMap<String, Tally>,
}

/// Tracks vote tallies per governance proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GovernanceTallies {
    tallies: HashMap<String, Tally>,
}

impl GovernanceTallies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tally for a proposal.
    pub fn tally(&self, proposal: &str) -> Option<Tally> {
        self.tallies.get(proposal).copied()
    }
}

impl StateManager for GovernanceTallies {
    type Snapshot = GovernanceSnapshot;

    fn snapshot(&self) -> Result<GovernanceSnapshot> {
        Ok(GovernanceSnapshot {
            tallies: self.tallies.clone(),
        })
    }

    fn restore(&mut self, snapshot: GovernanceSnapshot) -> Result<()> {
        self.tallies = snapshot.tallies;
        Ok(())
    }

    fn apply_block(&mut self, block: &Block) -> Result<()> {
        for tx in &block.transactions {
            let TxPayload::GovernanceVote {
                proposal,
                approve,
            } = &tx.payload
            else {
                continue;
            };
            let tally = self.tallies.entry(proposal.clone()).or_default();
            if *approve {
                tally.approve += 1;
            } else {
                tally.reject += 1;
            }
        }
        Ok(())
    }

    fn revert_block(&mut self, block: &Block) -> Result<()> {
        for tx in block.transactions.iter().rev() {
            let TxPayload::GovernanceVote {
                proposal,
                approve,
            } = &tx.payload
            else {
                continue;
            };
            let Some(tally) = self.tallies.get_mut(proposal) else {
                return Err(ValidationError::TallyUnderflow(proposal.clone()).into());
            };
            let count = if *approve {
                &mut tally.approve
            } else {
                &mut tally.reject
            };
            if *count == 0 {
                return Err(ValidationError::TallyUnderflow(proposal.clone()).into());
            }
            *count -= 1;
            if tally.approve == 0 && tally.reject == 0 {
                self.tallies.remove(proposal);
            }
        }
        Ok(())
    }
}
