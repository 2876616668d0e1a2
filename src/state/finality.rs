//! Finality certificate manager.
//!
//! A finality certificate records that a supermajority of validators
//! attest a block will not be reverted. The tracker keeps certificates
//! consistent with the canonical chain and vetoes reorganizations that
//! would cross a certified height, the same protection ChainLocks give
//! against deep reorgs.

use indexmap::IndexMap;

use crate::error::{Result, ValidationError};
use crate::state::StateManager;
use crate::types::{Block, BlockHash, TxPayload};

/// Default bound on the in-memory certificate cache.
const DEFAULT_MAX_CERTIFICATES: usize = 1000;

/// A registered finality certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// Height the certificate finalizes.
    pub height: u64,
    /// Hash of the finalized block.
    pub block_hash: BlockHash,
    /// Number of attesting validators.
    pub signers: u32,
    /// Block that carried the certificate onto the chain.
    pub registered_in: BlockHash,
}

/// Snapshot of the finality tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalitySnapshot {
    certificates: IndexMap<u64, CertificateEntry>,
}

/// Tracks finality certificates by certified height.
///
/// The cache is bounded; the lowest certified heights are evicted first.
/// Eviction only ever touches heights far below the reorg window, so
/// reverting a recent block never needs an evicted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityTracker {
    certificates: IndexMap<u64, CertificateEntry>,
    max_certificates: usize,
}

impl Default for FinalityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalityTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CERTIFICATES)
    }

    pub fn with_capacity(max_certificates: usize) -> Self {
        Self {
            certificates: IndexMap::new(),
            max_certificates: max_certificates.max(1),
        }
    }

    /// Highest certified height, if any certificate is registered.
    pub fn highest_certified(&self) -> Option<u64> {
        self.certificates.keys().max().copied()
    }

    /// Whether the given height carries a certificate.
    pub fn is_finalized(&self, height: u64) -> bool {
        self.certificates.contains_key(&height)
    }

    /// Certificate registered for a height.
    pub fn certificate_at(&self, height: u64) -> Option<&CertificateEntry> {
        self.certificates.get(&height)
    }

    /// A reorganization rolling back to `fork_height` would revert every
    /// block above it; if any of those blocks is certified the reorg must
    /// be refused. Returns the offending height.
    pub fn would_violate_finality(&self, fork_height: u64) -> Option<u64> {
        self.certificates.keys().filter(|h| **h > fork_height).min().copied()
    }

    fn trim(&mut self) {
        while self.certificates.len() > self.max_certificates {
            let Some(lowest) = self.certificates.keys().min().copied() else {
                break;
            };
            self.certificates.shift_remove(&lowest);
            tracing::debug!("Evicted finality certificate for height {}", lowest);
        }
    }
}

impl StateManager for FinalityTracker {
    type Snapshot = FinalitySnapshot;

    fn snapshot(&self) -> Result<FinalitySnapshot> {
        Ok(FinalitySnapshot {
            certificates: self.certificates.clone(),
        })
    }

    fn restore(&mut self, snapshot: FinalitySnapshot) -> Result<()> {
        self.certificates = snapshot.certificates;
        Ok(())
    }

    fn apply_block(&mut self, block: &Block) -> Result<()> {
        let registered_in = block.block_hash();
        for tx in &block.transactions {
            let TxPayload::FinalityCertificate {
                height,
                block_hash,
                signers,
            } = &tx.payload
            else {
                continue;
            };

            if let Some(existing) = self.certificates.get(height) {
                if existing.block_hash != *block_hash {
                    return Err(
                        ValidationError::ConflictingCertificate(*height).into()
                    );
                }
                // Re-attestation of the same block is a no-op.
                continue;
            }

            self.certificates.insert(
                *height,
                CertificateEntry {
                    height: *height,
                    block_hash: *block_hash,
                    signers: *signers,
                    registered_in,
                },
            );
        }
        self.trim();
        Ok(())
    }

    fn revert_block(&mut self, block: &Block) -> Result<()> {
        let block_hash = block.block_hash();
        self.certificates.retain(|_, entry| entry.registered_in != block_hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_with, cert_tx, genesis_header, header_extending};

    #[test]
    fn test_apply_revert_round_trip() {
        let mut tracker = FinalityTracker::new();
        let genesis = block_with(genesis_header(), vec![]);
        let finalized = BlockHash::from_bytes([7; 32]);

        let before = tracker.clone();
        let block = block_with(
            header_extending(&genesis.header, 1),
            vec![cert_tx(3, finalized, 67)],
        );

        tracker.apply_block(&block).unwrap();
        assert!(tracker.is_finalized(3));
        assert_eq!(tracker.highest_certified(), Some(3));

        tracker.revert_block(&block).unwrap();
        assert_eq!(tracker, before);
    }

    #[test]
    fn test_conflicting_certificate_rejected() {
        let mut tracker = FinalityTracker::new();
        let genesis = block_with(genesis_header(), vec![]);

        let block1 = block_with(
            header_extending(&genesis.header, 1),
            vec![cert_tx(3, BlockHash::from_bytes([7; 32]), 67)],
        );
        tracker.apply_block(&block1).unwrap();

        let block2 = block_with(
            header_extending(&block1.header, 2),
            vec![cert_tx(3, BlockHash::from_bytes([8; 32]), 67)],
        );
        let err = tracker.apply_block(&block2).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ChainError::Validation(
                ValidationError::ConflictingCertificate(3)
            )
        ));
    }

    #[test]
    fn test_finality_veto() {
        let mut tracker = FinalityTracker::new();
        let genesis = block_with(genesis_header(), vec![]);
        let block = block_with(
            header_extending(&genesis.header, 1),
            vec![cert_tx(5, BlockHash::from_bytes([7; 32]), 67)],
        );
        tracker.apply_block(&block).unwrap();

        // Rolling back to height 4 would revert certified height 5.
        assert_eq!(tracker.would_violate_finality(4), Some(5));
        assert_eq!(tracker.would_violate_finality(5), None);
        assert_eq!(tracker.would_violate_finality(6), None);
    }
}
