//! Fork detection logic for identifying competing chains.
//!
//! Incoming blocks either extend the canonical tip, extend a tracked fork,
//! create a new fork from a canonical ancestor, or connect to nothing we
//! know (orphan).

use std::collections::HashMap;

use crate::chain::work::{ChainWork, WorkCalculator};
use crate::error::{ValidationError, ValidationResult};
use crate::types::{BlockHash, BlockHeader, ChainState};

/// Represents a potential chain fork.
#[derive(Debug, Clone)]
pub struct Fork {
    /// The block hash where the fork diverges from the canonical chain.
    pub fork_point: BlockHash,
    /// The height of the fork point.
    pub fork_height: u64,
    /// The tip of the forked chain.
    pub tip_hash: BlockHash,
    /// The height of the fork tip.
    pub tip_height: u64,
    /// Headers in the fork, from fork point (exclusive) to tip, ascending.
    pub headers: Vec<BlockHeader>,
    /// Cumulative chain work of the fork headers.
    pub chain_work: ChainWork,
}

/// Result of fork detection for a header.
#[derive(Debug, Clone)]
pub enum ForkDetectionResult {
    /// Header extends the current canonical tip.
    ExtendsMainChain,
    /// Header extends an existing tracked fork.
    ExtendsFork(Fork),
    /// Header creates a new fork from the canonical chain.
    CreatesNewFork(Fork),
    /// Header doesn't connect to any known chain.
    Orphan,
}

/// Detects and tracks competing branches.
pub struct ForkDetector {
    /// Currently known forks indexed by their tip hash.
    forks: HashMap<BlockHash, Fork>,
    /// Maximum number of forks to track.
    max_forks: usize,
}

impl ForkDetector {
    pub fn new(max_forks: usize) -> Result<Self, &'static str> {
        if max_forks == 0 {
            return Err("max_forks must be greater than 0");
        }
        Ok(Self {
            forks: HashMap::new(),
            max_forks,
        })
    }

    /// Classify a header against the canonical chain and tracked forks.
    pub fn check_header(
        &mut self,
        header: &BlockHeader,
        chain_state: &ChainState,
        work: &mut WorkCalculator,
    ) -> ValidationResult<ForkDetectionResult> {
        let header_hash = header.block_hash();
        let prev_hash = header.previous_hash;

        if let Some(tip) = chain_state.tip_header() {
            tracing::trace!(
                "Checking main chain extension - prev_hash: {}, tip_hash: {}",
                prev_hash,
                tip.block_hash()
            );
            if prev_hash == tip.block_hash() {
                return Ok(ForkDetectionResult::ExtendsMainChain);
            }
        }

        // Extends a tracked fork whose tip matches our parent?
        let matching_fork = self
            .forks
            .iter()
            .find(|(_, fork)| fork.tip_hash == prev_hash)
            .map(|(_, fork)| fork.clone());

        if let Some(mut fork) = matching_fork {
            // Re-index under the new tip.
            self.forks.remove(&fork.tip_hash);

            fork.headers.push(*header);
            fork.tip_hash = header_hash;
            fork.tip_height += 1;
            fork.chain_work = fork.chain_work + work.block_work(header)?;

            let result_fork = fork.clone();
            self.forks.insert(header_hash, fork);

            return Ok(ForkDetectionResult::ExtendsFork(result_fork));
        }

        // Connects to a canonical ancestor: creates a new fork.
        if let Some(height) = chain_state.height_of(&prev_hash) {
            let fork = Fork {
                fork_point: prev_hash,
                fork_height: height,
                tip_hash: header_hash,
                tip_height: height + 1,
                headers: vec![*header],
                chain_work: work.block_work(header)?,
            };

            self.add_fork(fork.clone());
            return Ok(ForkDetectionResult::CreatesNewFork(fork));
        }

        Ok(ForkDetectionResult::Orphan)
    }

    /// Add a new fork to track.
    fn add_fork(&mut self, fork: Fork) {
        self.forks.insert(fork.tip_hash, fork);

        if self.forks.len() > self.max_forks {
            if let Some(weakest) = self.find_weakest_fork() {
                tracing::debug!("Evicting weakest tracked fork {}", weakest);
                self.forks.remove(&weakest);
            }
        }
    }

    /// Find the fork with the least cumulative work.
    fn find_weakest_fork(&self) -> Option<BlockHash> {
        self.forks.iter().min_by_key(|(_, fork)| &fork.chain_work).map(|(hash, _)| *hash)
    }

    /// Get all known forks.
    pub fn get_forks(&self) -> Vec<&Fork> {
        self.forks.values().collect()
    }

    /// Get a specific fork by its tip hash.
    pub fn get_fork(&self, tip_hash: &BlockHash) -> Option<&Fork> {
        self.forks.get(tip_hash)
    }

    /// Remove a fork (e.g., after it's been reorganized onto the chain).
    pub fn remove_fork(&mut self, tip_hash: &BlockHash) -> Option<Fork> {
        self.forks.remove(tip_hash)
    }

    /// Drop forks whose tips are at or below the given height.
    pub fn prune_below(&mut self, height: u64) {
        self.forks.retain(|_, fork| fork.tip_height > height);
    }

    /// Check if we have any forks.
    pub fn has_forks(&self) -> bool {
        !self.forks.is_empty()
    }

    /// Clear all forks.
    pub fn clear_forks(&mut self) {
        self.forks.clear();
    }
}

/// Locate the fork point between the canonical chain and a candidate branch.
///
/// Walks the candidate headers' parent links backwards, comparing hashes
/// against the canonical chain, within a bounded lookback window. Two chains
/// that share no ancestor within the window are treated as an attack or a
/// bug, not a normal case.
pub fn find_fork_point(
    chain_state: &ChainState,
    candidate_headers: &[BlockHeader],
    max_lookback: u64,
) -> ValidationResult<(BlockHash, u64)> {
    let first = candidate_headers.first().ok_or_else(|| {
        ValidationError::InvalidHeaderChain("candidate branch is empty".to_string())
    })?;
    let last = candidate_headers[candidate_headers.len() - 1];
    let old_tip = chain_state.tip_height().ok_or_else(|| {
        ValidationError::InvalidHeaderChain("canonical chain is empty".to_string())
    })?;

    let mut height = old_tip.min(last.height);
    let mut steps = 0u64;

    loop {
        // Hash the candidate chain has at `height`: one of its own headers,
        // or the anchor its earliest header points at.
        let candidate_hash = if height >= first.height {
            candidate_headers
                .get((height - first.height) as usize)
                .map(|h| h.block_hash())
        } else if height + 1 == first.height {
            Some(first.previous_hash)
        } else {
            None
        };

        let canonical_hash =
            chain_state.header_at_height(height).map(|h| h.block_hash());

        if let (Some(candidate), Some(canonical)) = (candidate_hash, canonical_hash) {
            if candidate == canonical {
                return Ok((candidate, height));
            }
        }

        if height == 0 || steps >= max_lookback || candidate_hash.is_none() {
            return Err(ValidationError::NoCommonAncestor(max_lookback));
        }
        height -= 1;
        steps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chain_of, genesis_header, header_extending};

    #[test]
    fn test_fork_detection() {
        let mut detector = ForkDetector::new(10).expect("Failed to create fork detector");
        let mut work = WorkCalculator::new(64);
        let mut chain_state = ChainState::new();

        let genesis = genesis_header();
        chain_state.add_header(genesis);

        // Header that extends the main chain.
        let header1 = header_extending(&genesis, 1);
        let result = detector.check_header(&header1, &chain_state, &mut work).unwrap();
        assert!(matches!(result, ForkDetectionResult::ExtendsMainChain));

        chain_state.add_header(header1);

        // Header that creates a fork from genesis.
        let fork_header = header_extending(&genesis, 2);
        let result = detector.check_header(&fork_header, &chain_state, &mut work).unwrap();

        match result {
            ForkDetectionResult::CreatesNewFork(fork) => {
                assert_eq!(fork.fork_point, genesis.block_hash());
                assert_eq!(fork.fork_height, 0);
                assert_eq!(fork.tip_height, 1);
                assert_eq!(fork.headers.len(), 1);
            }
            result => panic!("Expected CreatesNewFork, got {:?}", result),
        }

        // Header that extends the fork.
        let fork_header2 = header_extending(&fork_header, 3);
        let result = detector.check_header(&fork_header2, &chain_state, &mut work).unwrap();

        assert!(matches!(result, ForkDetectionResult::ExtendsFork(_)));
        assert_eq!(detector.get_forks().len(), 1);

        // Orphan header.
        let orphan = BlockHeader {
            previous_hash: BlockHash::from_bytes([0xee; 32]),
            ..header_extending(&genesis, 4)
        };
        let result = detector.check_header(&orphan, &chain_state, &mut work).unwrap();
        assert!(matches!(result, ForkDetectionResult::Orphan));
    }

    #[test]
    fn test_fork_limits() {
        let mut detector = ForkDetector::new(2).expect("Failed to create fork detector");
        let mut work = WorkCalculator::new(64);
        let mut chain_state = ChainState::new();

        let genesis = genesis_header();
        chain_state.add_header(genesis);
        chain_state.add_header(header_extending(&genesis, 1));

        // Create 3 forks from genesis, should only keep 2.
        for i in 0..3u64 {
            let fork_header = header_extending(&genesis, 100 + i);
            detector.check_header(&fork_header, &chain_state, &mut work).unwrap();
        }

        assert_eq!(detector.get_forks().len(), 2);
    }

    #[test]
    fn test_fork_detector_zero_max_forks() {
        let result = ForkDetector::new(0);
        assert!(result.is_err());
    }

    #[test]
    fn test_find_fork_point() {
        let headers = chain_of(4, 1);
        let mut chain_state = ChainState::new();
        for header in &headers {
            chain_state.add_header(*header);
        }

        // Branch diverging after height 1.
        let branch_first = header_extending(&headers[1], 77);
        let (hash, height) =
            find_fork_point(&chain_state, &[branch_first], 100).unwrap();
        assert_eq!(height, 1);
        assert_eq!(hash, headers[1].block_hash());

        // Unanchored branch.
        let stray = BlockHeader {
            previous_hash: BlockHash::from_bytes([0x11; 32]),
            ..branch_first
        };
        assert!(matches!(
            find_fork_point(&chain_state, &[stray], 100),
            Err(ValidationError::NoCommonAncestor(_))
        ));
    }
}
