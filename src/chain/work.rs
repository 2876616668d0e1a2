//! Chain work calculation for determining the best chain.
//!
//! Cumulative proof-of-work is the fork-choice metric: the chain with the
//! strictly greater cumulative work from the fork point forward wins.

use std::cmp::Ordering;
use std::ops::Add;

use indexmap::IndexMap;

use crate::error::{ValidationError, ValidationResult};
use crate::types::{BlockHash, BlockHeader};

/// Represents cumulative chain work as a 256-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWork {
    /// The work value as bytes in big-endian order.
    work: [u8; 32],
}

impl ChainWork {
    /// Create a new ChainWork with zero work.
    pub fn zero() -> Self {
        Self {
            work: [0u8; 32],
        }
    }

    /// Work contributed by a single block: `2^difficulty`.
    ///
    /// Difficulty 0 is invalid input and rejected, not coerced; difficulties
    /// of 256 or more cannot be represented in 256 bits and are likewise
    /// rejected.
    pub fn from_difficulty(difficulty: u32) -> ValidationResult<Self> {
        if difficulty == 0 || difficulty > 255 {
            return Err(ValidationError::InvalidDifficulty(difficulty));
        }
        let mut work = [0u8; 32];
        let bit = difficulty as usize;
        work[31 - bit / 8] = 1 << (bit % 8);
        Ok(Self {
            work,
        })
    }

    /// Add two ChainWork values.
    pub fn combine(self, other: Self) -> Self {
        let mut result = [0u8; 32];
        let mut carry = 0u16;

        // Add from least significant byte (right) to most significant (left).
        for i in (0..32).rev() {
            let sum = self.work[i] as u16 + other.work[i] as u16 + carry;
            result[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }

        Self {
            work: result,
        }
    }

    /// Get the work as a byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.work
    }

    /// Create from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            work: bytes,
        }
    }

    /// Check if this work is zero.
    pub fn is_zero(&self) -> bool {
        self.work.iter().all(|&b| b == 0)
    }
}

impl Ord for ChainWork {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare as big-endian integers.
        for i in 0..32 {
            match self.work[i].cmp(&other.work[i]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ChainWork {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for ChainWork {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for ChainWork {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.combine(other)
    }
}

/// Computes and memoizes per-block and cumulative chain work.
///
/// Per-block work is cached by block hash. Entries are never invalidated:
/// a header's difficulty is immutable once the header is finalized. The
/// cache is bounded; the oldest-inserted entry is evicted first.
pub struct WorkCalculator {
    cache: IndexMap<BlockHash, ChainWork>,
    max_cache_size: usize,
}

impl WorkCalculator {
    pub fn new(max_cache_size: usize) -> Self {
        Self {
            cache: IndexMap::new(),
            max_cache_size: max_cache_size.max(1),
        }
    }

    /// Work of a single header, memoized by block hash.
    pub fn block_work(&mut self, header: &BlockHeader) -> ValidationResult<ChainWork> {
        let hash = header.block_hash();
        if let Some(work) = self.cache.get(&hash) {
            return Ok(*work);
        }

        let work = ChainWork::from_difficulty(header.difficulty)?;
        if self.cache.len() >= self.max_cache_size {
            self.cache.shift_remove_index(0);
        }
        self.cache.insert(hash, work);
        Ok(work)
    }

    /// Cumulative work over a sequence of headers.
    pub fn chain_work(&mut self, headers: &[BlockHeader]) -> ValidationResult<ChainWork> {
        let mut total = ChainWork::zero();
        for header in headers {
            total = total + self.block_work(header)?;
        }
        Ok(total)
    }

    /// Number of cached per-block entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHash, MerkleRoot};

    fn test_header(difficulty: u32, nonce: u64) -> BlockHeader {
        BlockHeader {
            height: 0,
            previous_hash: BlockHash::all_zeros(),
            merkle_root: MerkleRoot::all_zeros(),
            timestamp: 0,
            difficulty,
            nonce,
            version: 1,
        }
    }

    #[test]
    fn test_work_from_difficulty() {
        let one = ChainWork::from_difficulty(1).unwrap();
        let two = ChainWork::from_difficulty(2).unwrap();
        assert!(two > one);
        assert!(!one.is_zero());

        // 2^1 = byte 31 holds 0b10.
        assert_eq!(one.as_bytes()[31], 2);
        // 2^8 = byte 30 holds 1.
        let eight = ChainWork::from_difficulty(8).unwrap();
        assert_eq!(eight.as_bytes()[30], 1);
        assert_eq!(eight.as_bytes()[31], 0);
    }

    #[test]
    fn test_zero_difficulty_rejected() {
        assert!(matches!(
            ChainWork::from_difficulty(0),
            Err(ValidationError::InvalidDifficulty(0))
        ));
        assert!(matches!(
            ChainWork::from_difficulty(256),
            Err(ValidationError::InvalidDifficulty(256))
        ));
    }

    #[test]
    fn test_chain_work_addition_carries() {
        let mut a = [0u8; 32];
        a[31] = 200;
        let mut b = [0u8; 32];
        b[31] = 100;

        let sum = ChainWork::from_bytes(a) + ChainWork::from_bytes(b);
        assert_eq!(sum.as_bytes()[31], 44); // 300 = 256 + 44
        assert_eq!(sum.as_bytes()[30], 1); // carry
    }

    #[test]
    fn test_chain_work_monotonic() {
        let mut calc = WorkCalculator::new(16);
        let headers: Vec<BlockHeader> =
            (0..5).map(|i| test_header(1 + i, i as u64)).collect();

        let mut previous = ChainWork::zero();
        for end in 1..=headers.len() {
            let total = calc.chain_work(&headers[..end]).unwrap();
            assert!(total > previous, "appending a block must increase work");
            previous = total;
        }
    }

    #[test]
    fn test_work_cache_memoizes_and_evicts() {
        let mut calc = WorkCalculator::new(2);
        let h1 = test_header(4, 1);
        let h2 = test_header(4, 2);
        let h3 = test_header(4, 3);

        let w1 = calc.block_work(&h1).unwrap();
        assert_eq!(calc.block_work(&h1).unwrap(), w1);
        assert_eq!(calc.cached_entries(), 1);

        calc.block_work(&h2).unwrap();
        calc.block_work(&h3).unwrap();
        assert_eq!(calc.cached_entries(), 2);
    }
}
