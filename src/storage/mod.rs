//! Block storage abstraction for the chain engine.
//!
//! The block store is read by many components concurrently but written
//! only by the reorg coordinator and the block-append path, both of which
//! hold the chain lock.

mod disk;
mod memory;

pub use disk::DiskBlockStore;
pub use memory::MemoryBlockStore;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::{Block, BlockHash};

/// Durable, append-friendly storage of blocks, addressable by height and
/// hash.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Load the block at the given height.
    async fn block_by_height(&self, height: u64) -> StorageResult<Option<Block>>;

    /// Load the block with the given hash.
    async fn block_by_hash(&self, hash: &BlockHash) -> StorageResult<Option<Block>>;

    /// Store a block at its height, replacing any block previously stored
    /// there.
    async fn save_block(&mut self, block: &Block) -> StorageResult<()>;

    /// Remove all blocks above the given height. Used when the canonical
    /// chain shrinks (a higher-work but shorter chain won).
    async fn prune_above(&mut self, height: u64) -> StorageResult<()>;

    /// Height of the highest stored block.
    async fn tip_height(&self) -> Option<u64>;

    /// Verify stored blocks form a well-linked chain with consistent
    /// hashes from genesis to the tip.
    async fn verify_integrity(&self) -> StorageResult<bool>;
}

/// Shared linkage walk used by both backends' integrity checks.
pub(crate) fn check_linkage(blocks: &[Block]) -> bool {
    for (i, block) in blocks.iter().enumerate() {
        if block.header.height != i as u64 {
            return false;
        }
        if block.header.merkle_root
            != crate::types::compute_merkle_root(&block.transactions)
        {
            return false;
        }
        if i > 0
            && block.header.previous_hash != blocks[i - 1].header.block_hash()
        {
            return false;
        }
    }
    true
}
