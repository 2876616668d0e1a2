//! In-memory block storage backend, used in tests and ephemeral nodes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::storage::{check_linkage, BlockStore};
use crate::types::{Block, BlockHash};

/// Memory-backed block store.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    by_height: BTreeMap<u64, Block>,
    hash_index: HashMap<BlockHash, u64>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.by_height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_height.is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn block_by_height(&self, height: u64) -> StorageResult<Option<Block>> {
        Ok(self.by_height.get(&height).cloned())
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> StorageResult<Option<Block>> {
        let Some(height) = self.hash_index.get(hash) else {
            return Ok(None);
        };
        Ok(self.by_height.get(height).cloned())
    }

    async fn save_block(&mut self, block: &Block) -> StorageResult<()> {
        let height = block.height();
        if let Some(replaced) = self.by_height.insert(height, block.clone()) {
            self.hash_index.remove(&replaced.block_hash());
        }
        self.hash_index.insert(block.block_hash(), height);
        Ok(())
    }

    async fn prune_above(&mut self, height: u64) -> StorageResult<()> {
        let stale: Vec<u64> =
            self.by_height.range(height + 1..).map(|(h, _)| *h).collect();
        for h in stale {
            if let Some(block) = self.by_height.remove(&h) {
                self.hash_index.remove(&block.block_hash());
            }
        }
        Ok(())
    }

    async fn tip_height(&self) -> Option<u64> {
        self.by_height.keys().next_back().copied()
    }

    async fn verify_integrity(&self) -> StorageResult<bool> {
        let blocks: Vec<Block> = self.by_height.values().cloned().collect();
        Ok(check_linkage(&blocks))
    }
}
