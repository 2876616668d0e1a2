//! Disk-backed block storage: one JSON file per block under
//! `<dir>/blocks/`, with the hash index rebuilt at open.
//!
//! Writes are synchronous and flushed before returning. The reorg
//! coordinator's durability ordering depends on a saved block actually
//! being on disk, so these writes are deliberately not offloaded to a
//! background task.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::storage::{check_linkage, BlockStore};
use crate::types::{Block, BlockHash};

/// Disk-backed block store.
pub struct DiskBlockStore {
    blocks_dir: PathBuf,
    hash_index: HashMap<BlockHash, u64>,
    heights: BTreeMap<u64, BlockHash>,
}

impl DiskBlockStore {
    /// Open the store rooted at `base_path`, rebuilding the hash index
    /// from the block files found on disk.
    pub fn open<P: Into<PathBuf>>(base_path: P) -> StorageResult<Self> {
        let blocks_dir = base_path.into().join("blocks");
        fs::create_dir_all(&blocks_dir).map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to create blocks directory: {}",
                e
            ))
        })?;

        let mut store = Self {
            blocks_dir,
            hash_index: HashMap::new(),
            heights: BTreeMap::new(),
        };

        for entry in fs::read_dir(&store.blocks_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(height) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            let block = store.read_block_file(height)?.ok_or_else(|| {
                StorageError::ReadFailed(format!(
                    "block file for height {} disappeared during open",
                    height
                ))
            })?;
            store.hash_index.insert(block.block_hash(), height);
            store.heights.insert(height, block.block_hash());
        }

        tracing::debug!(
            "Opened disk block store with {} blocks",
            store.heights.len()
        );
        Ok(store)
    }

    fn block_path(&self, height: u64) -> PathBuf {
        self.blocks_dir.join(format!("{:010}.json", height))
    }

    fn read_block_file(&self, height: u64) -> StorageResult<Option<Block>> {
        let path = self.block_path(height);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let block = serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!(
                "block file {} is unreadable: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(block))
    }

    fn write_block_file(&self, block: &Block) -> StorageResult<()> {
        let path = self.block_path(block.height());
        let json = serde_json::to_string_pretty(block)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &path)?;
        let dir_handle = OpenOptions::new().read(true).open(&self.blocks_dir)?;
        dir_handle.sync_all()?;
        Ok(())
    }
}

#[async_trait]
impl BlockStore for DiskBlockStore {
    async fn block_by_height(&self, height: u64) -> StorageResult<Option<Block>> {
        self.read_block_file(height)
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> StorageResult<Option<Block>> {
        let Some(height) = self.hash_index.get(hash) else {
            return Ok(None);
        };
        self.read_block_file(*height)
    }

    async fn save_block(&mut self, block: &Block) -> StorageResult<()> {
        let height = block.height();
        self.write_block_file(block)?;

        if let Some(replaced) = self.heights.insert(height, block.block_hash()) {
            self.hash_index.remove(&replaced);
        }
        self.hash_index.insert(block.block_hash(), height);
        Ok(())
    }

    async fn prune_above(&mut self, height: u64) -> StorageResult<()> {
        let stale: Vec<u64> =
            self.heights.range(height + 1..).map(|(h, _)| *h).collect();
        for h in stale {
            match fs::remove_file(self.block_path(h)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
            if let Some(hash) = self.heights.remove(&h) {
                self.hash_index.remove(&hash);
            }
        }
        Ok(())
    }

    async fn tip_height(&self) -> Option<u64> {
        self.heights.keys().next_back().copied()
    }

    async fn verify_integrity(&self) -> StorageResult<bool> {
        let mut blocks = Vec::with_capacity(self.heights.len());
        for height in self.heights.keys() {
            match self.read_block_file(*height)? {
                Some(block) => blocks.push(block),
                None => return Ok(false),
            }
        }
        Ok(check_linkage(&blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_chain;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persist_and_reopen() {
        let dir = TempDir::new().unwrap();
        let blocks = build_chain(3);

        {
            let mut store = DiskBlockStore::open(dir.path()).unwrap();
            for block in &blocks {
                store.save_block(block).await.unwrap();
            }
            assert!(store.verify_integrity().await.unwrap());
        }

        let store = DiskBlockStore::open(dir.path()).unwrap();
        assert_eq!(store.tip_height().await, Some(2));
        let loaded =
            store.block_by_hash(&blocks[1].block_hash()).await.unwrap().unwrap();
        assert_eq!(loaded, blocks[1]);
        assert!(store.verify_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_above_removes_files() {
        let dir = TempDir::new().unwrap();
        let blocks = build_chain(4);

        let mut store = DiskBlockStore::open(dir.path()).unwrap();
        for block in &blocks {
            store.save_block(block).await.unwrap();
        }

        store.prune_above(1).await.unwrap();
        assert_eq!(store.tip_height().await, Some(1));
        assert!(store.block_by_height(3).await.unwrap().is_none());

        // Pruning survives a reopen.
        drop(store);
        let store = DiskBlockStore::open(dir.path()).unwrap();
        assert_eq!(store.tip_height().await, Some(1));
    }

    #[tokio::test]
    async fn test_corrupt_block_file_detected() {
        let dir = TempDir::new().unwrap();
        let blocks = build_chain(2);

        let mut store = DiskBlockStore::open(dir.path()).unwrap();
        for block in &blocks {
            store.save_block(block).await.unwrap();
        }

        fs::write(store.block_path(1), b"garbage").unwrap();
        assert!(matches!(
            store.block_by_height(1).await,
            Err(StorageError::Corruption(_))
        ));
    }
}
