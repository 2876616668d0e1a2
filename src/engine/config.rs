//! Configuration for the chain engine.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the chain engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path for persistent state (WAL, nonce file, disk block store).
    pub data_dir: PathBuf,

    /// Maximum depth of reorganization to handle.
    pub max_reorg_depth: u64,

    /// Maximum number of competing forks to track.
    pub max_tracked_forks: usize,

    /// Maximum number of pending transactions to hold.
    pub max_mempool_transactions: usize,

    /// Bound on the per-block work cache.
    pub work_cache_size: usize,

    /// How long mining pauses after a peer-originated block arrives.
    pub mining_cooldown: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ember-chain-data"),
            max_reorg_depth: 100,
            max_tracked_forks: 16,
            max_mempool_transactions: 10_000,
            work_cache_size: 10_000,
            mining_cooldown: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn with_data_dir<P: Into<PathBuf>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_max_reorg_depth(mut self, depth: u64) -> Self {
        self.max_reorg_depth = depth;
        self
    }

    pub fn with_mining_cooldown(mut self, cooldown: Duration) -> Self {
        self.mining_cooldown = cooldown;
        self
    }

    /// Path of the reorganization WAL slot.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reorg.wal")
    }

    /// Path of the nonce persistence file.
    pub fn nonce_path(&self) -> PathBuf {
        self.data_dir.join("nonces.json")
    }
}
