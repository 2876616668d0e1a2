//! Single-slot write-ahead log for in-flight reorganizations.
//!
//! The WAL records the *intent* of a reorganization before any state
//! manager is mutated. Its presence with an in-progress status at startup
//! signals an unclean shutdown mid-reorg; recovery then rebuilds state from
//! the persisted canonical chain rather than trusting any manager's on-disk
//! state.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{DurabilityError, DurabilityResult, StorageError, StorageResult};
use crate::types::BlockHash;

/// Lifecycle status of a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalStatus {
    InProgress,
    Committed,
    RolledBack,
}

/// The single durable record of a reorganization in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Record type tag; fixed for forward compatibility of the on-disk file.
    pub op: String,
    /// Canonical tip before the reorganization.
    pub old_tip: BlockHash,
    /// Tip of the chain being switched to.
    pub new_tip: BlockHash,
    /// Height of the common ancestor.
    pub fork_point: u64,
    /// Unix timestamp (seconds) when the entry was written.
    pub timestamp: u64,
    pub status: WalStatus,
}

/// Owns the WAL file. Exactly one entry may exist on disk at a time; only
/// the reorg coordinator reads or writes it.
pub struct WriteAheadLog {
    path: PathBuf,
}

impl WriteAheadLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a WAL file currently exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write a begin record with in-progress status and flush it to disk.
    ///
    /// The flush must complete before any block mutation begins: intent is
    /// recorded before it is carried out.
    pub fn begin(
        &self,
        old_tip: BlockHash,
        new_tip: BlockHash,
        fork_point: u64,
    ) -> DurabilityResult<WalEntry> {
        let entry = WalEntry {
            op: "REORG_BEGIN".to_string(),
            old_tip,
            new_tip,
            fork_point,
            timestamp: unix_timestamp(),
            status: WalStatus::InProgress,
        };
        self.write_durable(&entry)?;
        tracing::debug!(
            "WAL begin: old_tip={}, new_tip={}, fork_point={}",
            old_tip,
            new_tip,
            fork_point
        );
        Ok(entry)
    }

    /// Rewrite the entry with committed status, flushed.
    pub fn mark_committed(&self, entry: &WalEntry) -> DurabilityResult<()> {
        let mut updated = entry.clone();
        updated.status = WalStatus::Committed;
        self.write_durable(&updated)
    }

    /// Rewrite the entry with rolled-back status, flushed.
    pub fn mark_rolled_back(&self, entry: &WalEntry) -> DurabilityResult<()> {
        let mut updated = entry.clone();
        updated.status = WalStatus::RolledBack;
        self.write_durable(&updated)
    }

    /// Remove the WAL file. Missing file is not an error.
    pub fn remove(&self) -> DurabilityResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DurabilityError::Io(e)),
        }
    }

    /// Load the WAL entry, if a file exists.
    ///
    /// An unparseable file is reported as corruption; recovery treats it
    /// like an in-progress entry, since an unclean shutdown cannot be ruled
    /// out.
    pub fn load(&self) -> StorageResult<Option<WalEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let entry: WalEntry = serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!(
                "WAL file {} is unreadable: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(entry))
    }

    /// Serialize the entry and flush it all the way to disk: write to a
    /// temporary file, fsync, rename over the slot, fsync the directory.
    fn write_durable(&self, entry: &WalEntry) -> DurabilityResult<()> {
        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| DurabilityError::WalWrite(e.to_string()))?;

        let tmp_path = self.path.with_extension("wal.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all().map_err(|e| DurabilityError::FlushFailed {
            path: tmp_path.display().to_string(),
            reason: e.to_string(),
        })?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;

        if let Some(dir) = self.path.parent() {
            let dir_handle = OpenOptions::new().read(true).open(dir)?;
            dir_handle.sync_all().map_err(|e| DurabilityError::FlushFailed {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wal_in(dir: &TempDir) -> WriteAheadLog {
        WriteAheadLog::new(dir.path().join("reorg.wal"))
    }

    #[test]
    fn test_begin_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let wal = wal_in(&dir);
        assert!(!wal.exists());
        assert!(wal.load().unwrap().is_none());

        let entry = wal
            .begin(BlockHash::from_bytes([1; 32]), BlockHash::from_bytes([2; 32]), 5)
            .unwrap();
        assert!(wal.exists());
        assert_eq!(entry.status, WalStatus::InProgress);
        assert_eq!(entry.op, "REORG_BEGIN");

        let loaded = wal.load().unwrap().unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn test_status_transitions() {
        let dir = TempDir::new().unwrap();
        let wal = wal_in(&dir);

        let entry = wal
            .begin(BlockHash::from_bytes([1; 32]), BlockHash::from_bytes([2; 32]), 5)
            .unwrap();

        wal.mark_committed(&entry).unwrap();
        assert_eq!(wal.load().unwrap().unwrap().status, WalStatus::Committed);

        wal.mark_rolled_back(&entry).unwrap();
        assert_eq!(wal.load().unwrap().unwrap().status, WalStatus::RolledBack);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let wal = wal_in(&dir);

        wal.remove().unwrap();

        wal.begin(BlockHash::from_bytes([1; 32]), BlockHash::from_bytes([2; 32]), 0)
            .unwrap();
        wal.remove().unwrap();
        assert!(!wal.exists());
        wal.remove().unwrap();
    }

    #[test]
    fn test_corrupt_wal_reported() {
        let dir = TempDir::new().unwrap();
        let wal = wal_in(&dir);

        fs::write(wal.path(), b"not json").unwrap();
        assert!(matches!(wal.load(), Err(StorageError::Corruption(_))));
    }
}
