//! Per-address nonce (sequence number) tracking.
//!
//! Confirmed nonces only advance forward, except through the administrative
//! reset paths driven by the reorg coordinator. Every confirmed mutation is
//! durably persisted before the call returns; pending watermarks are
//! advisory, memory-only, and rebuilt from the mempool on restart.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use crate::error::{DurabilityError, DurabilityResult, Result, StorageError, StorageResult, ValidationError};
use crate::state::StateManager;
use crate::types::{Address, Block};

/// Nonce value meaning "never transacted".
const NEVER_TRANSACTED: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NonceInner {
    /// Highest confirmed nonce per address.
    confirmed: HashMap<Address, i64>,
    /// Watermark for mempool-accepted-but-unconfirmed transactions.
    pending: HashMap<Address, u64>,
}

impl NonceInner {
    fn confirmed_of(&self, address: &Address) -> i64 {
        self.confirmed.get(address).copied().unwrap_or(NEVER_TRANSACTED)
    }

    fn next_nonce(&self, address: &Address) -> u64 {
        let confirmed = self.confirmed_of(address);
        let pending =
            self.pending.get(address).map(|p| *p as i64).unwrap_or(NEVER_TRANSACTED);
        (confirmed.max(pending) + 1) as u64
    }
}

/// Snapshot of the nonce tracker's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceSnapshot {
    inner: NonceInner,
}

/// Tracks per-address confirmed and pending nonces.
///
/// Holds its own internal lock; it is a leaf lock, acquired only after the
/// chain and mempool locks when those are held.
pub struct NonceTracker {
    inner: RwLock<NonceInner>,
    path: Option<PathBuf>,
}

impl NonceTracker {
    /// Tracker with no persistence, for tests and ephemeral nodes.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(NonceInner::default()),
            path: None,
        }
    }

    /// Open a tracker backed by the given JSON file, loading any persisted
    /// confirmed nonces.
    pub fn open<P: Into<PathBuf>>(path: P) -> StorageResult<Self> {
        let path = path.into();
        let confirmed = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<HashMap<String, i64>>(&content)
                .map_err(|e| {
                    StorageError::Corruption(format!(
                        "nonce file {} is unreadable: {}",
                        path.display(),
                        e
                    ))
                })?
                .into_iter()
                .map(|(addr, nonce)| (Address(addr), nonce))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        Ok(Self {
            inner: RwLock::new(NonceInner {
                confirmed,
                pending: HashMap::new(),
            }),
            path: Some(path),
        })
    }

    /// Next valid nonce for the address: `max(confirmed, pending) + 1`.
    /// An untouched address starts at 0.
    pub fn next_nonce(&self, address: &Address) -> u64 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.next_nonce(address)
    }

    /// True iff `proposed` equals the next valid nonce right now.
    pub fn validate_nonce(&self, address: &Address, proposed: u64) -> bool {
        self.next_nonce(address) == proposed
    }

    /// Advance the pending watermark for mempool acceptance. No-op if the
    /// nonce does not advance the current watermark.
    pub fn reserve_nonce(&self, address: &Address, nonce: u64) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let watermark = inner.pending.get(address).copied();
        if watermark.map_or(true, |existing| nonce > existing) {
            inner.pending.insert(address.clone(), nonce);
        }
    }

    /// Record a confirmed nonce for the address: the given value, or
    /// `confirmed + 1` when omitted. Clears the pending watermark once it
    /// falls at or below the confirmed value. Durably persisted before
    /// returning.
    pub fn increment_nonce(
        &self,
        address: &Address,
        nonce: Option<u64>,
    ) -> DurabilityResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let confirmed = inner.confirmed_of(address);
        let new = match nonce {
            Some(n) => n as i64,
            None => confirmed + 1,
        };
        inner.confirmed.insert(address.clone(), new);
        let pending = inner.pending.get(address).copied();
        if pending.is_some_and(|p| (p as i64) <= new) {
            inner.pending.remove(address);
        }
        self.persist(&inner)
    }

    /// Administrative override used exclusively by the reorg coordinator's
    /// revert and rebuild paths. Never called from transaction processing.
    pub fn set_nonce(&self, address: &Address, nonce: i64) -> DurabilityResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if nonce <= NEVER_TRANSACTED {
            inner.confirmed.remove(address);
        } else {
            inner.confirmed.insert(address.clone(), nonce);
        }
        self.persist(&inner)
    }

    /// Administrative full reset, used only by the startup rebuild path.
    pub fn reset(&self) -> DurabilityResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.confirmed.clear();
        inner.pending.clear();
        self.persist(&inner)
    }

    /// Rewrite the persistence file wholesale and flush it. Pending state
    /// is advisory and deliberately not persisted.
    fn persist(&self, inner: &NonceInner) -> DurabilityResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let map: HashMap<&str, i64> =
            inner.confirmed.iter().map(|(addr, nonce)| (addr.0.as_str(), *nonce)).collect();
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| DurabilityError::PersistFailed(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all().map_err(|e| DurabilityError::FlushFailed {
            path: tmp_path.display().to_string(),
            reason: e.to_string(),
        })?;
        drop(tmp);

        fs::rename(&tmp_path, path)?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                let dir_handle = OpenOptions::new().read(true).open(dir)?;
                dir_handle.sync_all().map_err(|e| DurabilityError::FlushFailed {
                    path: dir.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

impl StateManager for NonceTracker {
    type Snapshot = NonceSnapshot;

    fn snapshot(&self) -> Result<NonceSnapshot> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(NonceSnapshot {
            inner: inner.clone(),
        })
    }

    fn restore(&mut self, snapshot: NonceSnapshot) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = snapshot.inner;
        self.persist(&inner)?;
        Ok(())
    }

    fn apply_block(&mut self, block: &Block) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for tx in &block.transactions {
            let Some(nonce) = tx.nonce else {
                continue;
            };
            let expected = (inner.confirmed_of(&tx.sender) + 1) as u64;
            if nonce != expected {
                return Err(ValidationError::BadNonce {
                    address: tx.sender.to_string(),
                    expected,
                    got: nonce,
                }
                .into());
            }
            inner.confirmed.insert(tx.sender.clone(), nonce as i64);
            let pending = inner.pending.get(&tx.sender).copied();
            if pending.is_some_and(|p| (p as i64) <= nonce as i64) {
                inner.pending.remove(&tx.sender);
            }
        }
        self.persist(&inner)?;
        Ok(())
    }

    fn revert_block(&mut self, block: &Block) -> Result<()> {
        // The lowest nonce a sender confirmed in this block tells us what
        // the confirmed value was before the block: exactly that nonce - 1.
        let mut lowest: HashMap<&Address, u64> = HashMap::new();
        for tx in &block.transactions {
            let Some(nonce) = tx.nonce else {
                continue;
            };
            lowest
                .entry(&tx.sender)
                .and_modify(|n| *n = (*n).min(nonce))
                .or_insert(nonce);
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (address, nonce) in lowest {
            let previous = nonce as i64 - 1;
            if previous <= NEVER_TRANSACTED {
                inner.confirmed.remove(address);
            } else {
                inner.confirmed.insert(address.clone(), previous);
            }
        }
        self.persist(&inner)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_with, genesis_header, header_extending, nonced_tx};
    use tempfile::TempDir;

    #[test]
    fn test_fresh_address_starts_at_zero() {
        let tracker = NonceTracker::in_memory();
        let alice = Address::from("X");

        assert_eq!(tracker.next_nonce(&alice), 0);
        assert!(tracker.validate_nonce(&alice, 0));

        tracker.increment_nonce(&alice, Some(0)).unwrap();
        assert_eq!(tracker.next_nonce(&alice), 1);
        assert!(!tracker.validate_nonce(&alice, 0));
        assert!(tracker.validate_nonce(&alice, 1));
    }

    #[test]
    fn test_pending_watermark() {
        let tracker = NonceTracker::in_memory();
        let alice = Address::from("alice");

        tracker.reserve_nonce(&alice, 0);
        tracker.reserve_nonce(&alice, 1);
        assert_eq!(tracker.next_nonce(&alice), 2);

        // Reserving below the watermark is a no-op.
        tracker.reserve_nonce(&alice, 0);
        assert_eq!(tracker.next_nonce(&alice), 2);

        // Confirmation at or past the watermark clears it.
        tracker.increment_nonce(&alice, Some(1)).unwrap();
        assert_eq!(tracker.next_nonce(&alice), 2);
    }

    #[test]
    fn test_increment_without_explicit_nonce() {
        let tracker = NonceTracker::in_memory();
        let alice = Address::from("alice");

        tracker.increment_nonce(&alice, None).unwrap();
        assert_eq!(tracker.next_nonce(&alice), 1);
        tracker.increment_nonce(&alice, None).unwrap();
        assert_eq!(tracker.next_nonce(&alice), 2);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonces.json");
        let alice = Address::from("alice");

        {
            let tracker = NonceTracker::open(&path).unwrap();
            tracker.increment_nonce(&alice, Some(0)).unwrap();
            tracker.increment_nonce(&alice, Some(1)).unwrap();
            tracker.reserve_nonce(&alice, 5);
        }

        let reopened = NonceTracker::open(&path).unwrap();
        // Confirmed state survives; the pending watermark does not.
        assert_eq!(reopened.next_nonce(&alice), 2);
    }

    #[test]
    fn test_apply_revert_round_trip() {
        let mut tracker = NonceTracker::in_memory();
        let alice = Address::from("alice");

        let genesis = block_with(genesis_header(), vec![]);
        let block = block_with(
            header_extending(&genesis.header, 1),
            vec![nonced_tx("alice", 0, 10), nonced_tx("alice", 1, 10)],
        );

        tracker.apply_block(&block).unwrap();
        assert_eq!(tracker.next_nonce(&alice), 2);

        tracker.revert_block(&block).unwrap();
        assert_eq!(tracker.next_nonce(&alice), 0);
    }

    #[test]
    fn test_nonce_gap_rejected() {
        let mut tracker = NonceTracker::in_memory();

        let genesis = block_with(genesis_header(), vec![]);
        let block = block_with(
            header_extending(&genesis.header, 1),
            vec![nonced_tx("alice", 1, 10)],
        );

        let err = tracker.apply_block(&block).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ChainError::Validation(ValidationError::BadNonce { .. })
        ));
    }
}
