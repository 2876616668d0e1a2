//! Chain reorganization coordination.
//!
//! The coordinator orchestrates fork-point discovery, snapshotting,
//! rollback and reapplication across every state manager, and the WAL
//! lifecycle. All of it runs while the caller holds the chain lock; a
//! begun reorganization always runs to completion, success or rollback,
//! because partial completion would violate atomicity.

use crate::chain::fork::{find_fork_point, Fork};
use crate::chain::wal::{WalStatus, WriteAheadLog};
use crate::chain::work::WorkCalculator;
use crate::error::{ChainError, Result, StorageError, ValidationError};
use crate::state::StateManagerSet;
use crate::storage::BlockStore;
use crate::types::{Block, ChainState, ReorgEvent, ReorgOutcome};
use crate::validation::validate_block;

/// Phases of the reorganization state machine.
///
/// `Idle -> ForkDetected -> Snapshotting -> RollingBack -> Applying ->
/// Committing -> Idle`, with an error edge from any non-idle phase to
/// `Restoring -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgPhase {
    Idle,
    ForkDetected,
    Snapshotting,
    RollingBack,
    Applying,
    Committing,
    Restoring,
}

/// What startup found in the WAL slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalDisposition {
    /// No WAL, or a stale committed/rolled-back record: nothing to do.
    Clean,
    /// An in-progress (or unreadable) record: the node went down mid-reorg
    /// and every manager must be rebuilt from the persisted chain.
    RebuildRequired,
}

/// Orchestrates fork detection follow-up, snapshotting, rollback,
/// reapplication, and the WAL lifecycle. Owns the WAL exclusively.
pub struct ReorgCoordinator {
    wal: WriteAheadLog,
    max_reorg_depth: u64,
    phase: ReorgPhase,
}

impl ReorgCoordinator {
    pub fn new(wal: WriteAheadLog, max_reorg_depth: u64) -> Self {
        Self {
            wal,
            max_reorg_depth,
            phase: ReorgPhase::Idle,
        }
    }

    /// Current phase, for observability.
    pub fn phase(&self) -> ReorgPhase {
        self.phase
    }

    fn set_phase(&mut self, next: ReorgPhase) {
        tracing::debug!("Reorg phase: {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Inspect the WAL slot at node startup and clear it.
    ///
    /// An in-progress record means no manager's on-disk state can be
    /// trusted to reflect either the fully-old or fully-new chain; the WAL
    /// records intent, not a diff, so the only safe action is a rebuild
    /// from the persisted canonical chain. Stale records are simply
    /// deleted.
    pub fn startup_wal_disposition(&self) -> Result<WalDisposition> {
        let disposition = match self.wal.load() {
            Ok(None) => return Ok(WalDisposition::Clean),
            Ok(Some(entry)) => match entry.status {
                WalStatus::InProgress => {
                    tracing::warn!(
                        "Unclean shutdown mid-reorg detected (old_tip={}, new_tip={}); \
                         forcing state rebuild",
                        entry.old_tip,
                        entry.new_tip
                    );
                    WalDisposition::RebuildRequired
                }
                WalStatus::Committed | WalStatus::RolledBack => {
                    tracing::info!("Removing stale WAL record ({:?})", entry.status);
                    WalDisposition::Clean
                }
            },
            Err(StorageError::Corruption(msg)) => {
                // An unreadable WAL cannot rule out an unclean shutdown.
                tracing::warn!("Corrupt WAL ({}); forcing state rebuild", msg);
                WalDisposition::RebuildRequired
            }
            Err(e) => return Err(e.into()),
        };
        self.wal.remove()?;
        Ok(disposition)
    }

    /// Attempt to reorganize onto `fork`, whose full blocks are supplied in
    /// ascending order in `new_blocks`.
    ///
    /// Expected failures (less work, too deep, finality veto, invalid
    /// block, missing stored block) come back as
    /// [`ReorgOutcome::Rejected`] with the old tip still canonical. Only
    /// durability faults and unrecoverable restore failures surface as
    /// errors.
    pub async fn execute<S: BlockStore>(
        &mut self,
        store: &mut S,
        chain_state: &mut ChainState,
        managers: &mut StateManagerSet,
        work: &mut WorkCalculator,
        fork: &Fork,
        new_blocks: &[Block],
    ) -> Result<ReorgOutcome> {
        let old_tip_height = chain_state.tip_height().ok_or_else(|| {
            ChainError::Validation(ValidationError::InvalidHeaderChain(
                "cannot reorganize an empty chain".to_string(),
            ))
        })?;
        let old_tip = chain_state.tip_hash().ok_or_else(|| {
            ChainError::Storage(StorageError::InconsistentState(
                "chain has a height but no tip".to_string(),
            ))
        })?;

        let rejected = |reason: String| {
            tracing::info!("Reorg rejected: {}", reason);
            Ok(ReorgOutcome::Rejected {
                old_tip,
                reason,
            })
        };

        self.set_phase(ReorgPhase::ForkDetected);

        if new_blocks.len() != fork.headers.len()
            || new_blocks
                .iter()
                .zip(&fork.headers)
                .any(|(block, header)| block.block_hash() != header.block_hash())
        {
            self.set_phase(ReorgPhase::Idle);
            return rejected("candidate blocks do not match fork headers".to_string());
        }

        // Fork-point discovery: walk both chains backward comparing hashes.
        let (fork_point_hash, fork_height) =
            match find_fork_point(chain_state, &fork.headers, self.max_reorg_depth) {
                Ok(found) => found,
                Err(e) => {
                    self.set_phase(ReorgPhase::Idle);
                    return rejected(e.to_string());
                }
            };

        let depth = old_tip_height - fork_height;
        if depth > self.max_reorg_depth {
            self.set_phase(ReorgPhase::Idle);
            return rejected(
                ValidationError::ReorgTooDeep {
                    depth,
                    max: self.max_reorg_depth,
                }
                .to_string(),
            );
        }

        if let Some(height) = managers.finality.would_violate_finality(fork_height) {
            self.set_phase(ReorgPhase::Idle);
            return rejected(ValidationError::FinalityViolation(height).to_string());
        }

        // Fork choice: strictly greater cumulative work from the fork point
        // forward. Ties keep the first-seen (incumbent) chain.
        let old_work = work.chain_work(chain_state.headers_above(fork_height))?;
        let new_work = work.chain_work(&fork.headers)?;
        if new_work <= old_work {
            self.set_phase(ReorgPhase::Idle);
            return rejected(format!(
                "candidate chain does not exceed current work at fork height {}",
                fork_height
            ));
        }

        let new_tip = fork.tip_hash;
        tracing::info!(
            "Reorganizing: old_tip={} (height {}), new_tip={} (height {}), fork_point={}",
            old_tip,
            old_tip_height,
            new_tip,
            fork.tip_height,
            fork_height
        );

        // Snapshot every manager before any mutation; a failure here is a
        // safe no-op.
        self.set_phase(ReorgPhase::Snapshotting);
        let snapshots = match managers.snapshot_all() {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.set_phase(ReorgPhase::Idle);
                return rejected(format!("snapshot failed: {}", e));
            }
        };
        let chain_snapshot = chain_state.clone();

        // Record intent durably before carrying it out. A flush failure
        // halts the reorg with no state touched.
        let wal_entry = self.wal.begin(old_tip, new_tip, fork_height)?;

        // Roll back from the old tip down to the fork point, reverting
        // every manager per block.
        self.set_phase(ReorgPhase::RollingBack);
        let mut disconnected: Vec<Block> = Vec::with_capacity(depth as usize);
        let mut failure: Option<ChainError> = None;

        for height in ((fork_height + 1)..=old_tip_height).rev() {
            let block = match store.block_by_height(height).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    failure = Some(
                        StorageError::NotFound(format!(
                            "block at height {} missing during rollback",
                            height
                        ))
                        .into(),
                    );
                    break;
                }
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            };
            if let Err(e) = managers.revert_block(&block) {
                failure = Some(e);
                break;
            }
            chain_state.remove_tip();
            disconnected.push(block);
        }

        // Re-validate and apply the new chain from the fork point up.
        if failure.is_none() {
            self.set_phase(ReorgPhase::Applying);
            match chain_state.header_at_height(fork_height).copied() {
                Some(fork_point_header) => {
                    let mut prev = fork_point_header;
                    for block in new_blocks {
                        if let Err(e) = validate_block(block, &prev) {
                            failure = Some(e.into());
                            break;
                        }
                        if let Err(e) = managers.apply_block(block) {
                            failure = Some(e);
                            break;
                        }
                        if let Err(e) = store.save_block(block).await {
                            failure = Some(e.into());
                            break;
                        }
                        chain_state.add_header(block.header);
                        prev = block.header;
                    }
                }
                None => {
                    failure = Some(
                        StorageError::InconsistentState(format!(
                            "fork point header at height {} missing after rollback",
                            fork_height
                        ))
                        .into(),
                    );
                }
            }
        }

        if let Some(error) = failure {
            return self
                .abort_and_restore(
                    store,
                    chain_state,
                    managers,
                    snapshots,
                    chain_snapshot,
                    &disconnected,
                    old_tip_height,
                    &wal_entry,
                    error,
                )
                .await;
        }

        // The winning chain may be shorter than the one it replaces.
        let new_tip_height = fork.tip_height;
        if new_tip_height < old_tip_height {
            if let Err(e) = store.prune_above(new_tip_height).await {
                return self
                    .abort_and_restore(
                        store,
                        chain_state,
                        managers,
                        snapshots,
                        chain_snapshot,
                        &disconnected,
                        old_tip_height,
                        &wal_entry,
                        e.into(),
                    )
                    .await;
            }
        }

        self.set_phase(ReorgPhase::Committing);
        self.wal.mark_committed(&wal_entry)?;
        self.wal.remove()?;
        self.set_phase(ReorgPhase::Idle);

        let event = ReorgEvent {
            common_ancestor: fork_point_hash,
            common_height: fork_height,
            disconnected: disconnected.iter().map(|b| b.header).collect(),
            connected: new_blocks.iter().map(|b| b.header).collect(),
            affected_transactions: disconnected
                .iter()
                .flat_map(|b| b.transactions.iter())
                .filter(|tx| !tx.is_coinbase())
                .cloned()
                .collect(),
        };
        tracing::info!(
            "Reorg complete: {} blocks disconnected, {} connected, new tip {}",
            event.disconnected.len(),
            event.connected.len(),
            new_tip
        );
        Ok(ReorgOutcome::Completed {
            event,
        })
    }

    /// Undo a failed reorganization: restore every manager from its
    /// snapshot, repair the block store, and mark the WAL rolled back. The
    /// old tip remains canonical.
    #[allow(clippy::too_many_arguments)]
    async fn abort_and_restore<S: BlockStore>(
        &mut self,
        store: &mut S,
        chain_state: &mut ChainState,
        managers: &mut StateManagerSet,
        snapshots: crate::state::StateSnapshotSet,
        chain_snapshot: ChainState,
        disconnected: &[Block],
        old_tip_height: u64,
        wal_entry: &crate::chain::wal::WalEntry,
        error: ChainError,
    ) -> Result<ReorgOutcome> {
        self.set_phase(ReorgPhase::Restoring);
        tracing::warn!("Reorg failed ({}); restoring pre-reorg state", error);

        managers.restore_all(snapshots)?;
        *chain_state = chain_snapshot;

        // Put back any canonical blocks the apply sub-phase overwrote and
        // drop any stored above the restored tip.
        for block in disconnected.iter().rev() {
            store.save_block(block).await?;
        }
        store.prune_above(old_tip_height).await?;

        self.wal.mark_rolled_back(wal_entry)?;
        self.wal.remove()?;
        self.set_phase(ReorgPhase::Idle);

        match error {
            // Expected, locally recovered outcomes: report structured
            // rejection with the old tip retained.
            ChainError::Validation(_) | ChainError::Storage(_) | ChainError::Sequencing(_) => {
                Ok(ReorgOutcome::Rejected {
                    old_tip: chain_state.tip_hash().ok_or_else(|| {
                        StorageError::InconsistentState(
                            "restored chain is empty".to_string(),
                        )
                    })?,
                    reason: error.to_string(),
                })
            }
            // Durability and other faults stay fatal even though state was
            // restored.
            other => Err(other),
        }
    }
}
