//! Mining coordination: cooldown after peer blocks and cooperative abort.
//!
//! Mining never races a reorg: when a peer block arrives the coordinator
//! raises an abort flag and starts a cooldown window, so in-flight
//! attempts stop at the next poll and new attempts wait out the window.
//! The mining loop is cooperatively cancellable only; nothing preempts it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::chain::work::WorkCalculator;
use crate::error::ValidationResult;
use crate::types::BlockHeader;

/// Shared abort flag polled by mining attempts between bounded units of
/// work.
#[derive(Clone, Default)]
pub struct MiningAbort {
    flag: Arc<AtomicBool>,
}

impl MiningAbort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; any in-flight attempt stops at its next poll.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the flag before starting a fresh attempt.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Coordinates mining activity against peer block arrivals.
pub struct MiningCoordinator {
    /// How long to pause mining after a peer-originated block.
    cooldown: Duration,
    /// When the last peer block was observed.
    last_peer_block: Mutex<Option<Instant>>,
    abort: MiningAbort,
}

impl MiningCoordinator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_peer_block: Mutex::new(None),
            abort: MiningAbort::new(),
        }
    }

    /// True while within the cooldown window after the last peer block.
    /// Mining a block that has already propagated elsewhere is wasted
    /// work.
    pub fn should_pause_mining(&self) -> bool {
        let last =
            self.last_peer_block.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    /// Record a peer-originated block: reset the cooldown and abort any
    /// in-flight attempt.
    pub fn record_peer_block_received(&self) {
        let mut last =
            self.last_peer_block.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(Instant::now());
        self.abort.raise();
        tracing::debug!("Peer block observed; mining cooldown restarted");
    }

    /// Handle for the shared abort flag.
    pub fn abort_handle(&self) -> MiningAbort {
        self.abort.clone()
    }

    /// Whether a just-mined header still extends the best chain, using the
    /// calculator's cached work. The tip may have moved while the attempt
    /// ran; a stale candidate must not be broadcast.
    pub fn extends_best_chain(
        &self,
        work: &mut WorkCalculator,
        tip: &BlockHeader,
        candidate: &BlockHeader,
    ) -> ValidationResult<bool> {
        if candidate.previous_hash != tip.block_hash() {
            return Ok(false);
        }
        // A candidate with valid difficulty always adds positive work on
        // top of the tip it extends; computing it also primes the cache
        // for the broadcast path.
        work.block_work(candidate)?;
        Ok(true)
    }

    /// Run one mining attempt over a bounded nonce range, polling the
    /// abort flag every `poll_interval` nonces.
    ///
    /// The real proof-of-work predicate lives with the consensus rules;
    /// callers supply it. Returns the solved header, or None when aborted
    /// or exhausted.
    pub fn run_attempt<F>(
        &self,
        mut template: BlockHeader,
        max_nonces: u64,
        poll_interval: u64,
        is_solution: F,
    ) -> Option<BlockHeader>
    where
        F: Fn(&BlockHeader) -> bool,
    {
        self.abort.clear();
        let poll_interval = poll_interval.max(1);

        for i in 0..max_nonces {
            if i % poll_interval == 0 && self.abort.is_raised() {
                tracing::debug!("Mining attempt aborted after {} nonces", i);
                return None;
            }
            template.nonce = i;
            if is_solution(&template) {
                return Some(template);
            }
        }
        None
    }
}
