//! Ember canonical-chain maintenance engine.
//!
//! This library implements the subsystem of an Ember node that decides
//! which chain of blocks is authoritative and keeps every consensus ledger
//! consistent with it:
//!
//! - Score competing chains by cumulative proof-of-work and pick the best
//! - Reorganize atomically across the UTXO ledger, nonce tracker, contract
//!   storage, governance tallies and finality certificates
//! - Survive crashes mid-reorganization via a write-ahead log
//! - Enforce deterministic, reordering-resistant mempool transaction order
//! - Serve indexed per-address transaction history
//!
//! # Quick Start
//!
//! ```no_run
//! use ember_chain::{ChainEngine, EngineConfig};
//! use ember_chain::state::NonceTracker;
//! use ember_chain::storage::DiskBlockStore;
//! use ember_chain::types::{Address, Block, BlockHeader, MerkleRoot, BlockHash};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default().with_data_dir("./.ember");
//!
//!     let genesis = Block {
//!         header: BlockHeader {
//!             height: 0,
//!             previous_hash: BlockHash::all_zeros(),
//!             merkle_root: MerkleRoot::all_zeros(),
//!             timestamp: 1_700_000_000,
//!             difficulty: 16,
//!             nonce: 0,
//!             version: 1,
//!         },
//!         transactions: vec![],
//!     };
//!
//!     let store = DiskBlockStore::open(&config.data_dir)?;
//!     let nonces = NonceTracker::open(config.nonce_path())?;
//!     let engine = ChainEngine::open(config, store, nonces, genesis).await?;
//!
//!     let tip = engine.tip().await;
//!     println!("chain tip: {:?}", tip);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! A single chain lock serializes block append, the entire reorganization
//! path, and multi-manager reads; the mempool has its own lock, always
//! acquired after the chain lock; the nonce tracker's internal lock is a
//! leaf. Durability-critical writes (WAL, nonce file) are synchronous and
//! flushed in place, because recovery correctness depends on intent being
//! on disk before effects.

#[cfg(test)]
pub mod test_utils;

pub mod chain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mempool;
pub mod mining;
pub mod query;
pub mod state;
pub mod storage;
pub mod types;
pub mod validation;

// Re-export main types for convenience.
pub use chain::{
    ChainWork, Fork, ForkDetectionResult, ForkDetector, ReorgCoordinator, ReorgPhase,
    WalDisposition, WalEntry, WalStatus, WorkCalculator, WriteAheadLog,
};
pub use engine::{BlockIntake, ChainEngine, EngineConfig};
pub use error::{
    ChainError, DurabilityError, LoggingError, SequencingError, StorageError,
    ValidationError,
};
pub use logging::{
    init_console_logging, init_logging, LogFileConfig, LoggingConfig, LoggingGuard,
};
pub use mempool::{canonicalize, validate_ordering, Mempool};
pub use mining::{MiningAbort, MiningCoordinator};
pub use query::{AddressTxIndexEntry, TransactionQueryManager};
pub use tracing::level_filters::LevelFilter;
pub use types::{ReorgEvent, ReorgOutcome};

/// Current version of the ember-chain library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
