//! Chain maintenance: fork choice, work accounting, reorganization and
//! crash recovery.
//!
//! This module decides which chain of blocks is authoritative:
//! - Chain work calculation and fork choice
//! - Fork detection and tracking
//! - Coordinated reorganization across the state managers
//! - Write-ahead logging for crash recovery

pub mod fork;
pub mod reorg;
pub mod wal;
pub mod work;


pub use fork::{find_fork_point, Fork, ForkDetectionResult, ForkDetector};
pub use reorg::{ReorgCoordinator, ReorgPhase, WalDisposition};
pub use wal::{WalEntry, WalStatus, WriteAheadLog};
pub use work::{ChainWork, WorkCalculator};
