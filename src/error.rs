//! Error types for the Ember chain engine.

use std::io;
use thiserror::Error;

use crate::types::TxId;

/// Main error type for the chain engine.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Durability error: {0}")]
    Durability(#[from] DurabilityError),

    #[error("Sequencing error: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

/// Consensus-rule violations detected while validating or applying blocks.
///
/// Always recovered locally: the current apply or reorg is aborted and state
/// is restored from snapshot. Never corrupts persisted state.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid difficulty {0}: must be between 1 and 255")]
    InvalidDifficulty(u32),

    #[error("Invalid header chain: {0}")]
    InvalidHeaderChain(String),

    #[error("No common ancestor within {0} blocks")]
    NoCommonAncestor(u64),

    #[error("Unknown or already spent input: {0}")]
    UnknownInput(String),

    #[error("Output mismatch for input {0}")]
    InputMismatch(String),

    #[error("Bad nonce for {address}: expected {expected}, got {got}")]
    BadNonce {
        address: String,
        expected: u64,
        got: u64,
    },

    #[error("Invalid contract call: {0}")]
    ContractViolation(String),

    #[error("Inconsistent governance tally: {0}")]
    TallyUnderflow(String),

    #[error("Conflicting finality certificate at height {0}")]
    ConflictingCertificate(u64),

    #[error("Reorganization would cross finalized height {0}")]
    FinalityViolation(u64),

    #[error("Reorg depth {depth} exceeds maximum {max}")]
    ReorgTooDeep { depth: u64, max: u64 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Ordering error: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Block/header store failures.
///
/// Fatal to an in-flight reorg attempt (abort and roll back); non-fatal for
/// history queries, where the affected entry is skipped and logged.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Data not found: {0}")]
    NotFound(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Failures to make intent or state durable.
///
/// Always fatal to the operation in progress: the engine must not proceed to
/// mutate state after a failed flush, because recovery depends on intent
/// being on disk before action.
#[derive(Debug, Error)]
pub enum DurabilityError {
    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("Flush failed for {path}: {reason}")]
    FlushFailed { path: String, reason: String },

    #[error("State persistence failed: {0}")]
    PersistFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Nonce or ordering rules violated by a submitted transaction.
///
/// Rejected synchronously at the mempool boundary with a specific reason
/// code; never reaches the reorg coordinator.
#[derive(Debug, Error)]
pub enum SequencingError {
    #[error("Reward transaction must be the first entry")]
    CoinbaseNotFirst,

    #[error("More than one reward transaction in candidate block")]
    MultipleCoinbase,

    #[error("Reward transactions cannot be submitted to the mempool")]
    UnexpectedCoinbase,

    #[error("Duplicate transaction id: {0}")]
    DuplicateTxId(TxId),

    #[error("Nonces out of order for sender {0}")]
    NonceOutOfOrder(String),

    #[error("Repeated nonce for sender {0}")]
    NonceReused(String),

    #[error("Sender {0} mixes nonced and nonce-less transactions")]
    MixedNonceUsage(String),

    #[error("Fees out of order for sender {0}")]
    FeeOutOfOrder(String),

    #[error("Stale nonce for {address}: expected {expected}, got {got}")]
    StaleNonce {
        address: String,
        expected: u64,
        got: u64,
    },

    #[error("Mempool is full")]
    MempoolFull,
}

impl SequencingError {
    /// Returns a static string representing the rejection reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SequencingError::CoinbaseNotFirst
            | SequencingError::MultipleCoinbase
            | SequencingError::UnexpectedCoinbase => "coinbase",
            SequencingError::DuplicateTxId(_) => "duplicate",
            SequencingError::NonceOutOfOrder(_)
            | SequencingError::NonceReused(_)
            | SequencingError::MixedNonceUsage(_) => "nonce-order",
            SequencingError::FeeOutOfOrder(_) => "fee-order",
            SequencingError::StaleNonce {
                ..
            } => "stale-nonce",
            SequencingError::MempoolFull => "capacity",
        }
    }
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),
}

/// Type alias for Result with ChainError.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Type alias for validation operation results.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for durability operation results.
pub type DurabilityResult<T> = std::result::Result<T, DurabilityError>;

/// Type alias for sequencing operation results.
pub type SequencingResult<T> = std::result::Result<T, SequencingError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
