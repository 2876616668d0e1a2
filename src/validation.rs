//! Block-level consensus checks shared by the append path and the reorg
//! apply sub-phase.

use crate::chain::work::ChainWork;
use crate::error::{ValidationError, ValidationResult};
use crate::mempool::ordering::validate_ordering;
use crate::types::{compute_merkle_root, Block, BlockHash, BlockHeader};

/// Validate that `header` directly extends `prev`.
pub fn validate_header_linkage(
    header: &BlockHeader,
    prev: &BlockHeader,
) -> ValidationResult<()> {
    if header.height != prev.height + 1 {
        return Err(ValidationError::InvalidHeaderChain(format!(
            "height {} does not follow {}",
            header.height, prev.height
        )));
    }
    if header.previous_hash != prev.block_hash() {
        return Err(ValidationError::InvalidHeaderChain(format!(
            "previous hash mismatch at height {}",
            header.height
        )));
    }
    // Rejects difficulty 0 and unrepresentable difficulties outright.
    ChainWork::from_difficulty(header.difficulty)?;
    Ok(())
}

/// Validate a block body against its own header: merkle commitment and
/// transaction ordering rules.
pub fn validate_body(block: &Block) -> ValidationResult<()> {
    if block.header.merkle_root != compute_merkle_root(&block.transactions) {
        return Err(ValidationError::InvalidHeaderChain(format!(
            "merkle root mismatch at height {}",
            block.header.height
        )));
    }
    validate_ordering(&block.transactions)?;
    Ok(())
}

/// Full re-validation of a block during apply: linkage plus body.
pub fn validate_block(block: &Block, prev: &BlockHeader) -> ValidationResult<()> {
    validate_header_linkage(&block.header, prev)?;
    validate_body(block)
}

/// Validate a genesis block: height 0, no parent, consistent body.
pub fn validate_genesis(block: &Block) -> ValidationResult<()> {
    if block.header.height != 0 {
        return Err(ValidationError::InvalidHeaderChain(
            "genesis block must have height 0".to_string(),
        ));
    }
    if block.header.previous_hash != BlockHash::all_zeros() {
        return Err(ValidationError::InvalidHeaderChain(
            "genesis block must not reference a parent".to_string(),
        ));
    }
    ChainWork::from_difficulty(block.header.difficulty)?;
    validate_body(block)
}
