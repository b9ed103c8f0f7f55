use crate::error::ChainError;

use super::block::Block;

/// Checks one block against its predecessor: recomputed hash, linkage and proof-of-work.
pub fn validate_successor(
    previous: &Block,
    block: &Block,
    difficulty: usize,
) -> Result<(), ChainError> {
    if block.index != previous.index + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block index. Expected {}, but got {}.",
            previous.index + 1,
            block.index
        )));
    }
    if !block.has_consistent_hash() {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block hash at index {}",
            block.index
        )));
    }
    if block.previous_hash != previous.hash {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid previous hash link at index {}. Expected {}, but got {}.",
            block.index, previous.hash, block.previous_hash
        )));
    }
    if !block.meets_difficulty(difficulty) {
        return Err(ChainError::InvalidBlock(format!(
            "Block {} does not satisfy proof-of-work (difficulty {})",
            block.index, difficulty
        )));
    }
    Ok(())
}

/// Validates every block from index 1 onwards. Genesis is trusted as-is; the
/// caller compares it against the local genesis.
pub fn validate_chain(blocks: &[Block], difficulty: usize) -> Result<(), ChainError> {
    if blocks.is_empty() {
        return Err(ChainError::ChainInvalid("Chain is empty".to_string()));
    }
    for pair in blocks.windows(2) {
        validate_successor(&pair[0], &pair[1], difficulty)
            .map_err(|e| ChainError::ChainInvalid(e.to_string()))?;
    }
    Ok(())
}
