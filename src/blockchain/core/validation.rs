use crate::blockchain::core::chain::{Block, BlockHeader};
use crate::error::SyncError;
use alloy_primitives::U256;
use std::collections::HashSet;

/// Header and block validity checks supplied by the consensus layer.
pub trait BlockValidator: Send + Sync {
    fn validate_header(&self, header: &BlockHeader) -> Result<(), SyncError>;
    fn validate_block(&self, block: &Block) -> Result<(), SyncError>;
}

/// Accepts everything. Used when validation happens elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysValid;

impl BlockValidator for AlwaysValid {
    fn validate_header(&self, _header: &BlockHeader) -> Result<(), SyncError> {
        Ok(())
    }

    fn validate_block(&self, _block: &Block) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Minimal structural checks: non-zero difficulty, gas within the header
/// limit and no duplicated transactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DifficultyValidator;

impl BlockValidator for DifficultyValidator {
    fn validate_header(&self, header: &BlockHeader) -> Result<(), SyncError> {
        if header.difficulty == U256::ZERO {
            return Err(SyncError::InvalidBlock(format!(
                "header {} has zero difficulty",
                header.number
            )));
        }
        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), SyncError> {
        self.validate_header(&block.header)?;

        let gas: u64 = block
            .transactions
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.gas_limit));
        if gas > block.header.gas_limit {
            return Err(SyncError::InvalidBlock(format!(
                "block {} declares {} gas over its limit {}",
                block.number(),
                gas,
                block.header.gas_limit
            )));
        }

        let mut seen = HashSet::new();
        for tx in &block.transactions {
            if !seen.insert(tx.hash()) {
                return Err(SyncError::InvalidBlock(format!(
                    "block {} repeats {}",
                    block.number(),
                    tx.short()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::chain::Transaction;
    use alloy_primitives::{Address, B256};

    #[test]
    fn test_zero_difficulty_rejected() {
        let header = BlockHeader::new(1, B256::ZERO, U256::ZERO);
        assert!(DifficultyValidator.validate_header(&header).is_err());
    }

    #[test]
    fn test_duplicate_transaction_rejected() {
        let tx = Transaction::transfer(Address::repeat_byte(1), Address::repeat_byte(2), 0, U256::from(5u64));
        let block = Block::new(
            BlockHeader::new(1, B256::ZERO, U256::from(1u64)),
            vec![tx.clone(), tx],
        );
        assert!(matches!(
            DifficultyValidator.validate_block(&block),
            Err(SyncError::InvalidBlock(_))
        ));
    }
}
