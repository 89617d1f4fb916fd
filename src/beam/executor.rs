use crate::beam::env::ReadOnlyProcessingEnv;
use crate::beam::queue::ProcessingOptions;
use crate::blockchain::{Block, BlockValidator};
use crate::error::{Result, SyncError};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    /// Required state is not available locally.
    Skipped,
}

/// Executes a single block against a disposable environment.
pub trait OneTimeProcessor: Send + Sync {
    fn process(
        &self,
        block: &Block,
        env: &mut ReadOnlyProcessingEnv,
        options: ProcessingOptions,
    ) -> Result<ProcessOutcome>;
}

/// Validates the block, then replays its value transfers with nonce and
/// balance checks. Every state read goes through the environment, so a run
/// leaves the shared cache warm for the canonical pass.
pub struct ReadOnlyChainProcessor {
    validator: Arc<dyn BlockValidator>,
}

impl ReadOnlyChainProcessor {
    pub fn new(validator: Arc<dyn BlockValidator>) -> Self {
        Self { validator }
    }
}

impl OneTimeProcessor for ReadOnlyChainProcessor {
    fn process(
        &self,
        block: &Block,
        env: &mut ReadOnlyProcessingEnv,
        options: ProcessingOptions,
    ) -> Result<ProcessOutcome> {
        if !options.read_only_chain {
            return Err(SyncError::Execution(
                "one-time processing requires a read-only chain".to_string(),
            ));
        }
        self.validator.validate_block(block)?;

        match replay(block, env) {
            Err(SyncError::MissingState(root)) => {
                debug!(block = %block.short(), %root, "state not available, skipping");
                Ok(ProcessOutcome::Skipped)
            }
            Err(e) => Err(e),
            Ok(()) => Ok(ProcessOutcome::Processed),
        }
    }
}

fn replay(block: &Block, env: &mut ReadOnlyProcessingEnv) -> Result<()> {
    env.account(block.header.miner())?;

    for tx in &block.transactions {
        let sender = tx
            .sender
            .ok_or_else(|| SyncError::InvalidTransaction(format!("{} has no sender", tx.short())))?;

        let mut from = env.account(sender)?.unwrap_or_default();
        if from.nonce != tx.nonce {
            return Err(SyncError::InvalidTransaction(format!(
                "{} expected nonce {}",
                tx.short(),
                from.nonce
            )));
        }
        if from.balance < tx.value {
            return Err(SyncError::InvalidTransaction(format!(
                "{} exceeds sender balance",
                tx.short()
            )));
        }
        from.nonce += 1;
        from.balance -= tx.value;
        env.set_account(sender, from);

        if let Some(to) = tx.to {
            let code = env.code(to)?;
            let mut recipient = env.account(to)?.unwrap_or_default();
            recipient.balance = recipient.balance.saturating_add(tx.value);
            env.set_account(to, recipient);
            trace!(tx = %tx.short(), code_len = code.len(), "transfer replayed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{AlwaysValid, BlockHeader, Transaction};
    use crate::state::{Account, InMemoryStateDb, StateReader};
    use alloy_primitives::{Address, B256, U256};

    fn setup() -> (Arc<InMemoryStateDb>, B256, Address, Address) {
        let db = Arc::new(InMemoryStateDb::new());
        let root = B256::repeat_byte(7);
        let alice = Address::repeat_byte(0xa1);
        let bob = Address::repeat_byte(0xb0);
        db.insert_account(root, alice, Account::with_balance(U256::from(100u64)));
        (db, root, alice, bob)
    }

    fn block_with(txs: Vec<Transaction>) -> Block {
        Block::new(BlockHeader::new(1, B256::ZERO, U256::from(1u64)), txs)
    }

    #[test]
    fn test_transfers_replayed_in_overlay() {
        let (db, root, alice, bob) = setup();
        let processor = ReadOnlyChainProcessor::new(Arc::new(AlwaysValid));
        let block = block_with(vec![
            Transaction::transfer(alice, bob, 0, U256::from(40u64)),
            Transaction::transfer(alice, bob, 1, U256::from(10u64)),
        ]);

        let mut env = ReadOnlyProcessingEnv::new(db.clone(), root);
        let outcome = processor
            .process(&block, &mut env, ProcessingOptions::READ_ONLY_CHAIN)
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Processed);
        assert_eq!(env.account(bob).unwrap().unwrap().balance, U256::from(50u64));
        assert_eq!(env.account(alice).unwrap().unwrap().nonce, 2);
        drop(env);

        assert_eq!(db.get_balance(root, alice).unwrap(), U256::from(100u64));
        assert_eq!(db.get_balance(root, bob).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_bad_nonce_fails() {
        let (db, root, alice, bob) = setup();
        let processor = ReadOnlyChainProcessor::new(Arc::new(AlwaysValid));
        let block = block_with(vec![Transaction::transfer(alice, bob, 3, U256::from(1u64))]);

        let mut env = ReadOnlyProcessingEnv::new(db, root);
        let result = processor.process(&block, &mut env, ProcessingOptions::READ_ONLY_CHAIN);
        assert!(matches!(result, Err(SyncError::InvalidTransaction(_))));
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let (db, _, alice, bob) = setup();
        let processor = ReadOnlyChainProcessor::new(Arc::new(AlwaysValid));
        let block = block_with(vec![Transaction::transfer(alice, bob, 0, U256::from(1u64))]);

        let mut env = ReadOnlyProcessingEnv::new(db, B256::repeat_byte(0x55));
        let outcome = processor
            .process(&block, &mut env, ProcessingOptions::READ_ONLY_CHAIN)
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped);
    }

    #[test]
    fn test_refuses_writable_options() {
        let (db, root, _, _) = setup();
        let processor = ReadOnlyChainProcessor::new(Arc::new(AlwaysValid));
        let mut env = ReadOnlyProcessingEnv::new(db, root);
        let result = processor.process(&block_with(vec![]), &mut env, ProcessingOptions::NONE);
        assert!(matches!(result, Err(SyncError::Execution(_))));
    }
}
