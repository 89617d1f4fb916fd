use crate::error::Result;
use crate::state::{Account, StateReader};
use alloy_primitives::{Address, B256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Disposable view of one state snapshot.
///
/// Reads fall through to the shared reader; writes land in a private
/// overlay that is thrown away with the environment, so nothing done here is
/// ever visible to canonical processing.
pub struct ReadOnlyProcessingEnv {
    reader: Arc<dyn StateReader>,
    root: B256,
    overlay: HashMap<Address, Account>,
}

impl ReadOnlyProcessingEnv {
    pub fn new(reader: Arc<dyn StateReader>, root: B256) -> Self {
        Self {
            reader,
            root,
            overlay: HashMap::new(),
        }
    }

    pub fn state_root(&self) -> B256 {
        self.root
    }

    pub fn account(&self, address: Address) -> Result<Option<Account>> {
        if let Some(account) = self.overlay.get(&address) {
            return Ok(Some(account.clone()));
        }
        self.reader.get_account(self.root, address)
    }

    pub fn code(&self, address: Address) -> Result<Vec<u8>> {
        self.reader.get_code(self.root, address)
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.overlay.insert(address, account);
    }

    /// Number of accounts written so far.
    pub fn touched(&self) -> usize {
        self.overlay.len()
    }
}

impl Drop for ReadOnlyProcessingEnv {
    fn drop(&mut self) {
        if !self.overlay.is_empty() {
            trace!(root = %self.root, accounts = self.overlay.len(), "discarding speculative writes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateDb;
    use alloy_primitives::U256;

    #[test]
    fn test_writes_never_reach_shared_state() {
        let db = Arc::new(InMemoryStateDb::new());
        let root = B256::repeat_byte(1);
        let addr = Address::repeat_byte(1);
        db.insert_account(root, addr, Account::with_balance(U256::from(10u64)));

        {
            let mut env = ReadOnlyProcessingEnv::new(db.clone(), root);
            env.set_account(addr, Account::with_balance(U256::from(99u64)));
            assert_eq!(env.account(addr).unwrap().unwrap().balance, U256::from(99u64));
            assert_eq!(env.touched(), 1);
        }

        assert_eq!(db.get_balance(root, addr).unwrap(), U256::from(10u64));
    }
}
