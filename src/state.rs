//! Read-only access to account state snapshots
//!
//! Snapshots are identified by their state root. Readers may be backed by a
//! slow network source, so callers on async paths should move reads onto the
//! blocking pool.

use crate::error::{Result, SyncError};
use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: Option<B256>,
}

impl Account {
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }
}

/// The state storage collaborator. Must tolerate concurrent readers.
pub trait StateReader: Send + Sync {
    /// `Ok(None)` means the root is known but the account does not exist.
    fn get_account(&self, root: B256, address: Address) -> Result<Option<Account>>;
    fn get_code(&self, root: B256, address: Address) -> Result<Vec<u8>>;

    fn get_balance(&self, root: B256, address: Address) -> Result<U256> {
        Ok(self
            .get_account(root, address)?
            .map(|a| a.balance)
            .unwrap_or(U256::ZERO))
    }

    fn get_nonce(&self, root: B256, address: Address) -> Result<u64> {
        Ok(self.get_account(root, address)?.map(|a| a.nonce).unwrap_or(0))
    }
}

#[derive(Default)]
struct Snapshot {
    accounts: HashMap<Address, Account>,
    code: HashMap<Address, Vec<u8>>,
}

/// Immutable-by-root snapshots held in memory. Counts reads so callers can
/// observe whether a cache in front of it is doing its job.
#[derive(Default)]
pub struct InMemoryStateDb {
    snapshots: RwLock<HashMap<B256, Snapshot>>,
    reads: AtomicU64,
}

impl InMemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or extend) the snapshot at `root`.
    pub fn insert_account(&self, root: B256, address: Address, account: Account) {
        self.snapshots
            .write()
            .entry(root)
            .or_default()
            .accounts
            .insert(address, account);
    }

    pub fn insert_code(&self, root: B256, address: Address, code: Vec<u8>) {
        self.snapshots
            .write()
            .entry(root)
            .or_default()
            .code
            .insert(address, code);
    }

    pub fn has_root(&self, root: B256) -> bool {
        self.snapshots.read().contains_key(&root)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl StateReader for InMemoryStateDb {
    fn get_account(&self, root: B256, address: Address) -> Result<Option<Account>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let snapshots = self.snapshots.read();
        let snapshot = snapshots.get(&root).ok_or(SyncError::MissingState(root))?;
        Ok(snapshot.accounts.get(&address).cloned())
    }

    fn get_code(&self, root: B256, address: Address) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let snapshots = self.snapshots.read();
        let snapshot = snapshots.get(&root).ok_or(SyncError::MissingState(root))?;
        Ok(snapshot.code.get(&address).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_root_is_an_error() {
        let db = InMemoryStateDb::new();
        let err = db.get_account(B256::repeat_byte(9), Address::ZERO).unwrap_err();
        assert!(matches!(err, SyncError::MissingState(_)));
    }

    #[test]
    fn test_known_root_missing_account_defaults() {
        let db = InMemoryStateDb::new();
        let root = B256::repeat_byte(1);
        db.insert_account(root, Address::repeat_byte(1), Account::with_balance(U256::from(50u64)));

        assert_eq!(db.get_balance(root, Address::repeat_byte(1)).unwrap(), U256::from(50u64));
        assert_eq!(db.get_balance(root, Address::repeat_byte(2)).unwrap(), U256::ZERO);
        assert_eq!(db.get_nonce(root, Address::repeat_byte(2)).unwrap(), 0);
        assert_eq!(db.read_count(), 3);
    }

    #[test]
    fn test_code_is_per_root() {
        let db = InMemoryStateDb::new();
        let (old, new) = (B256::repeat_byte(1), B256::repeat_byte(2));
        let contract = Address::repeat_byte(0xc0);
        db.insert_code(new, contract, vec![0x60, 0x00]);

        assert!(!db.has_root(old));
        assert!(db.has_root(new));
        assert_eq!(db.get_code(new, contract).unwrap(), vec![0x60, 0x00]);
        assert!(db.get_code(new, Address::ZERO).unwrap().is_empty());
        assert!(matches!(db.get_code(old, contract), Err(SyncError::MissingState(_))));
    }
}
