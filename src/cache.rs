//! Caching layer in front of a [`StateReader`]
//!
//! Prefetch tasks read through this cache so that the speculative pass and
//! the canonical queue find accounts and code already resident:
//! - Accounts keyed by `(state_root, address)`
//! - Contract code keyed by `(state_root, address)`
//!
//! Read errors are never cached; a missing root may appear later.
use crate::error::Result;
use crate::state::{Account, StateReader};
use alloy_primitives::{Address, B256};
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe LRU wrapper. `LruCache::get` promotes entries, so a plain
/// mutex is used rather than a read/write lock.
pub struct ThreadSafeCache<K, V> {
    cache: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create a new LRU cache with specified capacity. A capacity of 0 maps to 1.
    pub fn new_lru(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity_nz))),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.lock().get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.cache.lock().put(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.lock().contains(key)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl<K, V> Clone for ThreadSafeCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

pub type AccountCache = ThreadSafeCache<(B256, Address), Option<Account>>;
pub type CodeCache = ThreadSafeCache<(B256, Address), Vec<u8>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub accounts: usize,
    pub code: usize,
}

/// Read-through cache over another state reader.
pub struct CachingStateReader {
    inner: Arc<dyn StateReader>,
    accounts: AccountCache,
    code: CodeCache,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingStateReader {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(inner: Arc<dyn StateReader>, capacity: usize) -> Self {
        Self {
            inner,
            accounts: AccountCache::new_lru(capacity),
            code: CodeCache::new_lru(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_account_cached(&self, root: B256, address: Address) -> bool {
        self.accounts.contains(&(root, address))
    }

    pub fn is_code_cached(&self, root: B256, address: Address) -> bool {
        self.code.contains(&(root, address))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            accounts: self.accounts.len(),
            code: self.code.len(),
        }
    }

    pub fn clear(&self) {
        self.accounts.clear();
        self.code.clear();
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl StateReader for CachingStateReader {
    fn get_account(&self, root: B256, address: Address) -> Result<Option<Account>> {
        if let Some(account) = self.accounts.get(&(root, address)) {
            self.record(true);
            return Ok(account);
        }
        self.record(false);
        let account = self.inner.get_account(root, address)?;
        self.accounts.put((root, address), account.clone());
        Ok(account)
    }

    fn get_code(&self, root: B256, address: Address) -> Result<Vec<u8>> {
        if let Some(code) = self.code.get(&(root, address)) {
            self.record(true);
            return Ok(code);
        }
        self.record(false);
        let code = self.inner.get_code(root, address)?;
        self.code.put((root, address), code.clone());
        Ok(code)
    }
}
