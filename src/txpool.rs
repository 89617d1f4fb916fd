//! Pending transaction pool and block-template selection

use crate::blockchain::Transaction;
use crate::config::TxPoolConfig;
use crate::error::Result;
use crate::state::StateReader;
use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub trait TxPool: Send + Sync {
    fn pending_transactions(&self) -> Vec<Transaction>;
    fn remove_transaction(&self, hash: B256) -> bool;
}

/// Pending transactions keyed by hash.
#[derive(Default)]
pub struct InMemoryTxPool {
    pending: RwLock<HashMap<B256, Transaction>>,
}

impl InMemoryTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&self, tx: Transaction) -> B256 {
        let hash = tx.hash();
        self.pending.write().insert(hash, tx);
        hash
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.pending.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.read().is_empty()
    }
}

impl TxPool for InMemoryTxPool {
    fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.read().values().cloned().collect()
    }

    fn remove_transaction(&self, hash: B256) -> bool {
        self.pending.write().remove(&hash).is_some()
    }
}

/// Picks the pending transactions that fit a block of the given gas limit.
pub struct PendingTxSelector {
    pool: Arc<dyn TxPool>,
    state: Arc<dyn StateReader>,
    min_gas_price: U256,
    max_nonce_gap: u64,
}

impl PendingTxSelector {
    pub fn new(pool: Arc<dyn TxPool>, state: Arc<dyn StateReader>, config: &TxPoolConfig) -> Self {
        Self {
            pool,
            state,
            min_gas_price: U256::from(config.min_gas_price),
            max_nonce_gap: config.max_nonce_gap,
        }
    }

    pub fn select_transactions(&self, state_root: B256, gas_limit: u64) -> Result<Vec<Transaction>> {
        let mut pending = self.pool.pending_transactions();
        let total = pending.len();
        pending.sort_by(|a, b| {
            a.nonce
                .cmp(&b.nonce)
                .then_with(|| b.gas_price.cmp(&a.gas_price))
                .then_with(|| a.gas_limit.cmp(&b.gas_limit))
        });

        let mut nonces: HashMap<Address, u64> = HashMap::new();
        let mut balances: HashMap<Address, U256> = HashMap::new();
        let mut selected = Vec::new();
        let mut gas_remaining = gas_limit;

        debug!(
            min_gas_price = %self.min_gas_price,
            gas_limit,
            "collecting pending transactions"
        );

        for tx in pending {
            if gas_remaining < Transaction::BASE_TX_GAS_COST {
                continue;
            }
            if tx.gas_limit > gas_remaining {
                info!(tx = %tx.short(), gas_remaining, "rejecting, gas limit above remaining block gas");
                continue;
            }
            let Some(sender) = tx.sender else {
                self.pool.remove_transaction(tx.hash());
                info!(tx = %tx.short(), "rejecting, no sender");
                continue;
            };
            if tx.gas_price < self.min_gas_price {
                info!(tx = %tx.short(), "rejecting, gas price too low");
                continue;
            }

            let expected = match nonces.get(&sender) {
                Some(nonce) => *nonce,
                None => {
                    let nonce = self.state.get_nonce(state_root, sender)?;
                    nonces.insert(sender, nonce);
                    nonce
                }
            };
            if tx.nonce != expected {
                if tx.nonce < expected || tx.nonce > expected.saturating_add(self.max_nonce_gap) {
                    self.pool.remove_transaction(tx.hash());
                }
                info!(tx = %tx.short(), expected, "rejecting, invalid nonce");
                continue;
            }

            let balance = match balances.get(&sender) {
                Some(balance) => *balance,
                None => self.state.get_balance(state_root, sender)?,
            };
            let cost = tx.max_cost();
            if balance < cost {
                balances.insert(sender, balance);
                info!(tx = %tx.short(), %balance, %cost, "rejecting, sender balance too low");
                continue;
            }
            balances.insert(sender, balance - cost);

            nonces.insert(sender, tx.nonce + 1);
            gas_remaining -= tx.gas_limit;
            selected.push(tx);
        }

        debug!(selected = selected.len(), total, "collected pending transactions");
        Ok(selected)
    }
}
