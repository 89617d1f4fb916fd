//! State prefetch planning
//!
//! A block's prefetch set covers its miner and every transaction's sender and
//! recipient, at both the parent's and the block's own state root. Tasks are
//! advisory: their only effect is warming whatever cache sits in front of the
//! state reader.

use crate::blockchain::Block;
use crate::state::StateReader;
use alloy_primitives::{Address, B256};
use std::collections::BTreeSet;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrefetchKind {
    Account,
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefetchItem {
    pub root: B256,
    pub address: Address,
    pub kind: PrefetchKind,
}

/// Reads grouped into one independent unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchTask {
    pub label: String,
    pub items: Vec<PrefetchItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub resolved: usize,
    pub failed: usize,
}

impl PrefetchTask {
    pub fn run(&self, reader: &dyn StateReader) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        for item in &self.items {
            let result = match item.kind {
                PrefetchKind::Account => reader.get_account(item.root, item.address).map(|_| ()),
                PrefetchKind::Code => reader.get_code(item.root, item.address).map(|_| ()),
            };
            match result {
                Ok(()) => report.resolved += 1,
                Err(e) => {
                    trace!(task = %self.label, address = %item.address, error = %e, "prefetch miss");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// One task per (miner, root) pair and per (transaction, root) pair.
pub fn plan(block: &Block, parent_root: B256) -> Vec<PrefetchTask> {
    let roots = roots(parent_root, block.header.state_root);
    let miner = block.header.miner();
    let mut tasks = Vec::with_capacity(roots.len() * (block.transactions.len() + 1));

    for &root in &roots {
        tasks.push(PrefetchTask {
            label: format!("miner {} at {}", miner, root),
            items: vec![PrefetchItem {
                root,
                address: miner,
                kind: PrefetchKind::Account,
            }],
        });

        for (index, tx) in block.transactions.iter().enumerate() {
            let mut items = Vec::with_capacity(3);
            if let Some(sender) = tx.sender {
                items.push(PrefetchItem {
                    root,
                    address: sender,
                    kind: PrefetchKind::Account,
                });
            }
            if let Some(to) = tx.to {
                items.push(PrefetchItem {
                    root,
                    address: to,
                    kind: PrefetchKind::Account,
                });
                items.push(PrefetchItem {
                    root,
                    address: to,
                    kind: PrefetchKind::Code,
                });
            }
            if !items.is_empty() {
                tasks.push(PrefetchTask {
                    label: format!("tx {} of block {} at {}", index, block.number(), root),
                    items,
                });
            }
        }
    }
    tasks
}

/// Distinct reads across all tasks.
pub fn prefetch_set(tasks: &[PrefetchTask]) -> BTreeSet<PrefetchItem> {
    tasks.iter().flat_map(|t| t.items.iter().copied()).collect()
}

fn roots(parent_root: B256, own_root: B256) -> Vec<B256> {
    if parent_root == own_root {
        vec![parent_root]
    } else {
        vec![parent_root, own_root]
    }
}
