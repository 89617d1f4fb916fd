use crate::blockchain::core::chain::{Block, BlockHeader};
use crate::blockchain::core::validation::BlockValidator;
use alloy_primitives::{B256, U256};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Outcome of offering a header or block to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockResult {
    Added,
    AlreadyKnown,
    InvalidBlock,
    UnknownParent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Hash(B256),
    Number(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// When set, headers whose total difficulty is still unknown are not returned.
    pub total_difficulty_needed: bool,
}

impl LookupOptions {
    pub const TOTAL_DIFFICULTY_NOT_NEEDED: LookupOptions = LookupOptions {
        total_difficulty_needed: false,
    };
}

/// The chain collaborator. Owns canonical header and body storage.
///
/// Implementations must not call back into the sync feed from
/// `suggest_header`; the feed holds its own lock across that call.
pub trait BlockTree: Send + Sync {
    fn suggest_header(&self, header: BlockHeader) -> AddBlockResult;
    fn find_header(&self, id: BlockId, options: LookupOptions) -> Option<BlockHeader>;
    fn best_suggested(&self) -> Option<BlockHeader>;

    fn find_header_by_hash(&self, hash: B256) -> Option<BlockHeader> {
        self.find_header(BlockId::Hash(hash), LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)
    }

    fn find_header_by_number(&self, number: u64) -> Option<BlockHeader> {
        self.find_header(BlockId::Number(number), LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)
    }
}

#[derive(Default)]
struct TreeState {
    headers: HashMap<B256, BlockHeader>,
    by_number: BTreeMap<u64, Vec<B256>>,
    bodies: HashMap<B256, Block>,
    best_suggested: Option<B256>,
    insertion_order: Vec<B256>,
}

impl TreeState {
    fn total_difficulty(&self, hash: &B256) -> U256 {
        self.headers
            .get(hash)
            .and_then(|h| h.total_difficulty)
            .unwrap_or(U256::ZERO)
    }
}

/// Block tree held entirely in memory. Publishes new best suggested blocks on
/// an optional bounded channel.
pub struct InMemoryBlockTree {
    state: RwLock<TreeState>,
    validator: Arc<dyn BlockValidator>,
    new_best: Mutex<Option<mpsc::Sender<Block>>>,
}

impl InMemoryBlockTree {
    pub fn new(genesis: BlockHeader, validator: Arc<dyn BlockValidator>) -> Self {
        let mut genesis = genesis;
        if genesis.total_difficulty.is_none() {
            genesis.total_difficulty = Some(genesis.difficulty);
        }
        let hash = genesis.hash();

        let mut state = TreeState::default();
        state.by_number.entry(genesis.number).or_default().push(hash);
        state.insertion_order.push(hash);
        state.headers.insert(hash, genesis);
        state.best_suggested = Some(hash);

        Self {
            state: RwLock::new(state),
            validator,
            new_best: Mutex::new(None),
        }
    }

    /// Publish every block that becomes the new best suggested block on `sender`.
    pub fn subscribe_new_best(&self, sender: mpsc::Sender<Block>) {
        *self.new_best.lock() = Some(sender);
    }

    /// Drop the subscription, closing the channel once other senders are gone.
    pub fn unsubscribe_new_best(&self) {
        self.new_best.lock().take();
    }

    /// Offer a full block. The header goes through `suggest_header`; the body
    /// is stored once the header is connected.
    pub fn suggest_block(&self, block: Block) -> AddBlockResult {
        let result = self.suggest_header(block.header.clone());
        if !matches!(result, AddBlockResult::Added | AddBlockResult::AlreadyKnown) {
            return result;
        }

        let hash = block.hash();
        let is_new_best = {
            let mut state = self.state.write();
            let newly_stored = state.bodies.insert(hash, block.clone()).is_none();
            newly_stored && state.best_suggested == Some(hash)
        };

        if is_new_best {
            if let Some(sender) = self.new_best.lock().as_ref() {
                if let Err(e) = sender.try_send(block) {
                    warn!(error = %e, "dropping new best suggested block notification");
                }
            }
        }
        result
    }

    pub fn find_block(&self, hash: B256) -> Option<Block> {
        self.state.read().bodies.get(&hash).cloned()
    }

    /// Headers in the order they were connected, genesis first.
    pub fn insertion_order(&self) -> Vec<BlockHeader> {
        let state = self.state.read();
        state
            .insertion_order
            .iter()
            .filter_map(|hash| state.headers.get(hash).cloned())
            .collect()
    }

    pub fn header_count(&self) -> usize {
        self.state.read().headers.len()
    }
}

impl BlockTree for InMemoryBlockTree {
    fn suggest_header(&self, header: BlockHeader) -> AddBlockResult {
        let hash = header.hash();
        let mut state = self.state.write();

        if state.headers.contains_key(&hash) {
            return AddBlockResult::AlreadyKnown;
        }

        if let Err(e) = self.validator.validate_header(&header) {
            debug!(number = header.number, error = %e, "header failed validation");
            return AddBlockResult::InvalidBlock;
        }

        if header.is_genesis() {
            // A different genesis can never be connected.
            return AddBlockResult::InvalidBlock;
        }

        let parent_td = match state.headers.get(&header.parent_hash) {
            None => return AddBlockResult::UnknownParent,
            Some(parent) if parent.number + 1 != header.number => {
                return AddBlockResult::InvalidBlock;
            }
            Some(parent) => parent.total_difficulty.unwrap_or(U256::ZERO),
        };

        let mut header = header;
        let total_difficulty = parent_td.saturating_add(header.difficulty);
        header.total_difficulty = Some(total_difficulty);

        let best_td = state
            .best_suggested
            .map(|best| state.total_difficulty(&best))
            .unwrap_or(U256::ZERO);
        if total_difficulty > best_td {
            state.best_suggested = Some(hash);
        }

        trace!(number = header.number, td = %total_difficulty, "header connected");
        state.by_number.entry(header.number).or_default().push(hash);
        state.insertion_order.push(hash);
        state.headers.insert(hash, header);
        AddBlockResult::Added
    }

    fn find_header(&self, id: BlockId, options: LookupOptions) -> Option<BlockHeader> {
        let state = self.state.read();
        let header = match id {
            BlockId::Hash(hash) => state.headers.get(&hash).cloned(),
            // Heaviest known header at that height.
            BlockId::Number(number) => state
                .by_number
                .get(&number)?
                .iter()
                .filter_map(|hash| state.headers.get(hash))
                .max_by_key(|h| h.total_difficulty.unwrap_or(U256::ZERO))
                .cloned(),
        }?;

        if options.total_difficulty_needed && header.total_difficulty.is_none() {
            return None;
        }
        Some(header)
    }

    fn best_suggested(&self) -> Option<BlockHeader> {
        let state = self.state.read();
        state.best_suggested.and_then(|hash| state.headers.get(&hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::chain::build_chain;
    use crate::blockchain::core::validation::AlwaysValid;

    fn tree() -> (InMemoryBlockTree, BlockHeader) {
        let genesis = BlockHeader::genesis(U256::from(1u64));
        (InMemoryBlockTree::new(genesis.clone(), Arc::new(AlwaysValid)), genesis)
    }

    #[test]
    fn test_unknown_parent_not_connected() {
        let (tree, genesis) = tree();
        let headers = build_chain(&genesis, 3, U256::from(2u64), 0);

        assert_eq!(tree.suggest_header(headers[1].clone()), AddBlockResult::UnknownParent);
        assert_eq!(tree.suggest_header(headers[0].clone()), AddBlockResult::Added);
        assert_eq!(tree.suggest_header(headers[0].clone()), AddBlockResult::AlreadyKnown);
        assert_eq!(tree.suggest_header(headers[1].clone()), AddBlockResult::Added);
        assert_eq!(tree.header_count(), 3);
    }

    #[test]
    fn test_best_suggested_follows_weight() {
        let (tree, genesis) = tree();
        let light = build_chain(&genesis, 2, U256::from(2u64), 0);
        let heavy = build_chain(&genesis, 1, U256::from(10u64), 1);

        for header in &light {
            tree.suggest_header(header.clone());
        }
        assert_eq!(tree.best_suggested().unwrap().number, 2);

        tree.suggest_header(heavy[0].clone());
        let best = tree.best_suggested().unwrap();
        assert_eq!(best.hash(), heavy[0].hash());
        assert_eq!(best.total_difficulty, Some(U256::from(11u64)));

        let at_one = tree.find_header_by_number(1).unwrap();
        assert_eq!(at_one.hash(), heavy[0].hash());
    }

    #[tokio::test]
    async fn test_new_best_block_published() {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            let (tree, genesis) = tree();
            let (tx, mut rx) = mpsc::channel(4);
            tree.subscribe_new_best(tx);

            let header = build_chain(&genesis, 1, U256::from(2u64), 0).remove(0);
            let block = Block::new(header, vec![]);
            assert_eq!(tree.suggest_block(block.clone()), AddBlockResult::Added);

            let published = rx.recv().await.unwrap();
            assert_eq!(published.hash(), block.hash());
            assert_eq!(tree.find_block(block.hash()), Some(block.clone()));

            tree.unsubscribe_new_best();
            assert!(rx.recv().await.is_none());
        }).await.expect("test_new_best_block_published timed out");
    }
}
