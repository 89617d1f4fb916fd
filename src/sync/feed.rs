//! Header request feed
//!
//! [`BlockRequestFeed`] is shared by every peer session. `prepare_request`
//! hands out the next header range worth asking for; `handle_response`
//! threads the returned headers into the block tree, parks batches whose
//! parent is missing and re-queues whatever still has to be fetched.
//!
//! All mutable scheduler state sits in one [`FeedState`] behind a single
//! mutex: the pending queue, the sent set, the dependency index and both
//! progress counters change together.
//!
//! A batch that is never handed back is dropped from the sent set once it
//! has been out for `in_flight_timeout`, so it cannot hold the feed idle.

use crate::blockchain::{AddBlockResult, BlockTree};
use crate::config::SyncConfig;
use crate::sync::batch::{BatchId, BatchOutcome, HeaderSyncBatch};
use crate::sync::dependencies::HeaderDependencyIndex;
use crate::sync::peers::{PeerId, PeerPool};
use crate::sync::MAX_BATCH;
use alloy_primitives::{B256, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

struct FeedState {
    pending: VecDeque<HeaderSyncBatch>,
    /// In-flight batches and when they were handed out.
    sent: HashMap<BatchId, Instant>,
    dependencies: HeaderDependencyIndex,
    /// Highest number ever requested. Never decreases.
    best_requested_header: u64,
    /// Heaviest chain weight seen accepted at `best_requested_header`. Never decreases.
    best_known_total_difficulty: U256,
    next_id: u64,
}

impl FeedState {
    fn next_id(&mut self) -> BatchId {
        let id = BatchId(self.next_id);
        self.next_id += 1;
        id
    }

    fn dispatch(&mut self, batch: HeaderSyncBatch) -> HeaderSyncBatch {
        self.sent.insert(batch.id, Instant::now());
        batch
    }

    fn expire_lost(&mut self, timeout: Duration) {
        self.sent.retain(|id, sent_at| {
            let live = sent_at.elapsed() < timeout;
            if !live {
                warn!(batch = %id, "no response within the in-flight timeout, treating the batch as lost");
            }
            live
        });
    }
}

enum PeerReport {
    Invalid(PeerId),
    NoProgress(PeerId),
}

pub struct BlockRequestFeed {
    tree: Arc<dyn BlockTree>,
    peers: Arc<dyn PeerPool>,
    state: Mutex<FeedState>,
    max_batch: u32,
    max_resolution_steps: usize,
    in_flight_timeout: Duration,
}

impl BlockRequestFeed {
    pub fn new(tree: Arc<dyn BlockTree>, peers: Arc<dyn PeerPool>, config: &SyncConfig) -> Self {
        Self {
            tree,
            peers,
            state: Mutex::new(FeedState {
                pending: VecDeque::new(),
                sent: HashMap::new(),
                dependencies: HeaderDependencyIndex::new(config.max_parked_batches),
                best_requested_header: 0,
                best_known_total_difficulty: U256::ZERO,
                next_id: 0,
            }),
            max_batch: config.max_batch_size.clamp(1, MAX_BATCH),
            max_resolution_steps: config.max_resolution_steps.max(1),
            in_flight_timeout: config.in_flight_timeout,
        }
    }

    /// Next batch worth requesting, or `None` when there is currently nothing
    /// to do and the caller should idle.
    pub fn prepare_request(&self, threshold: u32) -> Option<HeaderSyncBatch> {
        let peers = self.peers.all_peers();
        let max_difficulty = peers.iter().map(|p| p.total_difficulty).max()?;
        let max_number = peers.iter().map(|p| p.head_number).max()?;

        let best = self.tree.best_suggested();
        let local_difficulty = best
            .as_ref()
            .and_then(|h| h.total_difficulty)
            .unwrap_or(U256::ZERO);
        let local_number = best.as_ref().map_or(0, |h| h.number);
        if max_difficulty <= local_difficulty {
            return None;
        }

        let mut state = self.state.lock();
        state.expire_lost(self.in_flight_timeout);
        if let Some(batch) = state.pending.pop_front() {
            trace!(%batch, "re-issuing queued batch");
            return Some(state.dispatch(batch));
        }

        // The pending queue is known to be empty from here on.
        let target = max_number.saturating_sub(u64::from(threshold));
        let requested_all = target <= state.best_requested_header;
        if requested_all {
            if max_difficulty <= state.best_known_total_difficulty {
                return None;
            }
            if !state.sent.is_empty() {
                // Responses still outstanding may settle the weight question.
                return None;
            }
        }

        let max_batch = u64::from(self.max_batch);
        let is_reorg = target == local_number && max_difficulty > state.best_known_total_difficulty;
        // Everything was answered yet the range never connected.
        let is_refill = requested_all && !is_reorg;
        let min_total_difficulty = state.best_known_total_difficulty.saturating_add(U256::from(1u64));

        if is_reorg {
            let keys = state.dependencies.keys();
            info!(
                height = target,
                peer_td = %max_difficulty,
                known_td = %state.best_known_total_difficulty,
                buckets = keys.len(),
                "peer claims heavier chain at our height, re-syncing segments"
            );
            for key in keys {
                let start = key.saturating_sub(max_batch - 1);
                let size = (key + 1).min(max_batch) as u32;
                let id = state.next_id();
                state
                    .pending
                    .push_back(HeaderSyncBatch::reorg(id, start, size, min_total_difficulty));
            }
            if let Some(batch) = state.pending.pop_front() {
                return Some(state.dispatch(batch));
            }
        }

        // A refill ends below the lowest parked segment, where the chain stops connecting.
        let end = match state.dependencies.lowest_key() {
            Some(key) if is_refill => key.min(target),
            _ => target,
        };
        let start = if is_reorg || is_refill {
            end.saturating_sub(max_batch - 1)
        } else {
            state.best_requested_header
        };
        if is_refill {
            debug!(
                local = local_number,
                start,
                end,
                parked = state.dependencies.len(),
                "requested range left unconnected, fetching the window again"
            );
        }
        if end < start {
            return None;
        }
        let size = (1 + end - start).min(max_batch) as u32;

        let id = state.next_id();
        let batch = if is_reorg {
            HeaderSyncBatch::reorg(id, start, size, min_total_difficulty)
        } else {
            HeaderSyncBatch::new(id, start, size)
        };
        state.best_requested_header = state.best_requested_header.max(batch.end_number());
        debug!(%batch, best_requested = state.best_requested_header, "new header request");
        Some(state.dispatch(batch))
    }

    /// Consume a batch coming back from a peer. Returns the outcome and the
    /// number of headers accepted into the tree.
    pub fn handle_response(&self, batch: HeaderSyncBatch) -> (BatchOutcome, u32) {
        let mut reports = Vec::new();
        let result = {
            let mut state = self.state.lock();
            if state.sent.remove(&batch.id).is_none() {
                trace!(%batch, "response for a batch that was not in flight");
            }

            let mut resolved = VecDeque::new();
            let result = self.assemble(&mut state, batch, &mut resolved, &mut reports);
            self.resolve_dependencies(&mut state, resolved, &mut reports);
            result
        };

        for report in reports {
            match report {
                PeerReport::Invalid(peer) => self.peers.report_invalid(&peer),
                PeerReport::NoProgress(peer) => self.peers.report_no_progress(&peer),
            }
        }
        result
    }

    fn assemble(
        &self,
        state: &mut FeedState,
        batch: HeaderSyncBatch,
        resolved: &mut VecDeque<HeaderSyncBatch>,
        reports: &mut Vec<PeerReport>,
    ) -> (BatchOutcome, u32) {
        let Some(response) = batch.response.as_ref() else {
            debug!(%batch, "no payload, queueing again");
            state.pending.push_back(batch);
            return (BatchOutcome::Empty, 0);
        };

        let peer_id = batch.assigned_peer.as_ref().map(|p| p.id.clone());
        let report_invalid = |reports: &mut Vec<PeerReport>| {
            if let Some(peer) = &peer_id {
                reports.push(PeerReport::Invalid(peer.clone()));
            }
        };

        let limit = response.len().min(batch.request_size as usize);
        let mut accepted: u32 = 0;
        let mut parked_at = None;
        let mut parking_refused = false;
        let mut previous_hash: Option<B256> = None;

        for (position, slot) in response.iter().take(limit).enumerate() {
            let Some(header) = slot else {
                break;
            };

            if position > 0 && previous_hash != Some(header.parent_hash) {
                debug!(%batch, number = header.number, "response breaks continuity");
                report_invalid(reports);
                break;
            }

            if accepted == 0 && header.number != batch.start_number {
                debug!(%batch, number = header.number, "response does not start at the requested number");
                report_invalid(reports);
                break;
            }

            let result = if header.is_genesis() {
                match self.tree.find_header_by_number(header.number) {
                    Some(genesis) if genesis.hash() == header.hash() => AddBlockResult::AlreadyKnown,
                    _ => AddBlockResult::InvalidBlock,
                }
            } else {
                self.tree.suggest_header(header.clone())
            };

            match result {
                AddBlockResult::InvalidBlock => {
                    debug!(%batch, number = header.number, "tree rejected header");
                    report_invalid(reports);
                    break;
                }
                AddBlockResult::UnknownParent => {
                    if accepted == 0 {
                        // Park regardless of how the offered header compares
                        // with what we hold; the weight question is settled
                        // once the parent arrives.
                        match self.tree.find_header_by_number(header.number) {
                            Some(existing) if existing.difficulty > header.difficulty => {
                                debug!(%batch, "offered header is lighter than the one held, parking anyway");
                            }
                            Some(_) => debug!(%batch, "offered header outweighs the one held, parking"),
                            None => debug!(%batch, "no header held at this height, parking"),
                        }
                        parked_at = Some(header.number.saturating_sub(1));
                    }
                    break;
                }
                AddBlockResult::Added | AddBlockResult::AlreadyKnown => {
                    resolved.extend(state.dependencies.take(header.number));

                    if header.number == state.best_requested_header {
                        if let Some(peer) = &batch.assigned_peer {
                            state.best_known_total_difficulty =
                                state.best_known_total_difficulty.max(peer.total_difficulty);
                        }
                    }

                    accepted += 1;
                    previous_hash = Some(header.hash());
                }
            }
        }

        let batch = match parked_at {
            Some(number) => match state.dependencies.park(number, batch) {
                Ok(()) => return (BatchOutcome::Parked, 0),
                Err(batch) => {
                    warn!(%batch, parked = state.dependencies.len(), "dependency index full, fetching again");
                    parking_refused = true;
                    batch
                }
            },
            None => batch,
        };

        if accepted < batch.request_size {
            // The last accepted header may be the unverified boundary; ask for it again.
            let trimmed = accepted.saturating_sub(1);
            let id = state.next_id();
            let mut remainder = HeaderSyncBatch::new(
                id,
                batch.start_number + u64::from(trimmed),
                batch.request_size - trimmed,
            );
            remainder.is_reorg_batch = batch.is_reorg_batch;
            remainder.min_total_difficulty = batch.min_total_difficulty;
            trace!(%remainder, "queueing remainder");
            state.pending.push_back(remainder);
        }

        if accepted == 0 {
            if parking_refused {
                return (BatchOutcome::Deferred, 0);
            }
            if let Some(peer) = peer_id {
                reports.push(PeerReport::NoProgress(peer));
            }
            return (BatchOutcome::Rejected, 0);
        }

        let outcome = if accepted == batch.request_size {
            BatchOutcome::Complete
        } else {
            BatchOutcome::Partial
        };
        (outcome, accepted)
    }

    /// Re-run parked batches whose missing parent has been connected. The
    /// work-list grows as resolved batches connect further headers.
    fn resolve_dependencies(
        &self,
        state: &mut FeedState,
        mut resolved: VecDeque<HeaderSyncBatch>,
        reports: &mut Vec<PeerReport>,
    ) {
        let mut steps = 0;
        while let Some(batch) = resolved.pop_front() {
            if steps == self.max_resolution_steps {
                warn!(
                    remaining = resolved.len() + 1,
                    "dependency resolution budget spent, fetching the rest again"
                );
                for mut leftover in std::iter::once(batch).chain(resolved.drain(..)) {
                    leftover.response = None;
                    leftover.assigned_peer = None;
                    state.pending.push_back(leftover);
                }
                return;
            }
            steps += 1;

            let label = batch.to_string();
            let (outcome, accepted) = self.assemble(state, batch, &mut resolved, reports);
            debug!(batch = %label, ?outcome, accepted, "resolved parked batch");
        }
    }

    pub fn best_requested_header(&self) -> u64 {
        self.state.lock().best_requested_header
    }

    pub fn best_known_total_difficulty(&self) -> U256 {
        self.state.lock().best_known_total_difficulty
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Snapshot of the queued batches, front first.
    pub fn pending_batches(&self) -> Vec<HeaderSyncBatch> {
        self.state.lock().pending.iter().cloned().collect()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn is_in_flight(&self, id: BatchId) -> bool {
        self.state.lock().sent.contains_key(&id)
    }

    pub fn parked_len(&self) -> usize {
        self.state.lock().dependencies.len()
    }

    pub fn parked_keys(&self) -> Vec<u64> {
        self.state.lock().dependencies.keys()
    }
}
