use crate::blockchain::BlockHeader;
use crate::sync::peers::PeerInfo;
use crate::sync::MAX_BATCH;
use alloy_primitives::U256;
use std::fmt;

/// Feed-unique batch identifier; identity for sent-set membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A contiguous range of headers requested from one peer.
#[derive(Debug, Clone)]
pub struct HeaderSyncBatch {
    pub id: BatchId,
    pub start_number: u64,
    pub request_size: u32,
    /// `None` until a peer answers. Positions may be `None` when the peer
    /// returned fewer headers than requested.
    pub response: Option<Vec<Option<BlockHeader>>>,
    pub is_reorg_batch: bool,
    /// Only worth accepting from a peer claiming at least this much weight.
    pub min_total_difficulty: Option<U256>,
    pub assigned_peer: Option<PeerInfo>,
}

impl HeaderSyncBatch {
    /// `request_size` is clamped to `1..=MAX_BATCH`.
    pub fn new(id: BatchId, start_number: u64, request_size: u32) -> Self {
        Self {
            id,
            start_number,
            request_size: request_size.clamp(1, MAX_BATCH),
            response: None,
            is_reorg_batch: false,
            min_total_difficulty: None,
            assigned_peer: None,
        }
    }

    pub fn reorg(id: BatchId, start_number: u64, request_size: u32, min_total_difficulty: U256) -> Self {
        let mut batch = Self::new(id, start_number, request_size);
        batch.is_reorg_batch = true;
        batch.min_total_difficulty = Some(min_total_difficulty);
        batch
    }

    pub fn end_number(&self) -> u64 {
        self.start_number + u64::from(self.request_size) - 1
    }

    pub fn assign(&mut self, peer: PeerInfo) {
        self.assigned_peer = Some(peer);
    }

    /// Attach the headers a peer returned.
    pub fn set_response(&mut self, headers: Vec<BlockHeader>) {
        self.response = Some(headers.into_iter().map(Some).collect());
    }

    /// Whether `peer` advertises enough weight to serve this batch.
    pub fn accepts_peer(&self, peer: &PeerInfo) -> bool {
        self.min_total_difficulty
            .map(|min| peer.total_difficulty >= min)
            .unwrap_or(true)
    }
}

impl fmt::Display for HeaderSyncBatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "batch {} [{}..={}]{}",
            self.id,
            self.start_number,
            self.end_number(),
            if self.is_reorg_batch { " reorg" } else { "" }
        )
    }
}

/// How a response was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every requested header was accepted.
    Complete,
    /// Some headers were accepted; the remainder was queued again.
    Partial,
    /// Nothing was accepted and nothing was parked.
    Rejected,
    /// The first header's parent is unknown; the batch waits in the
    /// dependency index.
    Parked,
    /// The peer returned no payload; the batch was queued again unchanged.
    Empty,
    /// The first header's parent is unknown but the dependency index is
    /// full; the range was queued again.
    Deferred,
}
