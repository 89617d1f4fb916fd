//! Header synchronization for beamsync
//!
//! This module provides the peer-driven header acquisition pipeline:
//! - Batch scheduling with reorg detection ([`feed`])
//! - Response assembly and peer fault reporting ([`feed`])
//! - Parking of batches whose parent is not yet connected ([`dependencies`])
//! - Peer bookkeeping and penalties ([`peers`])
//! - Per-peer session loops ([`driver`])

pub mod batch;
pub mod dependencies;
pub mod driver;
pub mod feed;
pub mod peers;

pub use batch::{BatchId, BatchOutcome, HeaderSyncBatch};
pub use dependencies::HeaderDependencyIndex;
pub use driver::{HeaderFetcher, HeaderSyncDriver};
pub use feed::BlockRequestFeed;
pub use peers::{PeerId, PeerInfo, PeerPool, SyncPeerPool};

/// Upper bound on headers requested in a single batch.
pub const MAX_BATCH: u32 = 256;
