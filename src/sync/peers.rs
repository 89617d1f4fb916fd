use alloy_primitives::U256;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId(id.to_string())
    }
}

/// What a peer advertises about its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub head_number: u64,
    pub total_difficulty: U256,
}

impl PeerInfo {
    pub fn new(id: impl Into<PeerId>, head_number: u64, total_difficulty: U256) -> Self {
        Self {
            id: id.into(),
            head_number,
            total_difficulty,
        }
    }
}

/// The peer pool collaborator: ranking lives behind it, the sync feed only
/// reads advertisements and files reports.
pub trait PeerPool: Send + Sync {
    fn all_peers(&self) -> Vec<PeerInfo>;
    /// The peer sent data that failed continuity, alignment or validation.
    fn report_invalid(&self, peer: &PeerId);
    /// The peer answered but nothing it sent moved the chain forward.
    fn report_no_progress(&self, peer: &PeerId);
}

/// Advertisement plus the reports filed against a peer.
#[derive(Debug, Clone)]
pub struct PeerSyncInfo {
    pub info: PeerInfo,
    pub invalid_reports: u32,
    pub no_progress_reports: u32,
}

impl PeerSyncInfo {
    pub fn new(info: PeerInfo) -> Self {
        Self {
            info,
            invalid_reports: 0,
            no_progress_reports: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.invalid_reports + self.no_progress_reports
    }
}

/// Peer registry that tracks advertisements and penalties. Peers whose
/// accumulated reports reach `max_failures` stop being offered.
pub struct SyncPeerPool {
    peers: RwLock<HashMap<PeerId, PeerSyncInfo>>,
    max_failures: u32,
}

impl SyncPeerPool {
    pub fn new(max_failures: u32) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_failures,
        }
    }

    /// Register a peer, or refresh its advertisement if already known.
    pub fn upsert_peer(&self, info: PeerInfo) {
        let mut peers = self.peers.write();
        match peers.get_mut(&info.id) {
            Some(peer) => peer.info = info,
            None => {
                debug!(peer = %info.id, head = info.head_number, "peer registered");
                peers.insert(info.id.clone(), PeerSyncInfo::new(info));
            }
        }
    }

    pub fn remove_peer(&self, peer: &PeerId) -> Option<PeerSyncInfo> {
        self.peers.write().remove(peer)
    }

    pub fn peer_info(&self, peer: &PeerId) -> Option<PeerSyncInfo> {
        self.peers.read().get(peer).cloned()
    }

    pub fn is_unreliable(&self, peer: &PeerId) -> bool {
        self.peers
            .read()
            .get(peer)
            .map(|p| p.failures() >= self.max_failures)
            .unwrap_or(false)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    fn penalise(&self, peer: &PeerId, apply: impl FnOnce(&mut PeerSyncInfo)) {
        let mut peers = self.peers.write();
        if let Some(info) = peers.get_mut(peer) {
            apply(info);
            if info.failures() == self.max_failures {
                warn!(peer = %peer, "peer marked as unreliable");
            }
        }
    }
}

impl PeerPool for SyncPeerPool {
    fn all_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .values()
            .filter(|p| p.failures() < self.max_failures)
            .map(|p| p.info.clone())
            .collect()
    }

    fn report_invalid(&self, peer: &PeerId) {
        debug!(peer = %peer, "peer sent invalid data");
        self.penalise(peer, |info| info.invalid_reports += 1);
    }

    fn report_no_progress(&self, peer: &PeerId) {
        debug!(peer = %peer, "peer made no sync progress");
        self.penalise(peer, |info| info.no_progress_reports += 1);
    }
}
