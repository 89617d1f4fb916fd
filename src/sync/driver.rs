use crate::blockchain::BlockHeader;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::sync::batch::{BatchOutcome, HeaderSyncBatch};
use crate::sync::feed::BlockRequestFeed;
use crate::sync::peers::{PeerId, PeerInfo, PeerPool};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Transport for header requests. Wire encoding lives behind this seam.
pub trait HeaderFetcher: Send + Sync + 'static {
    fn fetch_headers(
        &self,
        peer: &PeerId,
        start_number: u64,
        count: u32,
    ) -> impl Future<Output = Result<Vec<BlockHeader>>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub batches: u64,
    pub headers_accepted: u64,
    pub timeouts: u64,
}

/// Hands an unanswered batch back to the feed when a session unwinds or is
/// cancelled mid-request.
struct ReturnOnDrop<'a> {
    feed: &'a BlockRequestFeed,
    batch: Option<HeaderSyncBatch>,
}

impl<'a> ReturnOnDrop<'a> {
    fn new(feed: &'a BlockRequestFeed, batch: &HeaderSyncBatch) -> Self {
        Self {
            feed,
            batch: Some(batch.clone()),
        }
    }

    fn disarm(mut self) {
        self.batch = None;
    }
}

impl Drop for ReturnOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(mut batch) = self.batch.take() {
            batch.response = None;
            debug!(%batch, "session ended mid-request, returning batch");
            self.feed.handle_response(batch);
        }
    }
}

/// Runs one request/response loop per peer against a shared feed.
pub struct HeaderSyncDriver<F: HeaderFetcher> {
    feed: Arc<BlockRequestFeed>,
    peers: Arc<dyn PeerPool>,
    fetcher: Arc<F>,
    threshold: u32,
    idle_interval: Duration,
    request_timeout: Duration,
}

impl<F: HeaderFetcher> HeaderSyncDriver<F> {
    pub fn new(
        feed: Arc<BlockRequestFeed>,
        peers: Arc<dyn PeerPool>,
        fetcher: Arc<F>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            feed,
            peers,
            fetcher,
            threshold: config.request_threshold,
            idle_interval: config.idle_interval,
            request_timeout: config.request_timeout,
        }
    }

    pub fn feed(&self) -> &Arc<BlockRequestFeed> {
        &self.feed
    }

    /// Spawn a session per peer and wait for all of them to finish. Sessions
    /// end when `shutdown` flips to `true` or their peer leaves the pool.
    pub async fn run(self: Arc<Self>, peers: Vec<PeerId>, shutdown: watch::Receiver<bool>) -> SessionStats {
        let mut sessions = JoinSet::new();
        for peer in peers {
            let driver = Arc::clone(&self);
            let shutdown = shutdown.clone();
            sessions.spawn(async move { driver.run_session(peer, shutdown).await });
        }

        let mut total = SessionStats::default();
        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok(stats) => {
                    total.batches += stats.batches;
                    total.headers_accepted += stats.headers_accepted;
                    total.timeouts += stats.timeouts;
                }
                Err(e) => warn!(error = %e, "sync session panicked"),
            }
        }
        total
    }

    pub async fn run_session(&self, peer_id: PeerId, mut shutdown: watch::Receiver<bool>) -> SessionStats {
        let mut stats = SessionStats::default();
        debug!(peer = %peer_id, "sync session started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let Some(peer) = self.current_advertisement(&peer_id) else {
                debug!(peer = %peer_id, "peer left the pool, ending session");
                break;
            };

            let Some(mut batch) = self.feed.prepare_request(self.threshold) else {
                if self.idle(&mut shutdown).await {
                    break;
                }
                continue;
            };

            if !batch.accepts_peer(&peer) {
                // Hand it back untouched so a heavier peer can take it.
                self.feed.handle_response(batch);
                if self.idle(&mut shutdown).await {
                    break;
                }
                continue;
            }

            let start = batch.start_number;
            let size = batch.request_size;
            batch.assign(peer.clone());

            let guard = ReturnOnDrop::new(&self.feed, &batch);
            let fetch = self.fetcher.fetch_headers(&peer.id, start, size);
            let fetched = tokio::time::timeout(self.request_timeout, fetch).await;
            guard.disarm();
            match fetched {
                Ok(Ok(headers)) => batch.set_response(headers),
                Ok(Err(e)) => debug!(peer = %peer.id, error = %e, "header request failed"),
                Err(_) => {
                    stats.timeouts += 1;
                    debug!(peer = %peer.id, start, size, "header request timed out");
                }
            }

            let (outcome, accepted) = self.feed.handle_response(batch);
            stats.batches += 1;
            stats.headers_accepted += u64::from(accepted);

            let backoff = matches!(outcome, BatchOutcome::Empty | BatchOutcome::Deferred);
            if backoff && self.idle(&mut shutdown).await {
                break;
            }
        }

        info!(
            peer = %peer_id,
            batches = stats.batches,
            headers = stats.headers_accepted,
            "sync session finished"
        );
        stats
    }

    fn current_advertisement(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.peers.all_peers().into_iter().find(|p| &p.id == peer_id)
    }

    /// Sleep for the idle interval. Returns `true` when shutdown was requested.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.idle_interval) => *shutdown.borrow(),
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}
