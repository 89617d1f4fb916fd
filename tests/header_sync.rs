//! Integration tests for header synchronization

use alloy_primitives::U256;
use beamsync::blockchain::{build_chain, AlwaysValid, BlockHeader, BlockTree, InMemoryBlockTree};
use beamsync::config::SyncConfig;
use beamsync::error::{Result as SyncResult, SyncError};
use beamsync::sync::{
    BatchOutcome, BlockRequestFeed, HeaderFetcher, HeaderSyncBatch, HeaderSyncDriver, PeerId, PeerInfo,
    SyncPeerPool,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Genesis plus `count` headers of difficulty 2.
fn chain(count: usize) -> Vec<BlockHeader> {
    let genesis = BlockHeader::genesis(U256::from(1u64));
    let mut headers = vec![genesis.clone()];
    headers.extend(build_chain(&genesis, count, U256::from(2u64), 0));
    headers
}

fn weight(headers: &[BlockHeader]) -> U256 {
    headers.iter().fold(U256::ZERO, |td, h| td + h.difficulty)
}

fn respond(batch: &mut HeaderSyncBatch, headers: &[BlockHeader], peer: &PeerInfo) {
    let start = batch.start_number as usize;
    let end = (start + batch.request_size as usize).min(headers.len());
    batch.assign(peer.clone());
    batch.set_response(headers[start..end].to_vec());
}

#[test]
fn test_single_peer_sync_by_hand() -> Result<(), Box<dyn std::error::Error>> {
    let headers = chain(600);
    let tree = Arc::new(InMemoryBlockTree::new(headers[0].clone(), Arc::new(AlwaysValid)));
    let pool = Arc::new(SyncPeerPool::new(3));
    let peer = PeerInfo::new("solo", 600, weight(&headers));
    pool.upsert_peer(peer.clone());
    let feed = BlockRequestFeed::new(tree.clone(), pool.clone(), &SyncConfig::default());

    let mut rounds = 0;
    while let Some(mut batch) = feed.prepare_request(0) {
        respond(&mut batch, &headers, &peer);
        let (outcome, _) = feed.handle_response(batch);
        assert_ne!(outcome, BatchOutcome::Rejected);
        rounds += 1;
        assert!(rounds < 10, "sync did not converge");
    }

    let best = tree.best_suggested().ok_or("no best header")?;
    assert_eq!(best.hash(), headers[600].hash());
    assert_eq!(feed.in_flight_len(), 0);
    assert_eq!(feed.parked_len(), 0);
    assert!(!pool.is_unreliable(&peer.id));
    Ok(())
}

#[test]
fn test_out_of_order_responses_are_parked_then_connected() -> Result<(), Box<dyn std::error::Error>> {
    let headers = chain(300);
    let tree = Arc::new(InMemoryBlockTree::new(headers[0].clone(), Arc::new(AlwaysValid)));
    let pool = Arc::new(SyncPeerPool::new(3));
    let peer = PeerInfo::new("solo", 300, weight(&headers));
    pool.upsert_peer(peer.clone());
    let feed = BlockRequestFeed::new(tree.clone(), pool.clone(), &SyncConfig::default());

    let mut first = feed.prepare_request(0).ok_or("expected a first batch")?;
    let mut second = feed.prepare_request(0).ok_or("expected a second batch")?;
    assert_eq!((first.start_number, first.request_size), (0, 256));
    assert_eq!((second.start_number, second.request_size), (255, 46));

    respond(&mut second, &headers, &peer);
    assert_eq!(feed.handle_response(second), (BatchOutcome::Parked, 0));
    assert_eq!(feed.parked_keys(), vec![254]);

    respond(&mut first, &headers, &peer);
    assert_eq!(feed.handle_response(first), (BatchOutcome::Complete, 256));

    assert_eq!(feed.parked_len(), 0);
    let best = tree.best_suggested().ok_or("no best header")?;
    assert_eq!(best.number, 300);
    assert!(feed.prepare_request(0).is_none());
    Ok(())
}

struct ForkingFetcher {
    chains: HashMap<PeerId, Vec<BlockHeader>>,
}

impl HeaderFetcher for ForkingFetcher {
    async fn fetch_headers(&self, peer: &PeerId, start_number: u64, count: u32) -> SyncResult<Vec<BlockHeader>> {
        let chain = self
            .chains
            .get(peer)
            .ok_or_else(|| SyncError::PeerError(format!("unknown peer {}", peer)))?;
        let start = (start_number as usize).min(chain.len());
        let end = (start + count as usize).min(chain.len());
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(chain[start..end].to_vec())
    }
}

#[tokio::test]
async fn test_sessions_follow_heavier_fork() -> Result<(), Box<dyn std::error::Error>> {
    tokio::time::timeout(Duration::from_secs(20), async {
        let canonical = chain(300);
        let mut fork = canonical[..=100].to_vec();
        fork.extend(build_chain(&canonical[100], 200, U256::from(3u64), 1));
        let fork_head = fork[300].hash();

        let tree = Arc::new(InMemoryBlockTree::new(canonical[0].clone(), Arc::new(AlwaysValid)));
        let pool = Arc::new(SyncPeerPool::new(10));
        pool.upsert_peer(PeerInfo::new("light", 300, weight(&canonical)));
        pool.upsert_peer(PeerInfo::new("heavy", 300, weight(&fork)));

        let config = SyncConfig {
            idle_interval: Duration::from_millis(5),
            ..SyncConfig::default()
        };
        let feed = Arc::new(BlockRequestFeed::new(tree.clone(), pool.clone(), &config));
        let mut chains = HashMap::new();
        chains.insert(PeerId::from("light"), canonical);
        chains.insert(PeerId::from("heavy"), fork);
        let driver = Arc::new(HeaderSyncDriver::new(
            feed.clone(),
            pool.clone(),
            Arc::new(ForkingFetcher { chains }),
            &config,
        ));

        let (stop, shutdown) = watch::channel(false);
        let sessions = tokio::spawn(driver.run(vec!["light".into(), "heavy".into()], shutdown));

        while tree.best_suggested().map(|h| h.hash()) != Some(fork_head) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.send(true)?;
        let stats = sessions.await?;

        assert!(stats.headers_accepted >= 300);
        assert!(feed.prepare_request(0).is_none());
        Ok::<(), Box<dyn std::error::Error>>(())
    })
    .await
    .expect("test_sessions_follow_heavier_fork timed out")
}
