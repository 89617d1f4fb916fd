#![forbid(unsafe_code)]
//! Header sync and beam processing over simulated peers

use alloy_primitives::{Address, B256, U256};
use beamsync::beam::{BeamBlockProcessor, ChannelProcessingQueue, ReadOnlyChainProcessor};
use beamsync::blockchain::{build_chain, Block, BlockHeader, BlockTree, DifficultyValidator, InMemoryBlockTree, Transaction};
use beamsync::cache::CachingStateReader;
use beamsync::config::load_config;
use beamsync::error::{Result, SyncError};
use beamsync::logging;
use beamsync::state::{Account, InMemoryStateDb};
use beamsync::sync::{BlockRequestFeed, HeaderFetcher, HeaderSyncDriver, PeerId, PeerInfo, SyncPeerPool};
use beamsync::txpool::{InMemoryTxPool, PendingTxSelector};
use chrono::Utc;
use clap::Parser;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "beamsync.toml")]
    config: PathBuf,
    /// Length of the canonical chain served by the peers
    #[arg(long, default_value_t = 1_000)]
    blocks: usize,
    /// Number of simulated peers
    #[arg(long, default_value_t = 3)]
    peers: usize,
    /// Make the last peer serve a heavier fork starting after this block
    #[arg(long)]
    fork_at: Option<u64>,
    /// Upper bound of the random response latency, in milliseconds
    #[arg(long, default_value_t = 20)]
    jitter_ms: u64,
    /// Blocks produced at the tip once headers are synced
    #[arg(long, default_value_t = 8)]
    tip_blocks: usize,
}

struct SimFetcher {
    chains: HashMap<PeerId, Arc<Vec<BlockHeader>>>,
    jitter_ms: u64,
}

impl HeaderFetcher for SimFetcher {
    async fn fetch_headers(&self, peer: &PeerId, start_number: u64, count: u32) -> Result<Vec<BlockHeader>> {
        let delay = rand::thread_rng().gen_range(0..=self.jitter_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let chain = self
            .chains
            .get(peer)
            .ok_or_else(|| SyncError::PeerError(format!("unknown peer {}", peer)))?;
        let start = start_number as usize;
        if start >= chain.len() {
            return Ok(Vec::new());
        }
        let end = (start + count as usize).min(chain.len());
        Ok(chain[start..end].to_vec())
    }
}

const ALICE: Address = Address::repeat_byte(0xa1);
const BOB: Address = Address::repeat_byte(0xb0);

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.logging);

    let started = Utc::now();
    let clock = Instant::now();
    info!(started = %started.to_rfc3339(), blocks = cli.blocks, peers = cli.peers, "simulation starting");

    // Chains served by the peers, genesis included.
    let genesis = BlockHeader::genesis(U256::from(1u64));
    let mut canonical = vec![genesis.clone()];
    canonical.extend(build_chain(&genesis, cli.blocks, U256::from(2u64), 0));
    let canonical = Arc::new(canonical);

    let fork = cli.fork_at.map(|at| {
        let at = (at as usize).min(cli.blocks);
        let mut fork = canonical[..=at].to_vec();
        fork.extend(build_chain(&canonical[at], cli.blocks - at, U256::from(3u64), 1));
        Arc::new(fork)
    });

    let pool = Arc::new(SyncPeerPool::new(config.sync.max_peer_failures));
    let mut chains = HashMap::new();
    let mut peer_ids = Vec::new();
    for index in 0..cli.peers.max(1) {
        let id = PeerId(format!("peer-{}", index));
        let served = match &fork {
            Some(fork) if index + 1 == cli.peers.max(1) => Arc::clone(fork),
            _ => Arc::clone(&canonical),
        };
        let head_td = chain_weight(&served);
        pool.upsert_peer(PeerInfo::new(id.clone(), served.len() as u64 - 1, head_td));
        chains.insert(id.clone(), served);
        peer_ids.push(id);
    }
    let target = fork.as_ref().unwrap_or(&canonical);
    let target_head = target[target.len() - 1].hash();

    let tree = Arc::new(InMemoryBlockTree::new(genesis.clone(), Arc::new(DifficultyValidator)));
    let feed = Arc::new(BlockRequestFeed::new(tree.clone(), pool.clone(), &config.sync));
    let fetcher = Arc::new(SimFetcher {
        chains,
        jitter_ms: cli.jitter_ms,
    });
    let driver = Arc::new(HeaderSyncDriver::new(feed.clone(), pool.clone(), fetcher, &config.sync));

    let (stop, shutdown) = watch::channel(false);
    let sessions = tokio::spawn(driver.run(peer_ids, shutdown));

    let synced = tokio::time::timeout(Duration::from_secs(120), async {
        let mut last_logged = 0;
        loop {
            let best = tree.best_suggested();
            if best.as_ref().map(|h| h.hash()) == Some(target_head) {
                break;
            }
            let number = best.map(|h| h.number).unwrap_or(0);
            if number >= last_logged + 200 {
                info!(best = number, parked = feed.parked_len(), pending = feed.pending_len(), "sync progress");
                last_logged = number;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .is_ok();

    let _ = stop.send(true);
    let stats = sessions.await?;
    if synced {
        info!(
            batches = stats.batches,
            headers = stats.headers_accepted,
            timeouts = stats.timeouts,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "headers synced"
        );
    } else {
        warn!(headers = stats.headers_accepted, "header sync did not reach the expected head");
    }

    // Follow the tip with beam processing.
    let db = Arc::new(InMemoryStateDb::new());
    let head = tree
        .best_suggested()
        .ok_or(SyncError::HeaderNotFound(target_head))?;
    seed_state(&db, head.state_root);

    let cache = Arc::new(CachingStateReader::new(db.clone(), config.beam.state_cache_capacity));
    let (queue, mut canonical_queue) = ChannelProcessingQueue::new();
    let beam = BeamBlockProcessor::new(
        tree.clone(),
        cache.clone(),
        Arc::new(ReadOnlyChainProcessor::new(Arc::new(DifficultyValidator))),
        Arc::new(queue),
        &config.beam,
    );
    let (new_best, beam_loop) = beam.spawn(config.beam.block_channel_capacity);
    tree.subscribe_new_best(new_best);

    let txpool = Arc::new(InMemoryTxPool::new());
    let selector = PendingTxSelector::new(txpool.clone(), cache.clone(), &config.txpool);

    let mut parent = head;
    for index in 0..cli.tip_blocks {
        for nonce in 0..4 {
            txpool.add_transaction(Transaction::transfer(ALICE, BOB, nonce, U256::from(1u64)));
        }
        let transactions = match selector.select_transactions(parent.state_root, parent.gas_limit) {
            Ok(selected) => selected,
            Err(e) => {
                warn!(error = %e, "parent state unavailable, producing an empty block");
                Vec::new()
            }
        };

        let mut header = BlockHeader::new(parent.number + 1, parent.hash(), U256::from(2u64));
        header.timestamp = Utc::now().timestamp().max(0) as u64;
        header.beneficiary = Some(Address::repeat_byte(0xee));
        header.state_root = B256::with_last_byte(index as u8 + 1);
        // Only every other snapshot is available locally.
        if index % 2 == 0 {
            seed_state(&db, header.state_root);
        }

        let block = Block::new(header, transactions);
        info!(block = %block.short(), txs = block.transactions.len(), "new tip block");
        tree.suggest_block(block.clone());
        parent = block.header;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tree.unsubscribe_new_best();
    beam_loop.await?;

    let mut delivered = 0;
    while delivered < cli.tip_blocks {
        match tokio::time::timeout(config.beam.processing_timeout, canonical_queue.recv()).await {
            Ok(Some(queued)) => {
                delivered += 1;
                info!(block = %queued.block.short(), "canonical queue received block");
            }
            Ok(None) | Err(_) => break,
        }
    }

    let cache_stats = cache.stats();
    info!(
        delivered,
        cache_hits = cache_stats.hits,
        cache_misses = cache_stats.misses,
        cached_accounts = cache_stats.accounts,
        finished = %Utc::now().to_rfc3339(),
        "simulation finished"
    );
    Ok(())
}

fn chain_weight(chain: &[BlockHeader]) -> U256 {
    chain
        .iter()
        .fold(U256::ZERO, |total, header| total.saturating_add(header.difficulty))
}

fn seed_state(db: &InMemoryStateDb, root: B256) {
    db.insert_account(root, ALICE, Account::with_balance(U256::from(10_000_000u64)));
    db.insert_account(root, BOB, Account::default());
}
