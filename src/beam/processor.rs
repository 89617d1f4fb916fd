use crate::beam::env::ReadOnlyProcessingEnv;
use crate::beam::executor::{OneTimeProcessor, ProcessOutcome};
use crate::beam::prefetch::{self, PrefetchReport};
use crate::beam::queue::{BlockProcessingQueue, ProcessingOptions};
use crate::blockchain::{Block, BlockHeader, BlockTree};
use crate::config::BeamConfig;
use crate::state::StateReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeculativeOutcome {
    Processed,
    Skipped,
    Failed(String),
    TimedOut,
    Superseded,
}

/// Speculatively executes each new best block ahead of the canonical queue.
///
/// The speculative pass exists only to warm state caches. Its result never
/// influences whether or how the block is processed canonically.
#[derive(Clone)]
pub struct BeamBlockProcessor {
    inner: Arc<Inner>,
}

struct Inner {
    tree: Arc<dyn BlockTree>,
    reader: Arc<dyn StateReader>,
    processor: Arc<dyn OneTimeProcessor>,
    queue: Arc<dyn BlockProcessingQueue>,
    latest: watch::Sender<u64>,
    processing_timeout: Duration,
}

impl BeamBlockProcessor {
    pub fn new(
        tree: Arc<dyn BlockTree>,
        reader: Arc<dyn StateReader>,
        processor: Arc<dyn OneTimeProcessor>,
        queue: Arc<dyn BlockProcessingQueue>,
        config: &BeamConfig,
    ) -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                tree,
                reader,
                processor,
                queue,
                latest,
                processing_timeout: config.processing_timeout,
            }),
        }
    }

    /// Returns `None` when the parent header is unknown. Otherwise the block
    /// is handed to the canonical queue exactly once when the returned task
    /// completes, whatever the speculative outcome.
    pub fn on_new_best_suggested_block(&self, block: Block) -> Option<JoinHandle<SpeculativeOutcome>> {
        let Some(parent) = self.inner.tree.find_header_by_hash(block.parent_hash()) else {
            warn!(block = %block.short(), "parent header not found, block not processed");
            return None;
        };

        let mut generation = 0;
        self.inner.latest.send_modify(|latest| {
            *latest += 1;
            generation = *latest;
        });

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.process(block, parent, generation).await }))
    }

    /// Drive the processor from a channel of new best blocks. Dropping every
    /// sender ends the loop.
    pub fn spawn(self, capacity: usize) -> (mpsc::Sender<Block>, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(block) = receiver.recv().await {
                self.on_new_best_suggested_block(block);
            }
            debug!("new best block channel closed, beam processor stopped");
        });
        (sender, handle)
    }
}

impl Inner {
    async fn process(self: Arc<Self>, block: Block, parent: BlockHeader, generation: u64) -> SpeculativeOutcome {
        let label = block.short();
        let mut latest = self.latest.subscribe();

        let mut tasks = JoinSet::new();
        for task in prefetch::plan(&block, parent.state_root) {
            let reader = Arc::clone(&self.reader);
            tasks.spawn_blocking(move || task.run(reader.as_ref()));
        }
        let prefetch = tokio::spawn(drain_prefetch(tasks, label.clone()));

        let env = ReadOnlyProcessingEnv::new(Arc::clone(&self.reader), parent.state_root);
        let processor = Arc::clone(&self.processor);
        let speculative = block.clone();
        let execution = tokio::task::spawn_blocking(move || {
            let mut env = env;
            processor.process(&speculative, &mut env, ProcessingOptions::READ_ONLY_CHAIN)
        });

        let outcome = tokio::select! {
            joined = tokio::time::timeout(self.processing_timeout, execution) => match joined {
                Err(_) => SpeculativeOutcome::TimedOut,
                Ok(Err(e)) => SpeculativeOutcome::Failed(e.to_string()),
                Ok(Ok(Err(e))) => SpeculativeOutcome::Failed(e.to_string()),
                Ok(Ok(Ok(ProcessOutcome::Processed))) => SpeculativeOutcome::Processed,
                Ok(Ok(Ok(ProcessOutcome::Skipped))) => SpeculativeOutcome::Skipped,
            },
            _ = superseded(&mut latest, generation) => SpeculativeOutcome::Superseded,
        };

        match &outcome {
            SpeculativeOutcome::Processed => info!(block = %label, "speculative processing done"),
            SpeculativeOutcome::Failed(reason) => debug!(block = %label, %reason, "speculative processing failed"),
            other => debug!(block = %label, outcome = ?other, "speculative processing abandoned"),
        }

        self.queue.enqueue(block, ProcessingOptions::default());
        prefetch.abort();
        outcome
    }
}

/// Resolves once a newer block has been marked most recent.
async fn superseded(latest: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        if *latest.borrow_and_update() != generation {
            return;
        }
        if latest.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn drain_prefetch(mut tasks: JoinSet<PrefetchReport>, block: String) {
    let mut total = PrefetchReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => {
                total.resolved += report.resolved;
                total.failed += report.failed;
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => debug!(%block, error = %e, "prefetch task failed"),
        }
    }
    debug!(%block, resolved = total.resolved, failed = total.failed, "prefetch finished");
}
