use crate::blockchain::Block;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingOptions {
    /// Execute without committing anything.
    pub read_only_chain: bool,
}

impl ProcessingOptions {
    pub const NONE: ProcessingOptions = ProcessingOptions {
        read_only_chain: false,
    };
    pub const READ_ONLY_CHAIN: ProcessingOptions = ProcessingOptions {
        read_only_chain: true,
    };
}

/// The canonical, strictly ordered processing pipeline. Fire-and-forget:
/// ordering and commit decisions belong to the queue.
pub trait BlockProcessingQueue: Send + Sync {
    fn enqueue(&self, block: Block, options: ProcessingOptions);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBlock {
    pub block: Block,
    pub options: ProcessingOptions,
}

/// Forwards enqueued blocks to whoever owns the receiving end.
#[derive(Debug, Clone)]
pub struct ChannelProcessingQueue {
    sender: mpsc::UnboundedSender<QueuedBlock>,
}

impl ChannelProcessingQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedBlock>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl BlockProcessingQueue for ChannelProcessingQueue {
    fn enqueue(&self, block: Block, options: ProcessingOptions) {
        let number = block.number();
        if self.sender.send(QueuedBlock { block, options }).is_err() {
            warn!(number, "canonical queue closed, block dropped");
        }
    }
}
