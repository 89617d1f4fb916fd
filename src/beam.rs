//! Speculative ("beam") block processing
//!
//! Every new best suggested block is prefetched and executed once against a
//! throwaway environment bound to its parent's state, then handed to the
//! canonical processing queue:
//! - Prefetch planning for miner and transaction accounts ([`prefetch`])
//! - The disposable execution environment ([`env`])
//! - One-shot execution ([`executor`])
//! - The canonical queue seam ([`queue`])
//! - Orchestration and supersession ([`processor`])

pub mod env;
pub mod executor;
pub mod prefetch;
pub mod processor;
pub mod queue;

pub use env::ReadOnlyProcessingEnv;
pub use executor::{OneTimeProcessor, ProcessOutcome, ReadOnlyChainProcessor};
pub use prefetch::{PrefetchItem, PrefetchKind, PrefetchReport, PrefetchTask};
pub use processor::{BeamBlockProcessor, SpeculativeOutcome};
pub use queue::{BlockProcessingQueue, ChannelProcessingQueue, ProcessingOptions, QueuedBlock};
