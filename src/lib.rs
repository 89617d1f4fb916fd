//! beamsync - header synchronization and speculative block processing
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Chain
//! - [`blockchain`] - Headers, blocks, the block tree and validation
//!
//! ## Synchronization
//! - [`sync`] - Batch scheduling, response assembly and peer sessions
//!
//! ## Speculative Processing
//! - [`beam`] - Prefetch and one-shot execution ahead of the canonical queue
//!
//! ## State
//! - [`state`] - State snapshot readers
//! - [`cache`] - Caching state reader
//! - [`txpool`] - Pending transactions and block-template selection
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`logging`] - Tracing subscriber setup

#![forbid(unsafe_code)]

// ============================================================================
// Chain
// ============================================================================
pub mod blockchain;

// ============================================================================
// Synchronization
// ============================================================================
pub mod sync;

// ============================================================================
// Speculative Processing
// ============================================================================
pub mod beam;

// ============================================================================
// State
// ============================================================================
pub mod cache;
pub mod state;
pub mod txpool;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod logging;
