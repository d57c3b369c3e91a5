//! Scheduling and indexing primitives for a deduplicating block-storage
//! engine.
//!
//! The engine's I/O path is built around per-thread work queues: each worker
//! owns its data structures outright and other threads hand it work through
//! message passing, so none of the structures here carry internal locks.
//! This crate collects the primitives that path is built from:
//!
//! - [`PriorityTable`]: FIFO buckets indexed by priority with a bit-vector
//!   search, for O(1) highest-priority-first scheduling of pending work.
//! - [`FunnelQueue`]: a multi-producer single-consumer queue where producers
//!   enqueue with one atomic exchange, used to funnel requests to a worker.
//! - [`IntMap`]: a hopscotch hash map from 64-bit block numbers to values,
//!   with bounded probe lengths and no tombstone buildup.
//! - [`LinkedSlab`]: the index-linked list arena underlying the priority
//!   table, usable on its own where several FIFO lists share one allocation.
//!
//! The crate is `no_std` (with `alloc`) so the primitives can serve kernel
//! style and embedded targets as well as hosted ones. Diagnostics go through
//! the `log` facade; without a logger installed they cost nothing.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// =============================================================================
// MODULES
// =============================================================================

pub mod error;
pub mod funnel_queue;
pub mod int_map;
pub mod list;
pub mod priority_table;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use error::{Error, Result};
pub use funnel_queue::{FunnelConsumer, FunnelProducer, FunnelQueue};
pub use int_map::IntMap;
pub use list::{EntryId, LinkedSlab};
pub use priority_table::{PriorityTable, MAX_PRIORITY};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
