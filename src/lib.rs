//! Read-ahead caching and write-back queueing for sequential packet pipelines.
//!
//! Packetflow sits between a processing stage and the storage it reads from and
//! writes to. Packets are opaque byte blobs addressed by a `usize` index; where
//! they come from and where they go is decided by two callbacks.
//!
//! # Features
//!
//! - **Read-ahead cache**: [`PacketCache`] loads packets ahead of a sequential
//!   consumer on a background thread, into a fixed-size ring arena
//! - **Write-back queue**: [`WriteQueue`] drains packets to a sink on a worker
//!   pool, lowest index first, with a byte cap that blocks or drops
//! - **Completion tracking**: [`CompletionCounter`] trees whose totals can be
//!   awaited from threads or async tasks
//! - **Configuration**: YAML-backed [`PipelineConfig`] for cache and queue tuning
//!
//! # Quick Start
//!
//! ```rust
//! use packetflow::{Enqueued, Packet, PacketCache, Result, WriteQueue};
//!
//! fn main() -> Result<()> {
//!     let mut cache = PacketCache::new(|index: usize| -> Result<Packet> {
//!         if index < 8 { Ok(Packet::new(vec![index as u8; 256])) } else { Ok(Packet::empty()) }
//!     });
//!     let queue = WriteQueue::new(|packet: &Packet, _index: usize| -> Result<usize> {
//!         Ok(packet.len())
//!     });
//!
//!     cache.start(1 << 16)?;
//!     queue.start(1 << 16, false, 2)?;
//!
//!     for index in 0..8 {
//!         let input = cache.get(index)?;
//!         let output = Packet::from_slice(input.as_bytes());
//!         assert!(!queue.enqueue(&output, index)?.is_dropped());
//!     }
//!
//!     queue.stop()?;
//!     cache.stop();
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod provider;
pub mod stats;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Pipeline components
pub mod cache;
pub mod completion;
pub mod queue;

// Core exports
pub use error::*;
pub use types::*;

pub use config::{CacheConfig, MAX_BUFFER_BYTES, PipelineConfig, QueueConfig};
pub use provider::{PacketLoader, PacketSink};
pub use stats::{CacheStatsSnapshot, QueueStatsSnapshot};

// Main API exports
pub use cache::{CacheBuilder, PacketCache};
pub use completion::{CompletionCell, CompletionCounter};
pub use queue::{QueueBuilder, WriteQueue};
