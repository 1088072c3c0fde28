//! Callback traits for packet sources and destinations
//!
//! The cache and the queue never know where packets come from or go to. They
//! reach the outside world only through these two traits, which closures
//! implement automatically.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::{Packet, PipelineError, Result};

/// Source of packets, addressed by index
///
/// Implementations must return the same content every time a given index is
/// loaded, since the cache may load an index again after a resync. An empty
/// packet ends the sequence for prefetching.
///
/// The cache never calls `load` concurrently with itself.
pub trait PacketLoader: Send + Sync + 'static {
    /// Load the packet at `index`
    ///
    /// Returns:
    /// - `Ok(packet)` - Packet content (empty past the end of the sequence)
    /// - `Err(e)` - Unrecoverable failure; the cache halts and reports it
    fn load(&self, index: usize) -> Result<Packet>;
}

impl<F> PacketLoader for F
where
    F: Fn(usize) -> Result<Packet> + Send + Sync + 'static,
{
    fn load(&self, index: usize) -> Result<Packet> {
        self(index)
    }
}

/// Destination for packets, addressed by index
///
/// With more than one queue worker, `write` may run concurrently for
/// different indices.
pub trait PacketSink: Send + Sync + 'static {
    /// Persist `packet`, returning a caller-defined position or status
    fn write(&self, packet: &Packet, index: usize) -> Result<usize>;
}

impl<F> PacketSink for F
where
    F: Fn(&Packet, usize) -> Result<usize> + Send + Sync + 'static,
{
    fn write(&self, packet: &Packet, index: usize) -> Result<usize> {
        self(packet, index)
    }
}

/// Call a loader, turning a panic into a callback error
pub(crate) fn guarded_load(loader: &dyn PacketLoader, index: usize) -> Result<Packet> {
    catch_unwind(AssertUnwindSafe(|| loader.load(index)))
        .unwrap_or_else(|payload| Err(panic_error("load", index, payload)))
}

/// Call a sink, turning a panic into a callback error
pub(crate) fn guarded_write(sink: &dyn PacketSink, packet: &Packet, index: usize) -> Result<usize> {
    catch_unwind(AssertUnwindSafe(|| sink.write(packet, index)))
        .unwrap_or_else(|payload| Err(panic_error("write", index, payload)))
}

fn panic_error(operation: &'static str, index: usize, payload: Box<dyn Any + Send>) -> PipelineError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    };
    PipelineError::callback_failed(operation, index, format!("panicked: {message}"))
}
