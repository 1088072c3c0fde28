//! Deterministic loaders and sinks for tests and benchmarks
//!
//! [`SequenceLoader`] serves a fixed number of synthetic packets and counts its
//! calls. [`RecordingSink`] records write order and can hold one index at a
//! gate, which is how queue tests pin a worker in place while they fill the
//! pending map.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::provider::{PacketLoader, PacketSink};
use crate::{Packet, PipelineError, Result};

/// Loader over `count` synthetic packets of `size` bytes each
///
/// Indices at or past `count` load empty, ending the sequence.
#[derive(Debug)]
pub struct SequenceLoader {
    count: usize,
    size: usize,
    failing_at: Option<usize>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl SequenceLoader {
    pub fn new(count: usize, size: usize) -> Self {
        Self { count, size, failing_at: None, delay: None, calls: AtomicUsize::new(0) }
    }

    /// Fail with a callback error when `index` is loaded
    pub fn failing_at(mut self, index: usize) -> Self {
        self.failing_at = Some(index);
        self
    }

    /// Sleep this long in every load
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The packet this loader returns for `index`
    ///
    /// Content starts with the little-endian index so that any two indices
    /// differ whenever `size` allows it.
    pub fn packet(index: usize, size: usize) -> Packet {
        let mut bytes = vec![(index % 251) as u8; size];
        let tag = (index as u64).to_le_bytes();
        let n = size.min(tag.len());
        bytes[..n].copy_from_slice(&tag[..n]);
        Packet::new(bytes)
    }

    /// Number of `load` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PacketLoader for SequenceLoader {
    fn load(&self, index: usize) -> Result<Packet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing_at == Some(index) {
            return Err(PipelineError::callback_failed("load", index, "synthetic load failure"));
        }
        if index >= self.count {
            return Ok(Packet::empty());
        }
        Ok(Self::packet(index, self.size))
    }
}

#[derive(Debug, Default)]
struct SinkState {
    written: Vec<usize>,
    entered: Vec<usize>,
    gate_open: bool,
}

#[derive(Debug, Default)]
struct SinkInner {
    state: Mutex<SinkState>,
    changed: Condvar,
    gate: Option<usize>,
    failing_at: Option<usize>,
    delay: Option<Duration>,
}

/// Sink that records the order of successful writes
///
/// Clones share the same record. A write returns the packet length.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<SinkInner>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the write of `index` until [`release`](Self::release) is called
    pub fn gated_at(index: usize) -> Self {
        Self::from_inner(SinkInner { gate: Some(index), ..SinkInner::default() })
    }

    /// Fail with a callback error when `index` is written
    pub fn failing_at(index: usize) -> Self {
        Self::from_inner(SinkInner { failing_at: Some(index), ..SinkInner::default() })
    }

    /// Sleep this long in every write
    pub fn with_delay(delay: Duration) -> Self {
        Self::from_inner(SinkInner { delay: Some(delay), ..SinkInner::default() })
    }

    fn from_inner(inner: SinkInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// Open the gate
    pub fn release(&self) {
        self.inner.state.lock().gate_open = true;
        self.inner.changed.notify_all();
    }

    /// Indices in the order their writes completed
    pub fn written(&self) -> Vec<usize> {
        self.inner.state.lock().written.clone()
    }

    /// Wait until a write of `index` has begun
    pub fn wait_entered(&self, index: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.entered.contains(&index))
    }

    /// Wait until at least `count` writes have completed
    pub fn wait_written(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.written.len() >= count)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&SinkState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !done(&state) {
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return done(&state);
            }
        }
        true
    }
}

impl PacketSink for RecordingSink {
    fn write(&self, packet: &Packet, index: usize) -> Result<usize> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            state.entered.push(index);
            inner.changed.notify_all();
            if inner.gate == Some(index) {
                while !state.gate_open {
                    inner.changed.wait(&mut state);
                }
            }
        }
        if let Some(delay) = inner.delay {
            std::thread::sleep(delay);
        }
        if inner.failing_at == Some(index) {
            return Err(PipelineError::callback_failed("write", index, "synthetic write failure"));
        }
        inner.state.lock().written.push(index);
        inner.changed.notify_all();
        Ok(packet.len())
    }
}
