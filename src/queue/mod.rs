//! Bounded write-back queue.
//!
//! A [`WriteQueue`] takes packets from any number of producers and hands them
//! to a [`PacketSink`] on background workers, lowest index first. The pending
//! byte total is capped: when full, producers either block until workers free
//! space or have their packet dropped, depending on how the queue was started.
//!
//! ## Usage Example
//!
//! ```rust
//! use packetflow::{Enqueued, Packet, Result, WriteQueue};
//!
//! fn main() -> Result<()> {
//!     let queue = WriteQueue::new(|packet: &Packet, _index: usize| -> Result<usize> {
//!         Ok(packet.len())
//!     });
//!
//!     // inactive: the sink runs on the caller's thread
//!     assert_eq!(queue.enqueue(&Packet::from_slice(b"abc"), 0)?, Enqueued::Written(3));
//!
//!     queue.start(1 << 20, false, 2)?;
//!     for index in 1..10 {
//!         queue.enqueue(&Packet::from_slice(b"payload"), index)?;
//!     }
//!     queue.stop()?;
//!     assert_eq!(queue.pending_count(), 0);
//!     Ok(())
//! }
//! ```

mod worker;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::{QueueConfig, clamp_buffer_bytes};
use crate::provider::{PacketSink, guarded_write};
use crate::stats::QueueStatsSnapshot;
use crate::{Enqueued, Packet, PipelineError, Result};

use worker::QueueShared;

/// Multi-worker write-back queue over a [`PacketSink`]
///
/// Every method takes `&self`, so a queue shared through an `Arc` can be fed
/// from several threads and stopped from any of them.
pub struct WriteQueue {
    sink: Arc<dyn PacketSink>,
    shared: Arc<QueueShared>,
    /// Worker handles; the lock also serializes start and stop
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Create an inactive queue
    pub fn new<S: PacketSink>(sink: S) -> Self {
        Self::from_sink(Arc::new(sink))
    }

    /// Start building a queue
    pub fn builder() -> QueueBuilder {
        QueueBuilder::default()
    }

    fn from_sink(sink: Arc<dyn PacketSink>) -> Self {
        Self { sink, shared: Arc::new(QueueShared::default()), workers: Mutex::new(Vec::new()) }
    }

    /// Start `workers` background writers with a pending cap of
    /// `max_queue_bytes` (capped at [`MAX_BUFFER_BYTES`](crate::MAX_BUFFER_BYTES)).
    ///
    /// A running queue is stopped and drained first. Returns `Ok(false)` and
    /// stays inactive when `max_queue_bytes` is zero.
    ///
    /// # Errors
    ///
    /// Returns a sink failure left over from the previous session, or
    /// [`PipelineError::Spawn`] if a worker thread cannot be created.
    pub fn start(&self, max_queue_bytes: usize, allow_drop: bool, workers: usize) -> Result<bool> {
        let mut handles = self.workers.lock();
        self.shutdown(&mut handles)?;

        if max_queue_bytes == 0 {
            debug!("Zero queue cap requested, write queue stays inactive");
            return Ok(false);
        }
        let max_bytes = clamp_buffer_bytes(max_queue_bytes);
        if max_bytes < max_queue_bytes {
            warn!(requested = max_queue_bytes, max_bytes, "Queue cap clamped to hard limit");
        }
        let worker_count = if workers == 0 {
            warn!("Write queue started with zero workers, using one");
            1
        } else {
            workers
        };

        {
            let mut state = self.shared.state.lock();
            state.activate(max_bytes, allow_drop);
            self.shared.publish(&state);
        }
        self.shared.stats.reset();

        for n in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            let sink = Arc::clone(&self.sink);
            self.shared.state.lock().live_workers += 1;
            let spawned = thread::Builder::new()
                .name(format!("write-queue-{n}"))
                .spawn(move || worker::run(shared, sink, n));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn write queue worker {}: {}", n, e);
                    self.shared.state.lock().live_workers -= 1;
                    // no packet has been accepted yet, so there is no fault to report
                    let _ = self.shutdown(&mut handles);
                    return Err(PipelineError::spawn_failed("write queue", e));
                }
            }
        }

        info!(max_bytes, allow_drop, workers = worker_count, "Write queue started");
        Ok(true)
    }

    /// Validate `config` and start with its settings
    pub fn start_with_config(&self, config: &QueueConfig) -> Result<bool> {
        config.validate()?;
        self.start(config.max_queue_bytes, config.allow_drop, config.workers)
    }

    /// Stop accepting queued work, drain what is pending and join the workers.
    ///
    /// Producers blocked on a full queue are released; their packets, and any
    /// enqueued while the workers drain, join the pending set regardless of
    /// the cap and are written in index order by the draining workers.
    /// Calling `stop` on an inactive queue does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first sink failure that no `enqueue` has reported yet.
    pub fn stop(&self) -> Result<()> {
        let mut handles = self.workers.lock();
        self.shutdown(&mut handles)
    }

    fn shutdown(&self, handles: &mut Vec<JoinHandle<()>>) -> Result<()> {
        let was_active = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut state.active, false)
        };
        self.shared.work_available.notify_all();
        self.shared.space_freed.notify_all();

        for handle in handles.drain(..) {
            if handle.join().is_err() {
                error!("Write queue worker panicked");
            }
        }

        let mut state = self.shared.state.lock();
        if was_active {
            let stats = self.shared.stats.snapshot();
            info!(
                queued = stats.queued,
                written = stats.written,
                dropped = stats.dropped,
                sink_failures = stats.sink_failures,
                "Write queue stopped"
            );
        }
        match state.fault.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Hand `packet` to the sink, queued if active.
    ///
    /// The queue keeps its own reference to the packet; the caller's copy is
    /// never written to.
    ///
    /// # Errors
    ///
    /// Returns a sink failure recorded by a worker since the last call (this
    /// packet is then not queued), or the sink's own error for a synchronous
    /// write.
    pub fn enqueue(&self, packet: &Packet, index: usize) -> Result<Enqueued> {
        let shared = &self.shared;
        let size = packet.len();
        let mut state = shared.state.lock();

        if let Some(fault) = state.fault.take() {
            return Err(fault);
        }
        if !state.accepts_queued() {
            drop(state);
            return self.write_now(packet, index);
        }

        if state.active && !state.admits(index, size, !state.allow_drop) {
            if state.allow_drop {
                shared.stats.record_dropped();
                debug!(index, size, pending_bytes = state.bytes, "Queue full, packet dropped");
                return Ok(Enqueued::Dropped);
            }

            shared.stats.record_blocked();
            debug!(index, size, pending_bytes = state.bytes, "Queue full, waiting for space");
            while state.active && !state.admits(index, size, true) {
                shared.space_freed.wait(&mut state);
            }
            if !state.accepts_queued() {
                drop(state);
                debug!(index, "Queue stopped while waiting, writing synchronously");
                return self.write_now(packet, index);
            }
            if !state.active {
                debug!(index, "Queue stopped while waiting, handing packet to draining workers");
            }
        }

        let position = state.pending.range(..index).count();
        if let Some(previous) = state.pending.insert(index, packet.clone()) {
            state.bytes -= previous.len();
            shared.stats.record_replaced();
            debug!(index, "Pending packet replaced by newer copy");
        }
        state.bytes += size;
        shared.publish(&state);
        shared.stats.record_queued();
        drop(state);

        shared.work_available.notify_one();
        Ok(Enqueued::Queued { position })
    }

    fn write_now(&self, packet: &Packet, index: usize) -> Result<Enqueued> {
        match guarded_write(self.sink.as_ref(), packet, index) {
            Ok(result) => {
                self.shared.stats.record_written();
                Ok(Enqueued::Written(result))
            }
            Err(e) => {
                self.shared.stats.record_sink_failure();
                Err(e)
            }
        }
    }

    /// Whether workers are running
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Packets waiting for a worker
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Bytes waiting for a worker
    pub fn pending_bytes(&self) -> usize {
        self.shared.pending_bytes()
    }

    /// Counters for the current (or last) session
    pub fn stats(&self) -> QueueStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Unreported sink failure when dropping write queue: {}", e);
        }
    }
}

/// Builder for [`WriteQueue`]
#[derive(Default)]
pub struct QueueBuilder {
    sink: Option<Arc<dyn PacketSink>>,
    config: Option<QueueConfig>,
}

impl QueueBuilder {
    pub fn sink<S: PacketSink>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Start the queue with these settings as part of `build`
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the queue, failing if no sink was given or the settings are invalid
    pub fn build(self) -> Result<WriteQueue> {
        let sink = self.sink.ok_or_else(|| PipelineError::invalid_configuration("write queue requires a sink"))?;
        let queue = WriteQueue::from_sink(sink);
        if let Some(config) = &self.config {
            queue.start_with_config(config)?;
        }
        Ok(queue)
    }
}
