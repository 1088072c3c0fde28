//! Shared queue state and the worker loop draining it

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::provider::{PacketSink, guarded_write};
use crate::stats::QueueStats;
use crate::{Packet, PipelineError};

/// Everything guarded by the queue lock
#[derive(Default)]
pub(crate) struct QueueState {
    /// Pending packets keyed by index; dequeued lowest first
    pub(crate) pending: BTreeMap<usize, Packet>,
    pub(crate) bytes: usize,
    pub(crate) max_bytes: usize,
    pub(crate) allow_drop: bool,
    pub(crate) active: bool,
    /// Workers that have not left their loop yet; still draining after stop
    pub(crate) live_workers: usize,
    /// First sink failure not yet handed to a producer
    pub(crate) fault: Option<PipelineError>,
}

impl QueueState {
    /// Whether `size` bytes for `index` can be inserted right now.
    ///
    /// A pending copy of the same index is about to be replaced, so its bytes
    /// do not count. A packet larger than the whole cap is admitted into an
    /// otherwise empty queue when `allow_oversized` is set.
    pub(crate) fn admits(&self, index: usize, size: usize, allow_oversized: bool) -> bool {
        let (others_len, others_bytes) = match self.pending.get(&index) {
            Some(previous) => (self.pending.len() - 1, self.bytes - previous.len()),
            None => (self.pending.len(), self.bytes),
        };
        others_bytes + size <= self.max_bytes || (allow_oversized && others_len == 0)
    }

    /// Reset to an empty active queue
    pub(crate) fn activate(&mut self, max_bytes: usize, allow_drop: bool) {
        *self = QueueState { max_bytes, allow_drop, active: true, ..QueueState::default() };
    }

    /// Whether a packet can still reach a worker: true while active and
    /// while a stopped queue is draining
    pub(crate) fn accepts_queued(&self) -> bool {
        self.active || self.live_workers > 0
    }

    /// Remember a sink failure, keeping the earliest
    pub(crate) fn record_fault(&mut self, error: PipelineError) {
        if self.fault.is_none() {
            self.fault = Some(error);
        }
    }
}

#[derive(Default)]
pub(crate) struct QueueShared {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) work_available: Condvar,
    pub(crate) space_freed: Condvar,
    pending_count: AtomicUsize,
    pending_bytes: AtomicUsize,
    pub(crate) stats: QueueStats,
}

impl QueueShared {
    /// Mirror the totals for lock-free readers; call with the lock held
    pub(crate) fn publish(&self, state: &QueueState) {
        self.pending_count.store(state.pending.len(), Ordering::Release);
        self.pending_bytes.store(state.bytes, Ordering::Release);
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::Acquire)
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Acquire)
    }
}

/// Worker thread body: drain lowest index first until stopped and empty
pub(crate) fn run(shared: Arc<QueueShared>, sink: Arc<dyn PacketSink>, worker: usize) {
    debug!(worker, "Write queue worker started");
    let mut written = 0u64;
    let mut state = shared.state.lock();

    loop {
        let Some((index, packet)) = state.pending.pop_first() else {
            if !state.active {
                break;
            }
            shared.work_available.wait(&mut state);
            continue;
        };
        state.bytes -= packet.len();
        shared.publish(&state);

        let result = MutexGuard::unlocked(&mut state, || guarded_write(sink.as_ref(), &packet, index));
        match result {
            Ok(position) => {
                written += 1;
                shared.stats.record_written();
                trace!(worker, index, position, "Packet written");
            }
            Err(e) => {
                error!(worker, index, "Sink failed: {}", e);
                shared.stats.record_sink_failure();
                state.record_fault(e);
            }
        }
        shared.space_freed.notify_all();
    }

    state.live_workers -= 1;
    drop(state);
    debug!(worker, written, "Write queue worker stopped");
}
