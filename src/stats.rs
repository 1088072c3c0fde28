//! Runtime counters for the cache and the write queue.
//!
//! Counters are plain relaxed atomics updated by whichever thread observes the
//! event; snapshots are cheap `Copy` values that serialize for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    #[inline]
    fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Live cache counters
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    requests: Counter,
    hits: Counter,
    resyncs: Counter,
    prefetched: Counter,
    loader_calls: Counter,
}

impl CacheStats {
    pub(crate) fn record_request(&self) {
        self.requests.bump();
    }

    pub(crate) fn record_hit(&self) {
        self.hits.bump();
    }

    pub(crate) fn record_resync(&self) {
        self.resyncs.bump();
    }

    pub(crate) fn record_prefetch(&self) {
        self.prefetched.bump();
    }

    pub(crate) fn record_loader_call(&self) {
        self.loader_calls.bump();
    }

    pub(crate) fn reset(&self) {
        self.requests.reset();
        self.hits.reset();
        self.resyncs.reset();
        self.prefetched.reset();
        self.loader_calls.reset();
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            requests: self.requests.get(),
            hits: self.hits.get(),
            resyncs: self.resyncs.get(),
            prefetched: self.prefetched.get(),
            loader_calls: self.loader_calls.get(),
        }
    }
}

/// Point-in-time view of cache activity since the last `start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Requests that reached the prefetcher (repeats of the last index excluded)
    pub requests: u64,
    /// Requests answered from the resident window
    pub hits: u64,
    /// Requests outside the resident window, answered by a direct load
    pub resyncs: u64,
    /// Packets copied into the arena ahead of demand
    pub prefetched: u64,
    /// Loader invocations, from either thread
    pub loader_calls: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of requests served from the window, `None` before any request
    pub fn hit_ratio(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.hits as f64 / self.requests as f64)
    }
}

/// Live queue counters
#[derive(Debug, Default)]
pub(crate) struct QueueStats {
    queued: Counter,
    written: Counter,
    dropped: Counter,
    replaced: Counter,
    blocked: Counter,
    sink_failures: Counter,
}

impl QueueStats {
    pub(crate) fn record_queued(&self) {
        self.queued.bump();
    }

    pub(crate) fn record_written(&self) {
        self.written.bump();
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.bump();
    }

    pub(crate) fn record_replaced(&self) {
        self.replaced.bump();
    }

    pub(crate) fn record_blocked(&self) {
        self.blocked.bump();
    }

    pub(crate) fn record_sink_failure(&self) {
        self.sink_failures.bump();
    }

    pub(crate) fn reset(&self) {
        self.queued.reset();
        self.written.reset();
        self.dropped.reset();
        self.replaced.reset();
        self.blocked.reset();
        self.sink_failures.reset();
    }

    pub(crate) fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            queued: self.queued.get(),
            written: self.written.get(),
            dropped: self.dropped.get(),
            replaced: self.replaced.get(),
            blocked: self.blocked.get(),
            sink_failures: self.sink_failures.get(),
        }
    }
}

/// Point-in-time view of queue activity since the last `start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    /// Packets accepted into the pending map
    pub queued: u64,
    /// Sink invocations that succeeded, including synchronous ones
    pub written: u64,
    /// Packets refused because the queue was full
    pub dropped: u64,
    /// Pending packets overwritten by a newer copy of the same index
    pub replaced: u64,
    /// Enqueue calls that had to wait for space
    pub blocked: u64,
    /// Sink invocations that failed or panicked
    pub sink_failures: u64,
}
