//! Background prefetch thread
//!
//! Owns the arena and the window bookkeeping. Talks to the consumer only
//! through the request/response exchange in [`CacheShared`].

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::arena::Arena;
use crate::config::CacheConfig;
use crate::provider::{PacketLoader, guarded_load};
use crate::stats::CacheStats;
use crate::{Packet, PipelineError, Result};

/// Request/response slots guarded by the exchange mutex
#[derive(Default)]
pub(crate) struct Exchange {
    pub(crate) request: Option<usize>,
    pub(crate) response: Option<Result<Packet>>,
    /// Prefetch failure waiting to be reported by the next `get`
    pub(crate) fault: Option<PipelineError>,
    pub(crate) halted: bool,
}

impl Exchange {
    /// Error to hand the consumer once the prefetcher has halted
    pub(crate) fn take_fault(&mut self) -> PipelineError {
        self.fault.take().unwrap_or(PipelineError::Halted { component: "packet cache" })
    }
}

#[derive(Default)]
pub(crate) struct CacheShared {
    pub(crate) exchange: Mutex<Exchange>,
    pub(crate) request_ready: Condvar,
    pub(crate) response_ready: Condvar,
    pub(crate) stats: CacheStats,
}

impl CacheShared {
    pub(crate) fn reset(&self) {
        *self.exchange.lock() = Exchange::default();
        self.stats.reset();
    }
}

pub(crate) struct Prefetcher {
    loader: Arc<dyn PacketLoader>,
    shared: Arc<CacheShared>,
    config: CacheConfig,
    arena: Arena,
    low_water: usize,
    /// Next index the consumer is expected to ask for
    next_expected: usize,
    /// Next index to load ahead of demand
    next_precache: usize,
    /// First index that loaded empty this session
    end_of_sequence: Option<usize>,
    /// Loaded packet that did not fit yet
    carried: Option<(usize, Packet)>,
}

impl Prefetcher {
    pub(crate) fn new(
        loader: Arc<dyn PacketLoader>,
        shared: Arc<CacheShared>,
        config: CacheConfig,
        capacity: usize,
    ) -> Self {
        let low_water = config.low_water_bytes(capacity);
        Self {
            loader,
            shared,
            config,
            arena: Arena::with_capacity(capacity),
            low_water,
            next_expected: 0,
            next_precache: 0,
            end_of_sequence: None,
            carried: None,
        }
    }

    /// Thread entry point
    pub(crate) fn run(mut self, cancel: CancellationToken) {
        info!(capacity = self.arena.capacity(), "Packet prefetcher started");

        if let Err(e) = self.prefill(&cancel) {
            error!("Prefetcher halted during prefill: {}", e);
            let mut exchange = self.shared.exchange.lock();
            exchange.fault = Some(e);
            exchange.halted = true;
            self.shared.response_ready.notify_one();
            return;
        }

        let shared = Arc::clone(&self.shared);
        let query_timeout = self.config.query_timeout();
        let mut exchange = shared.exchange.lock();

        while !cancel.is_cancelled() {
            if exchange.request.is_none() {
                shared.request_ready.wait_for(&mut exchange, query_timeout);
                if cancel.is_cancelled() {
                    break;
                }
            }

            if let Some(index) = exchange.request.take() {
                let answer = MutexGuard::unlocked(&mut exchange, || self.answer(index));
                let failed = answer.is_err();
                if let Err(e) = &answer {
                    error!("Prefetcher halted answering packet {}: {}", index, e);
                }
                exchange.response = Some(answer);
                exchange.halted = failed;
                shared.response_ready.notify_one();
                if failed {
                    break;
                }
            } else if let Err(e) = MutexGuard::unlocked(&mut exchange, || self.refill_if_low()) {
                error!("Prefetcher halted during refill: {}", e);
                exchange.fault = Some(e);
                exchange.halted = true;
                shared.response_ready.notify_one();
                break;
            }
        }

        drop(exchange);
        let stats = shared.stats.snapshot();
        info!(
            requests = stats.requests,
            hits = stats.hits,
            resyncs = stats.resyncs,
            prefetched = stats.prefetched,
            "Packet prefetcher stopped"
        );
    }

    /// Front-load the arena from index 0 within the prefill budget
    fn prefill(&mut self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        let budget = self.config.prefill_budget();
        while started.elapsed() < budget && !cancel.is_cancelled() {
            if !self.precache_next()? {
                break;
            }
        }
        debug!(
            packets = self.arena.len(),
            bytes = self.arena.resident_bytes(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Prefill complete"
        );
        Ok(())
    }

    fn refill_if_low(&mut self) -> Result<()> {
        if !self.arena.is_empty() && self.arena.resident_bytes() >= self.low_water {
            return Ok(());
        }
        let mut loaded = 0;
        while loaded < self.config.refill_burst && self.precache_next()? {
            loaded += 1;
        }
        if loaded > 0 {
            trace!(
                loaded,
                resident_bytes = self.arena.resident_bytes(),
                next_precache = self.next_precache,
                "Refill burst"
            );
        }
        Ok(())
    }

    /// Load and place the next sequential packet; `false` means stop for now
    fn precache_next(&mut self) -> Result<bool> {
        let index = self.next_precache;
        if self.end_of_sequence.is_some_and(|end| index >= end) {
            return Ok(false);
        }

        let packet = match self.carried.take() {
            Some((carried_index, packet)) if carried_index == index => packet,
            _ => self.load(index)?,
        };

        if packet.is_empty() {
            debug!(index, "End of sequence reached, prefetching stops");
            self.end_of_sequence = Some(index);
            return Ok(false);
        }

        if !self.arena.push(index, &packet) {
            if !self.arena.can_ever_hold(packet.len()) {
                debug!(
                    index,
                    len = packet.len(),
                    capacity = self.arena.capacity(),
                    "Packet larger than arena, prefetching paused until resync"
                );
            }
            self.carried = Some((index, packet));
            return Ok(false);
        }

        self.next_precache += 1;
        self.shared.stats.record_prefetch();
        Ok(true)
    }

    /// Answer one consumer request, consuming the window up to `index`
    fn answer(&mut self, index: usize) -> Result<Packet> {
        self.shared.stats.record_request();

        if index >= self.next_expected && index < self.next_precache {
            let mut answer = None;
            while self.next_expected <= index {
                let Some(slot) = self.arena.pop_front() else {
                    break;
                };
                self.next_expected += 1;
                if slot.index == index {
                    answer = Some(self.arena.read(&slot));
                }
            }
            if let Some(packet) = answer {
                self.shared.stats.record_hit();
                trace!(index, resident = self.arena.len(), "Answered from window");
                return Ok(packet);
            }
        }

        self.resync(index)
    }

    /// Drop the whole window and load `index` directly, unless it is the
    /// carried packet
    fn resync(&mut self, index: usize) -> Result<Packet> {
        debug!(
            index,
            next_expected = self.next_expected,
            next_precache = self.next_precache,
            resident = self.arena.len(),
            "Request outside resident window, resyncing"
        );
        self.arena.clear();
        self.shared.stats.record_resync();

        let packet = match self.carried.take() {
            Some((carried_index, packet)) if carried_index == index => packet,
            _ => self.load(index)?,
        };
        self.next_expected = index.saturating_add(1);
        self.next_precache = self.next_expected;
        Ok(packet)
    }

    fn load(&self, index: usize) -> Result<Packet> {
        self.shared.stats.record_loader_call();
        guarded_load(self.loader.as_ref(), index)
    }
}
