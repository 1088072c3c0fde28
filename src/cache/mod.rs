//! Read-ahead packet cache.
//!
//! A [`PacketCache`] serves one strictly sequential consumer. While active, a
//! background thread loads packets ahead of demand into a fixed-size ring
//! arena, so that `get(i)` right after `get(i - 1)` is usually answered from
//! memory. Any request outside the resident window still gets the right packet
//! through a direct load; only the speed changes.
//!
//! ## Usage Example
//!
//! ```rust
//! use packetflow::{Packet, PacketCache, Result};
//!
//! fn main() -> Result<()> {
//!     let mut cache = PacketCache::new(|index: usize| -> Result<Packet> {
//!         if index < 100 { Ok(Packet::new(vec![index as u8; 1024])) } else { Ok(Packet::empty()) }
//!     });
//!     cache.start(64 * 1024)?;
//!
//!     for index in 0..100 {
//!         let packet = cache.get(index)?;
//!         assert_eq!(packet.as_bytes()[0], index as u8);
//!     }
//!
//!     cache.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Request handshake
//!
//! The consumer publishes its request under the exchange lock, signals the
//! prefetcher and waits for the answer with a short timeout, re-signalling
//! every time the wait times out. A single signal can land while the
//! prefetcher is between its request check and its wait; the retry loop is
//! what makes such a lost wakeup cost one retry interval instead of a hang.

mod arena;
mod prefetcher;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{CacheConfig, clamp_buffer_bytes};
use crate::provider::{PacketLoader, guarded_load};
use crate::stats::CacheStatsSnapshot;
use crate::{Packet, PipelineError, Result};

use prefetcher::{CacheShared, Prefetcher};

/// Running prefetch session
struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    capacity: usize,
}

/// Sequential read-ahead cache over a [`PacketLoader`]
pub struct PacketCache {
    loader: Arc<dyn PacketLoader>,
    config: CacheConfig,
    shared: Arc<CacheShared>,
    session: Option<Session>,
    /// Last answered request, served again without synchronization
    last: Option<(usize, Packet)>,
}

impl PacketCache {
    /// Create an inactive cache with default tuning
    pub fn new<L: PacketLoader>(loader: L) -> Self {
        Self::from_parts(Arc::new(loader), CacheConfig::default())
    }

    /// Create an inactive cache with explicit tuning
    pub fn with_config<L: PacketLoader>(loader: L, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(Arc::new(loader), config))
    }

    /// Start building a cache
    pub fn builder() -> CacheBuilder {
        CacheBuilder::default()
    }

    fn from_parts(loader: Arc<dyn PacketLoader>, config: CacheConfig) -> Self {
        Self { loader, config, shared: Arc::new(CacheShared::default()), session: None, last: None }
    }

    /// Start prefetching with an arena of `buffer_bytes` (capped at
    /// [`MAX_BUFFER_BYTES`](crate::MAX_BUFFER_BYTES)).
    ///
    /// Restarts from empty if already active. Returns `Ok(false)` and stays
    /// inactive when `buffer_bytes` is zero.
    pub fn start(&mut self, buffer_bytes: usize) -> Result<bool> {
        if self.is_active() {
            self.stop();
        }
        if buffer_bytes == 0 {
            debug!("Zero buffer requested, packet cache stays inactive");
            return Ok(false);
        }

        let capacity = clamp_buffer_bytes(buffer_bytes);
        if capacity < buffer_bytes {
            warn!(requested = buffer_bytes, capacity, "Cache buffer request clamped to hard limit");
        }

        self.shared.reset();
        let prefetcher =
            Prefetcher::new(Arc::clone(&self.loader), Arc::clone(&self.shared), self.config.clone(), capacity);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("packet-prefetch".to_string())
            .spawn(move || prefetcher.run(token))
            .map_err(|e| PipelineError::spawn_failed("packet cache", e))?;

        info!(capacity, "Packet cache started");
        self.session = Some(Session { cancel, handle, capacity });
        Ok(true)
    }

    /// Start with the configured `buffer_bytes`
    pub fn start_with_config(&mut self) -> Result<bool> {
        self.start(self.config.buffer_bytes)
    }

    /// Stop prefetching, join the background thread and drop all cached data.
    ///
    /// Does nothing when inactive.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel.cancel();
        {
            let _exchange = self.shared.exchange.lock();
            self.shared.request_ready.notify_all();
        }
        if session.handle.join().is_err() {
            error!("Packet prefetcher thread panicked");
        }
        *self.shared.exchange.lock() = Default::default();
        info!(capacity = session.capacity, "Packet cache stopped");
    }

    /// Whether a prefetch session is running
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Arena size of the running session
    pub fn capacity(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.capacity)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counters for the current (or last) session
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Fetch the packet at `index`.
    ///
    /// The returned view stays valid until the next call. Asking for the same
    /// index twice in a row never touches the loader or the prefetcher again.
    ///
    /// # Errors
    ///
    /// Returns the loader's error (or a captured loader panic), or
    /// [`PipelineError::Halted`] once the prefetcher has stopped after such a
    /// failure. `stop()` followed by `start()` clears the halt.
    pub fn get(&mut self, index: usize) -> Result<&Packet> {
        let packet = match self.last.take() {
            Some((last, packet)) if last == index => packet,
            _ if self.is_active() => self.request(index)?,
            _ => {
                self.shared.stats.record_loader_call();
                guarded_load(self.loader.as_ref(), index)?
            }
        };
        Ok(&self.last.insert((index, packet)).1)
    }

    /// Hand a request to the prefetcher and wait for its answer
    fn request(&self, index: usize) -> Result<Packet> {
        let retry = self.config.request_retry();
        let mut exchange = self.shared.exchange.lock();
        if exchange.halted {
            return Err(exchange.take_fault());
        }

        exchange.response = None;
        exchange.request = Some(index);
        loop {
            self.shared.request_ready.notify_one();
            let timed_out = self.shared.response_ready.wait_for(&mut exchange, retry).timed_out();
            if let Some(response) = exchange.response.take() {
                return response;
            }
            if exchange.halted {
                exchange.request = None;
                return Err(exchange.take_fault());
            }
            if timed_out {
                if self.session.as_ref().is_some_and(|s| s.handle.is_finished()) {
                    error!(index, "Packet prefetcher exited without answering, cache halted");
                    exchange.request = None;
                    exchange.halted = true;
                    return Err(exchange.take_fault());
                }
                trace!(index, "Retrying packet request");
            }
        }
    }
}

impl Drop for PacketCache {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for [`PacketCache`]
#[derive(Default)]
pub struct CacheBuilder {
    loader: Option<Arc<dyn PacketLoader>>,
    config: CacheConfig,
}

impl CacheBuilder {
    pub fn loader<L: PacketLoader>(mut self, loader: L) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the cache, failing if no loader was given or the tuning is invalid
    pub fn build(self) -> Result<PacketCache> {
        let loader = self
            .loader
            .ok_or_else(|| PipelineError::invalid_configuration("packet cache requires a loader"))?;
        self.config.validate()?;
        Ok(PacketCache::from_parts(loader, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SequenceLoader;

    fn cache_over(loader: &Arc<SequenceLoader>) -> PacketCache {
        let shared = Arc::clone(loader);
        PacketCache::new(move |index: usize| shared.load(index))
    }

    #[test]
    fn inactive_get_remembers_last_answer() {
        let loader = Arc::new(SequenceLoader::new(10, 8));
        let mut cache = cache_over(&loader);

        assert_eq!(cache.get(3).unwrap(), &SequenceLoader::packet(3, 8));
        assert_eq!(cache.get(3).unwrap(), &SequenceLoader::packet(3, 8));
        assert_eq!(loader.calls(), 1);

        cache.get(4).unwrap();
        cache.get(3).unwrap();
        assert_eq!(loader.calls(), 3);
    }

    #[test]
    fn zero_buffer_keeps_cache_inactive() {
        let loader = Arc::new(SequenceLoader::new(10, 8));
        let mut cache = cache_over(&loader);
        assert!(!cache.start(0).unwrap());
        assert!(!cache.is_active());
        assert_eq!(cache.capacity(), None);
        cache.stop();
    }

    #[test]
    fn start_restarts_and_stop_is_idempotent() {
        let loader = Arc::new(SequenceLoader::new(10, 8));
        let mut cache = cache_over(&loader);
        assert!(cache.start(64).unwrap());
        assert_eq!(cache.capacity(), Some(64));
        assert!(cache.start(128).unwrap());
        assert_eq!(cache.capacity(), Some(128));

        cache.stop();
        cache.stop();
        assert!(!cache.is_active());
    }

    #[test]
    fn builder_requires_loader() {
        let err = PacketCache::builder().build().err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));

        let bad = CacheConfig { query_timeout_ms: 0, ..CacheConfig::default() };
        let err = PacketCache::builder()
            .loader(|_: usize| -> Result<Packet> { Ok(Packet::empty()) })
            .config(bad)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
    }

    #[test]
    fn dead_prefetcher_halts_instead_of_hanging() {
        let loader = Arc::new(SequenceLoader::new(10, 8));
        let mut cache = cache_over(&loader);
        let handle = thread::spawn(|| {});
        cache.session = Some(Session { cancel: CancellationToken::new(), handle, capacity: 64 });

        assert!(matches!(cache.get(0), Err(PipelineError::Halted { .. })));
        assert!(matches!(cache.get(1), Err(PipelineError::Halted { .. })));

        cache.stop();
        assert_eq!(cache.get(0).unwrap(), &SequenceLoader::packet(0, 8));
    }

    #[test]
    fn prefetch_failure_is_reported_then_halts() {
        let _ = tracing_subscriber::fmt::try_init();
        let loader = Arc::new(SequenceLoader::new(10, 8).failing_at(2));
        let mut cache = cache_over(&loader);
        cache.start(1024).unwrap();

        // prefill hits the failing index before any request is served
        let err = cache.get(0).unwrap_err();
        assert!(matches!(err, PipelineError::Callback { index: 2, .. }));
        let err = cache.get(1).unwrap_err();
        assert!(matches!(err, PipelineError::Halted { .. }));

        // a fresh session starts clean
        cache.stop();
        assert_eq!(cache.get(0).unwrap(), &SequenceLoader::packet(0, 8));
    }
}
