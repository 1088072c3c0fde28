//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use packetflow::{Packet, PacketLoader, PacketSink, PipelineError, Result};
use parking_lot::Mutex;

pub const WAIT: Duration = Duration::from_secs(5);

/// Expected content of packet `index`
pub fn expected(index: usize, size: usize) -> Packet {
    let mut bytes = vec![(index % 253) as u8; size];
    let tag = (index as u64).to_be_bytes();
    let n = size.min(tag.len());
    bytes[..n].copy_from_slice(&tag[tag.len() - n..]);
    Packet::new(bytes)
}

#[derive(Default)]
struct LoaderInner {
    count: usize,
    size: usize,
    panic_at: Option<usize>,
    log: Mutex<Vec<usize>>,
}

/// Loader over `count` packets that logs every index it is asked for
#[derive(Clone, Default)]
pub struct IndexedLoader {
    inner: Arc<LoaderInner>,
}

impl IndexedLoader {
    pub fn new(count: usize, size: usize) -> Self {
        Self { inner: Arc::new(LoaderInner { count, size, ..LoaderInner::default() }) }
    }

    pub fn panicking_at(count: usize, size: usize, index: usize) -> Self {
        Self { inner: Arc::new(LoaderInner { count, size, panic_at: Some(index), ..LoaderInner::default() }) }
    }

    pub fn log(&self) -> Vec<usize> {
        self.inner.log.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.inner.log.lock().len()
    }
}

impl PacketLoader for IndexedLoader {
    fn load(&self, index: usize) -> Result<Packet> {
        self.inner.log.lock().push(index);
        if self.inner.panic_at == Some(index) {
            panic!("corrupt packet {index}");
        }
        if index >= self.inner.count {
            return Ok(Packet::empty());
        }
        Ok(expected(index, self.inner.size))
    }
}

/// Sink collecting `(index, bytes)` pairs, optionally slow or failing
#[derive(Clone, Default)]
pub struct CollectingSink {
    written: Arc<Mutex<Vec<(usize, Packet)>>>,
    delay: Option<Duration>,
    fail_at: Option<usize>,
    gate: Option<Arc<Mutex<()>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn failing_at(index: usize) -> Self {
        Self { fail_at: Some(index), ..Self::default() }
    }

    /// Every write first takes `gate`; hold its lock to stall the workers
    pub fn gated(gate: Arc<Mutex<()>>) -> Self {
        Self { gate: Some(gate), ..Self::default() }
    }

    pub fn indices(&self) -> Vec<usize> {
        self.written.lock().iter().map(|(index, _)| *index).collect()
    }

    pub fn packet(&self, index: usize) -> Option<Packet> {
        self.written.lock().iter().find(|(i, _)| *i == index).map(|(_, p)| p.clone())
    }

    /// Most writes ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn write_tracked(&self, packet: &Packet, index: usize) -> Result<usize> {
        if let Some(gate) = &self.gate {
            drop(gate.lock());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_at == Some(index) {
            return Err(PipelineError::callback_failed("write", index, "device full"));
        }
        let mut written = self.written.lock();
        written.push((index, packet.clone()));
        Ok(written.len())
    }
}

impl PacketSink for CollectingSink {
    fn write(&self, packet: &Packet, index: usize) -> Result<usize> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.write_tracked(packet, index);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}
