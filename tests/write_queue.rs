//! End-to-end behavior of the write-back queue with concurrent producers

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{CollectingSink, eventually};
use packetflow::{Enqueued, Packet, PipelineConfig, PipelineError, WriteQueue};
use parking_lot::Mutex;

fn packet(index: usize, len: usize) -> Packet {
    Packet::new(vec![(index % 256) as u8; len])
}

#[test]
fn concurrent_producers_write_every_packet_once() {
    let _ = tracing_subscriber::fmt::try_init();
    let sink = CollectingSink::new();
    let queue = Arc::new(WriteQueue::new(sink.clone()));
    assert!(queue.start(1_024, false, 3).unwrap());

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..50 {
                    let index = producer * 50 + n;
                    let outcome = queue.enqueue(&packet(index, 64), index).unwrap();
                    assert!(matches!(outcome, Enqueued::Queued { .. }));
                    assert!(queue.pending_bytes() <= 1_024);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    queue.stop().unwrap();

    let mut indices = sink.indices();
    indices.sort_unstable();
    assert_eq!(indices, (0..200).collect::<Vec<_>>());
    let stats = queue.stats();
    assert_eq!(stats.queued, 200);
    assert_eq!(stats.written, 200);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn drop_mode_never_writes_dropped_packets() {
    let sink = CollectingSink::slow(Duration::from_millis(2));
    let queue = WriteQueue::new(sink.clone());
    queue.start(256, true, 1).unwrap();

    let mut kept = BTreeSet::new();
    let mut dropped = 0;
    for index in 0..100 {
        match queue.enqueue(&packet(index, 64), index).unwrap() {
            Enqueued::Queued { .. } => {
                kept.insert(index);
            }
            Enqueued::Dropped => dropped += 1,
            Enqueued::Written(_) => panic!("active queue wrote synchronously"),
        }
        assert!(queue.pending_bytes() <= 256);
    }
    queue.stop().unwrap();

    assert!(dropped > 0, "a 2ms sink cannot keep up with 100 packets");
    let written: BTreeSet<usize> = sink.indices().into_iter().collect();
    assert_eq!(written, kept);
    assert_eq!(queue.stats().dropped, dropped);
}

#[test]
fn written_packet_is_the_enqueued_content() {
    let sink = CollectingSink::new();
    let queue = WriteQueue::new(sink.clone());
    queue.start(1 << 16, false, 2).unwrap();

    let original = Packet::from_slice(b"frame-0042");
    queue.enqueue(&original, 42).unwrap();
    drop(original);
    queue.stop().unwrap();

    assert_eq!(sink.packet(42).unwrap().as_bytes(), b"frame-0042");
}

#[test]
fn stop_drains_pending_work() {
    let sink = CollectingSink::slow(Duration::from_millis(1));
    let queue = WriteQueue::new(sink.clone());
    queue.start(1 << 20, false, 2).unwrap();

    for index in 0..40 {
        queue.enqueue(&packet(index, 32), index).unwrap();
    }
    queue.stop().unwrap();

    assert_eq!(queue.pending_count(), 0);
    assert_eq!(queue.pending_bytes(), 0);
    assert_eq!(sink.indices().len(), 40);
    assert!(!queue.is_active());
}

#[test]
fn failure_is_reported_exactly_once() {
    let queue = WriteQueue::new(CollectingSink::failing_at(5));
    queue.start(1 << 16, false, 1).unwrap();

    queue.enqueue(&packet(5, 8), 5).unwrap();
    assert!(eventually(|| queue.stats().sink_failures == 1));

    let err = queue.enqueue(&packet(6, 8), 6).unwrap_err();
    assert!(matches!(err, PipelineError::Callback { operation: "write", index: 5, .. }));
    assert!(queue.enqueue(&packet(7, 8), 7).is_ok());
    queue.stop().unwrap();
}

#[test]
fn restart_after_stop() {
    let sink = CollectingSink::new();
    let queue = WriteQueue::new(sink.clone());

    queue.start(1 << 10, false, 1).unwrap();
    queue.enqueue(&packet(0, 8), 0).unwrap();
    queue.stop().unwrap();

    assert_eq!(queue.enqueue(&packet(1, 8), 1).unwrap(), Enqueued::Written(2));

    queue.start(1 << 10, true, 2).unwrap();
    queue.enqueue(&packet(2, 8), 2).unwrap();
    queue.stop().unwrap();

    let mut indices = sink.indices();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn dropping_active_queue_flushes() {
    let sink = CollectingSink::slow(Duration::from_millis(1));
    {
        let queue = WriteQueue::new(sink.clone());
        queue.start(1 << 16, false, 1).unwrap();
        for index in 0..10 {
            queue.enqueue(&packet(index, 16), index).unwrap();
        }
    }
    assert_eq!(sink.indices(), (0..10).collect::<Vec<_>>());
}

#[test]
fn started_from_yaml_config() {
    let config = PipelineConfig::from_yaml_str(
        "queue:\n  max_queue_bytes: 4096\n  allow_drop: false\n  workers: 2\n",
    )
    .unwrap();
    let sink = CollectingSink::new();
    let queue = WriteQueue::builder().sink(sink.clone()).config(config.queue).build().unwrap();
    assert!(queue.is_active());

    for index in 0..20 {
        queue.enqueue(&packet(index, 100), index).unwrap();
    }
    queue.stop().unwrap();
    assert_eq!(sink.indices().len(), 20);
}

/// Queue whose single worker is stuck writing index 0 while the test holds the gate
fn stalled_queue(max_queue_bytes: usize, allow_drop: bool) -> (Arc<WriteQueue>, CollectingSink, Arc<Mutex<()>>) {
    let gate = Arc::new(Mutex::new(()));
    let sink = CollectingSink::gated(Arc::clone(&gate));
    let queue = Arc::new(WriteQueue::new(sink.clone()));
    queue.start(max_queue_bytes, allow_drop, 1).unwrap();
    (queue, sink, gate)
}

#[test]
fn lowest_index_is_written_first() {
    let (queue, sink, gate) = stalled_queue(1 << 16, false);
    let held = gate.lock();
    queue.enqueue(&packet(0, 8), 0).unwrap();
    assert!(eventually(|| queue.pending_count() == 0));

    for index in [5, 3, 4] {
        queue.enqueue(&packet(index, 8), index).unwrap();
    }
    drop(held);
    queue.stop().unwrap();

    assert_eq!(sink.indices(), vec![0, 3, 4, 5]);
}

#[test]
fn third_packet_waits_for_space() {
    let (queue, sink, gate) = stalled_queue(100, false);
    let held = gate.lock();
    queue.enqueue(&packet(0, 60), 0).unwrap();
    assert!(eventually(|| queue.pending_count() == 0));
    queue.enqueue(&packet(1, 60), 1).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.enqueue(&packet(2, 60), 2))
    };
    assert!(eventually(|| queue.stats().blocked == 1));
    thread::sleep(Duration::from_millis(20));
    assert!(!producer.is_finished(), "producer must wait while the queue is full");

    drop(held);
    let outcome = producer.join().unwrap().unwrap();
    assert!(matches!(outcome, Enqueued::Queued { .. }));
    queue.stop().unwrap();
    assert_eq!(sink.indices(), vec![0, 1, 2]);
}

#[test]
fn third_packet_dropped_when_full() {
    let (queue, sink, gate) = stalled_queue(100, true);
    let held = gate.lock();
    queue.enqueue(&packet(0, 60), 0).unwrap();
    assert!(eventually(|| queue.pending_count() == 0));

    assert!(matches!(queue.enqueue(&packet(1, 60), 1).unwrap(), Enqueued::Queued { .. }));
    assert_eq!(queue.enqueue(&packet(2, 60), 2).unwrap(), Enqueued::Dropped);

    drop(held);
    queue.stop().unwrap();
    assert_eq!(sink.indices(), vec![0, 1]);
}

#[test]
fn stop_leaves_blocked_packet_to_the_worker() {
    let (queue, sink, gate) = stalled_queue(100, false);
    let held = gate.lock();
    queue.enqueue(&packet(0, 60), 0).unwrap();
    assert!(eventually(|| queue.pending_count() == 0));
    queue.enqueue(&packet(1, 60), 1).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.enqueue(&packet(2, 60), 2))
    };
    assert!(eventually(|| queue.stats().blocked == 1));

    let stopper = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.stop())
    };
    let outcome = producer.join().unwrap().unwrap();
    assert!(matches!(outcome, Enqueued::Queued { .. }));

    drop(held);
    stopper.join().unwrap().unwrap();
    assert_eq!(sink.indices(), vec![0, 1, 2]);
    assert_eq!(sink.max_in_flight(), 1, "a single worker never overlaps writes");
}
