//! End-to-end scenarios against a running scan worker.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use shardrelay::{
    ConsumerWriter, MessagePool, MessageWriter, Metadata, MetricEvent, MetricSink, MetricValue,
    RetryConfig, SharedPayload, WriterConfig, WriterMetrics, decode_message,
};

#[derive(Default)]
struct CapturingSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl MetricSink for CapturingSink {
    fn record(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl CapturingSink {
    fn counter(&self, name: &str, tag: Option<(&str, &str)>) -> u64 {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.name == name
                    && tag.is_none_or(|(k, v)| e.labels.iter().any(|l| l.key == k && l.value == v))
            })
            .map(|e| match e.value {
                MetricValue::Counter(n) => n,
                _ => 0,
            })
            .sum()
    }
}

struct MockConsumer {
    address: String,
    frames: Mutex<Vec<(usize, Vec<u8>)>>,
    fail_writes: AtomicUsize,
}

impl MockConsumer {
    fn new(addr: &str) -> Arc<Self> {
        Arc::new(Self {
            address: addr.to_string(),
            frames: Mutex::new(Vec::new()),
            fail_writes: AtomicUsize::new(0),
        })
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn ids(&self) -> Vec<u64> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(_, frame)| decode_message(frame).unwrap().0.id)
            .collect()
    }
}

impl ConsumerWriter for MockConsumer {
    fn write(&self, conn_index: usize, buf: &[u8]) -> io::Result<()> {
        let remaining = self.fail_writes.load(Ordering::Acquire);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::Release);
            return Err(io::Error::other("write refused"));
        }
        self.frames.lock().unwrap().push((conn_index, buf.to_vec()));
        Ok(())
    }

    fn available_buffer(&self, _conn_index: usize) -> usize {
        usize::MAX
    }

    fn forced_flush(&self, _conn_index: usize) -> io::Result<()> {
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

fn test_config() -> WriterConfig {
    WriterConfig {
        scan_interval_ms: 5,
        close_check_interval_ms: 10,
        num_connections: 1,
        retry: RetryConfig::Exponential {
            initial_backoff_ms: 60_000,
            backoff_factor: 2.0,
            max_backoff_ms: 120_000,
            jitter: false,
        },
        ..WriterConfig::default()
    }
}

fn new_writer(shard: u64, config: WriterConfig) -> (MessageWriter, Arc<CapturingSink>) {
    let sink = Arc::new(CapturingSink::default());
    let metrics = WriterMetrics::new(Arc::clone(&sink) as Arc<dyn MetricSink>);
    let writer = MessageWriter::new(shard, Arc::new(MessagePool::new()), config, metrics).unwrap();
    (writer, sink)
}

fn payload(data: &[u8]) -> Arc<SharedPayload> {
    Arc::new(SharedPayload::new(Bytes::copy_from_slice(data)))
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn happy_path_delivers_in_order_and_drains_on_ack() {
    // Short enough that the scan revisits acked messages within the
    // test deadline, long enough that no retry fires before the acks.
    let config = WriterConfig {
        retry: RetryConfig::Exponential {
            initial_backoff_ms: 2_000,
            backoff_factor: 2.0,
            max_backoff_ms: 120_000,
            jitter: false,
        },
        ..test_config()
    };
    let (writer, sink) = new_writer(3, config);
    let consumer = MockConsumer::new("replica-a:9000");
    writer.add_consumer_writer(consumer.clone());
    writer.init();

    for data in [b"m1" as &[u8], b"m2", b"m3"] {
        writer.write(&payload(data));
    }

    assert!(
        wait_until(Duration::from_secs(5), || consumer.frame_count() == 3),
        "messages were not all delivered"
    );
    assert_eq!(consumer.ids(), vec![1, 2, 3]);
    assert_eq!(sink.counter("write-success", None), 3);

    for id in 1..=3 {
        assert!(writer.ack(Metadata { shard: 3, id }));
    }
    assert_eq!(writer.queue_size(), 0);
    assert!(
        wait_until(Duration::from_secs(5), || sink
            .counter("message-dequeue", None)
            == 3),
        "scan did not remove acked messages"
    );
    assert_eq!(sink.counter("message-acked", None), 3);

    writer.close();
}

#[test]
fn transient_write_failure_is_retried() {
    let config = WriterConfig {
        retry: RetryConfig::Exponential {
            initial_backoff_ms: 20,
            backoff_factor: 2.0,
            max_backoff_ms: 1_000,
            jitter: false,
        },
        ..test_config()
    };
    let (writer, sink) = new_writer(1, config);
    let consumer = MockConsumer::new("replica-a:9000");
    consumer.fail_writes.store(1, Ordering::Release);
    writer.add_consumer_writer(consumer.clone());
    writer.init();

    writer.write(&payload(b"eventually"));

    assert!(
        wait_until(Duration::from_secs(5), || consumer.frame_count() == 1),
        "message was not retried after the failed attempt"
    );
    assert!(sink.counter("write-error", Some(("error-type", "all-consumers"))) >= 1);
    assert!(sink.counter("message-retry", None) >= 1);

    assert!(writer.ack(Metadata { shard: 1, id: 1 }));
    writer.close();
}

#[test]
fn close_drains_unacked_messages() {
    let (writer, sink) = new_writer(9, test_config());
    let consumer = MockConsumer::new("replica-a:9000");
    writer.add_consumer_writer(consumer.clone());
    writer.init();

    for _ in 0..5 {
        writer.write(&payload(b"never-acked"));
    }
    assert!(
        wait_until(Duration::from_secs(5), || consumer.frame_count() == 5),
        "first attempts were not sent"
    );

    let started = Instant::now();
    writer.close();
    // One scan interval to notice the close plus the drain poll.
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(sink.counter("message-closed", None), 5);
    assert_eq!(writer.queue_size(), 0);
}

#[test]
fn close_is_idempotent() {
    let (writer, _sink) = new_writer(2, test_config());
    writer.init();
    writer.close();
    writer.close();
}

#[test]
fn writes_after_close_are_fenced() {
    let (writer, sink) = new_writer(2, test_config());
    writer.init();
    writer.close();

    let p = payload(b"too-late");
    writer.write(&p);
    assert_eq!(writer.queue_size(), 0);
    assert_eq!(p.ref_count(), 0);
    assert_eq!(sink.counter("invalid-write", Some(("reason", "closed"))), 1);
}

#[test]
fn ack_transitions_exactly_once_across_threads() {
    let (writer, _sink) = new_writer(4, test_config());
    writer.add_consumer_writer(MockConsumer::new("replica-a:9000"));
    writer.write(&payload(b"contended"));

    let transitions = Arc::new(AtomicUsize::new(0));
    let mut joins = Vec::new();
    for _ in 0..8 {
        let writer = writer.clone();
        let transitions = Arc::clone(&transitions);
        joins.push(thread::spawn(move || {
            if writer.ack(Metadata { shard: 4, id: 1 }) {
                transitions.fetch_add(1, Ordering::AcqRel);
            }
        }));
    }
    for join in joins {
        join.join().unwrap();
    }

    assert_eq!(transitions.load(Ordering::Acquire), 1);
    assert_eq!(writer.queue_size(), 0);
}

#[test]
fn unknown_acks_are_ignored() {
    let (writer, sink) = new_writer(5, test_config());
    assert!(!writer.ack(Metadata { shard: 5, id: 42 }));
    assert_eq!(sink.counter("message-acked", None), 0);
}

#[test]
fn empty_static_backoff_table_fails_construction() {
    let config = WriterConfig {
        retry: RetryConfig::Static {
            backoff_ms: Vec::new(),
        },
        ..test_config()
    };
    let sink = Arc::new(CapturingSink::default());
    let metrics = WriterMetrics::new(sink as Arc<dyn MetricSink>);
    let err = MessageWriter::new(0, Arc::new(MessagePool::new()), config, metrics).unwrap_err();
    assert_eq!(err, shardrelay::ConfigError::EmptyBackoffTable);
}

#[test]
fn writers_share_one_envelope_pool() {
    let pool = Arc::new(MessagePool::new());
    let sink = Arc::new(CapturingSink::default());

    let a = MessageWriter::new(
        1,
        Arc::clone(&pool),
        test_config(),
        WriterMetrics::new(Arc::clone(&sink) as Arc<dyn MetricSink>),
    )
    .unwrap();
    let b = MessageWriter::new(
        2,
        Arc::clone(&pool),
        test_config(),
        WriterMetrics::new(Arc::clone(&sink) as Arc<dyn MetricSink>),
    )
    .unwrap();
    let consumer = MockConsumer::new("replica-a:9000");
    a.add_consumer_writer(consumer.clone());
    b.add_consumer_writer(consumer.clone());
    a.init();
    b.init();

    a.write(&payload(b"from-a"));
    b.write(&payload(b"from-b"));
    assert!(a.ack(Metadata { shard: 1, id: 1 }));
    assert!(b.ack(Metadata { shard: 2, id: 1 }));

    assert!(wait_until(Duration::from_secs(5), || {
        a.queue_size() == 0 && b.queue_size() == 0
    }));
    a.close();
    b.close();
}
