//! Per-shard reliable message writer.
//!
//! The writer owns an in-memory FIFO of envelopes, a pending-ack table
//! and a copy-on-write slice of consumer replicas. Producers append under
//! the writer lock; a single scan worker walks the queue on a jittered
//! ticker, retries unacknowledged messages with backoff, drops expired
//! ones, and picks the least-loaded replica for each send. New messages
//! are written in order; retries can be out of order.

use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, Sender};
use rand::Rng;
use thiserror::Error;

use crate::acks::AckTable;
use crate::clock::{SystemClock, TimeSource};
use crate::codec::{FrameEncoder, FrameError};
use crate::config::{ConfigError, WriterConfig};
use crate::consumer::ConsumerWriter;
use crate::message::{Message, MessagePool, Metadata};
use crate::metrics::WriterMetrics;
use crate::payload::SharedPayload;
use crate::queue::{Handle, MessageQueue};
use crate::retry::RetryPolicy;

// Keep the divisor a power of two so the modulo stays a mask.
const RECORD_MESSAGE_DELAY_EVERY: usize = 4;

#[derive(Debug, Error)]
pub(crate) enum WriteBatchError {
    #[error("no writers")]
    NoWriters,
    #[error("could not write to any consumer")]
    FailAllConsumers,
    #[error(transparent)]
    Encode(#[from] FrameError),
}

/// Handle to a per-shard writer. Cloning is cheap; all clones share the
/// same queue, worker and ack table.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<WriterInner>,
}

impl std::fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("shard", &self.inner.shard)
            .finish()
    }
}

impl MessageWriter {
    pub fn new(
        shard: u64,
        pool: Arc<MessagePool>,
        config: WriterConfig,
        metrics: WriterMetrics,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(shard, pool, config, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        shard: u64,
        pool: Arc<MessagePool>,
        config: WriterConfig,
        metrics: WriterMetrics,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(WriterInner::new(shard, pool, config, metrics, clock)?),
        })
    }

    /// Spawns the scan worker. Idempotent.
    pub fn init(&self) {
        let mut worker = self.inner.worker.lock().expect("worker lock poisoned");
        if worker.is_some() {
            return;
        }
        let Some(done_rx) = self
            .inner
            .done_rx
            .lock()
            .expect("worker lock poisoned")
            .take()
        else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        *worker = Some(thread::spawn(move || inner.scan_until_close(done_rx)));
    }

    /// Admits and enqueues a message. Messages not acknowledged in time
    /// are retried until acked, dropped or expired.
    pub fn write(&self, payload: &Arc<SharedPayload>) {
        self.inner.write(payload);
    }

    /// Acknowledges a message. Returns true only on the first ack of a
    /// known message; unknown or repeated acks are ignored.
    pub fn ack(&self, meta: Metadata) -> bool {
        self.inner.ack(meta)
    }

    pub fn replicated_shard_id(&self) -> u64 {
        self.inner.shard
    }

    /// Number of messages awaiting acknowledgement.
    pub fn queue_size(&self) -> usize {
        self.inner.acks.size()
    }

    pub fn cutoff_nanos(&self) -> i64 {
        self.inner.read_state().cut_off_nanos
    }

    pub fn set_cutoff_nanos(&self, nanos: i64) {
        self.inner.write_state().cut_off_nanos = nanos;
    }

    pub fn cutover_nanos(&self) -> i64 {
        self.inner.read_state().cut_over_nanos
    }

    pub fn set_cutover_nanos(&self, nanos: i64) {
        self.inner.write_state().cut_over_nanos = nanos;
    }

    pub fn message_ttl_nanos(&self) -> i64 {
        self.inner.read_state().message_ttl_nanos
    }

    pub fn set_message_ttl_nanos(&self, nanos: i64) {
        self.inner.write_state().message_ttl_nanos = nanos;
    }

    /// Replaces the replica slice with a copy that includes `cw`.
    /// In-flight sends keep using the snapshot they started with.
    pub fn add_consumer_writer(&self, cw: Arc<dyn ConsumerWriter>) {
        let mut state = self.inner.write_state();
        let mut writers = Vec::with_capacity(state.consumer_writers.len() + 1);
        writers.extend(state.consumer_writers.iter().cloned());
        writers.push(cw);
        state.iteration_indexes = (0..writers.len()).collect();
        state.consumer_writers = writers;
    }

    pub fn remove_consumer_writer(&self, addr: &str) {
        let mut state = self.inner.write_state();
        let writers: Vec<_> = state
            .consumer_writers
            .iter()
            .filter(|cw| cw.address() != addr)
            .cloned()
            .collect();
        state.iteration_indexes = (0..writers.len()).collect();
        state.consumer_writers = writers;
    }

    /// Current metrics bundle. Swapped when the downstream consumer
    /// identity changes, so it is re-read per operation.
    pub fn metrics(&self) -> Arc<WriterMetrics> {
        self.inner.metrics.load_full()
    }

    pub fn set_metrics(&self, metrics: WriterMetrics) {
        self.inner.metrics.store(Arc::new(metrics));
    }

    /// Fences new writes, waits for the scan worker to drain the queue,
    /// then joins it. Idempotent; blocks until drained.
    pub fn close(&self) {
        {
            let mut state = self.inner.write_state();
            if state.is_closed {
                return;
            }
            state.is_closed = true;
        }
        self.inner.wait_until_all_messages_removed();
        // Dropping the sender closes the done channel.
        self.inner
            .done_tx
            .lock()
            .expect("worker lock poisoned")
            .take();
        let worker = self
            .inner
            .worker
            .lock()
            .expect("worker lock poisoned")
            .take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

struct WriterState {
    queue: MessageQueue,
    consumer_writers: Vec<Arc<dyn ConsumerWriter>>,
    iteration_indexes: Vec<usize>,
    msg_id: u64,
    cut_off_nanos: i64,
    cut_over_nanos: i64,
    message_ttl_nanos: i64,
    is_closed: bool,
    last_new_write: Option<Handle>,
}

/// Snapshot of the replica slice taken under the writer lock, so sends
/// proceed without blocking producers.
struct ConsumerSnapshot {
    writers: Vec<Arc<dyn ConsumerWriter>>,
    iteration_indexes: Vec<usize>,
}

/// State owned by the scan worker. Only one thread ever touches it, so
/// the encoder and the full-scan deadline need no lock.
pub(crate) struct ScanContext {
    encoder: FrameEncoder,
    next_full_scan_nanos: i64,
    to_write: Vec<Arc<Message>>,
}

impl ScanContext {
    pub(crate) fn new(config: &WriterConfig) -> Self {
        Self {
            encoder: FrameEncoder::new(config.max_frame_bytes),
            next_full_scan_nanos: 0,
            to_write: Vec::with_capacity(config.scan_batch_size),
        }
    }
}

struct WriterInner {
    shard: u64,
    config: WriterConfig,
    retry: RetryPolicy,
    state: RwLock<WriterState>,
    acks: AckTable,
    pool: Arc<MessagePool>,
    metrics: ArcSwap<WriterMetrics>,
    clock: Arc<dyn TimeSource>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Mutex<Option<Receiver<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriterInner {
    fn new(
        shard: u64,
        pool: Arc<MessagePool>,
        config: WriterConfig,
        metrics: WriterMetrics,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config.retry)?;
        let (done_tx, done_rx) = channel::bounded(1);
        Ok(Self {
            shard,
            retry,
            state: RwLock::new(WriterState {
                queue: MessageQueue::new(),
                consumer_writers: Vec::new(),
                iteration_indexes: Vec::new(),
                msg_id: 0,
                cut_off_nanos: 0,
                cut_over_nanos: 0,
                message_ttl_nanos: 0,
                is_closed: false,
                last_new_write: None,
            }),
            acks: AckTable::new(config.initial_ack_map_size),
            pool,
            metrics: ArcSwap::from_pointee(metrics),
            clock,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx: Mutex::new(Some(done_rx)),
            worker: Mutex::new(None),
            config,
        })
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, WriterState> {
        self.state.read().expect("writer lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, WriterState> {
        self.state.write().expect("writer lock poisoned")
    }

    fn write(&self, payload: &Arc<SharedPayload>) {
        let now_nanos = self.clock.now_nanos();
        let msg = self.pool.get();
        let metrics = self.metrics.load_full();
        let mut state = self.write_state();
        if !Self::is_valid_write_with_lock(&state, &self.config, now_nanos, &metrics) {
            drop(state);
            self.finish(msg);
            return;
        }
        payload.inc_ref();
        state.msg_id += 1;
        let meta = Metadata {
            shard: self.shard,
            id: state.msg_id,
        };
        msg.set(meta, Arc::clone(payload), now_nanos);
        self.acks.add(meta, Arc::clone(&msg));
        metrics.message_enqueue(1);
        // Chain concurrent writes behind the cursor so first attempts
        // keep their arrival order and cluster at the ready prefix.
        state.last_new_write = Some(match state.last_new_write {
            Some(cursor) => state.queue.insert_after(cursor, msg),
            None => state.queue.push_front(msg),
        });
    }

    fn is_valid_write_with_lock(
        state: &WriterState,
        config: &WriterConfig,
        now_nanos: i64,
        metrics: &WriterMetrics,
    ) -> bool {
        if state.is_closed {
            metrics.invalid_write("closed");
            return false;
        }
        if config.ignore_cutoff_cutover {
            return true;
        }
        if state.cut_off_nanos > 0 && now_nanos >= state.cut_off_nanos {
            metrics.invalid_write("after-cutoff");
            return false;
        }
        if state.cut_over_nanos > 0 && now_nanos < state.cut_over_nanos {
            metrics.invalid_write("before-cutover");
            return false;
        }
        true
    }

    fn ack(&self, meta: Metadata) -> bool {
        if let Some(expected_process_at) = self.acks.ack(meta) {
            let metrics = self.metrics.load_full();
            metrics.message_consume_latency(self.clock.now_nanos() - expected_process_at);
            metrics.message_acked(1);
            return true;
        }
        false
    }

    fn wait_until_all_messages_removed(&self) {
        // Writers are closed sequentially; checking first avoids waiting
        // a full poll interval per already-empty writer.
        if self.is_empty() {
            return;
        }
        let interval = self.config.close_check_interval();
        loop {
            thread::sleep(interval);
            if self.is_empty() {
                return;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.read_state().queue.is_empty()
    }

    fn scan_until_close(&self, done_rx: Receiver<()>) {
        let interval = self.config.scan_interval();
        // Start at a random phase so writers created together do not
        // tick in lockstep.
        let jitter_ms = interval.as_millis() as u64;
        if jitter_ms > 0 {
            thread::sleep(std::time::Duration::from_millis(
                rand::rng().random_range(0..jitter_ms),
            ));
        }
        let ticker = channel::tick(interval);
        let mut ctx = ScanContext::new(&self.config);
        loop {
            crossbeam::select! {
                recv(ticker) -> _ => self.scan_message_queue(&mut ctx),
                recv(done_rx) -> _ => return,
            }
        }
    }

    pub(crate) fn scan_message_queue(&self, ctx: &mut ScanContext) {
        let (mut cursor, is_closed) = {
            let mut state = self.write_state();
            state.last_new_write = None;
            (state.queue.front(), state.is_closed)
        };
        let metrics = self.metrics.load_full();
        let before_scan_nanos = self.clock.now_nanos();
        let mut before_batch_nanos = before_scan_nanos;
        let full_scan = is_closed || before_scan_nanos > ctx.next_full_scan_nanos;
        let mut tally = ScanTally::default();
        let mut skip_writes = false;
        while let Some(start) = cursor {
            let snapshot = {
                let mut state = self.write_state();
                cursor = self.scan_batch_with_lock(
                    &mut state,
                    ctx,
                    start,
                    before_batch_nanos,
                    full_scan,
                    &mut tally,
                    &metrics,
                );
                ConsumerSnapshot {
                    writers: state.consumer_writers.clone(),
                    iteration_indexes: state.iteration_indexes.clone(),
                }
            };
            if !full_scan && ctx.to_write.is_empty() {
                // Past the ready prefix: everything further is a retry
                // scheduled into the future.
                metrics.scan_batch_latency(self.clock.now_nanos() - before_batch_nanos);
                break;
            }
            if skip_writes {
                metrics.scan_batch_latency(self.clock.now_nanos() - before_batch_nanos);
                continue;
            }
            if self
                .write_batch(&snapshot, &metrics, &ctx.to_write, &mut ctx.encoder)
                .is_err()
            {
                // No replica is writable this cycle; keep walking to
                // clean up the queue but stop sending.
                skip_writes = true;
            }
            let now_nanos = self.clock.now_nanos();
            metrics.scan_batch_latency(now_nanos - before_batch_nanos);
            before_batch_nanos = now_nanos;
        }
        let after_scan_nanos = self.clock.now_nanos();
        metrics.scan_total_latency(after_scan_nanos - before_scan_nanos);
        tally.record(&metrics);
        if full_scan {
            ctx.next_full_scan_nanos = after_scan_nanos + self.config.full_scan_interval_nanos();
        }
    }

    /// Classifies up to one batch of queue elements under the writer
    /// lock, so producers are not blocked for the whole scan. Returns
    /// the element the next batch starts from.
    #[allow(clippy::too_many_arguments)]
    fn scan_batch_with_lock(
        &self,
        state: &mut WriterState,
        ctx: &mut ScanContext,
        start: Handle,
        now_nanos: i64,
        full_scan: bool,
        tally: &mut ScanTally,
        metrics: &WriterMetrics,
    ) -> Option<Handle> {
        let batch_size = self.config.scan_batch_size;
        ctx.to_write.clear();
        let mut iterated = 0;
        let mut cur = Some(start);
        while let Some(handle) = cur {
            iterated += 1;
            if iterated > batch_size {
                // Hand the element back as the next batch's start.
                return Some(handle);
            }
            let next = state.queue.next(handle);
            let msg = Arc::clone(state.queue.get(handle));
            if state.is_closed {
                // Ack on behalf of a consumer service removed at
                // runtime, so its unacked messages do not stay in
                // memory forever. Everything in the queue is in the
                // ack map until removed.
                tally.processed_closed += 1;
                self.acks.ack(msg.metadata());
                self.remove_from_queue_with_lock(state, handle, metrics);
                tally.message_closed += 1;
                cur = next;
                continue;
            }
            if msg.retry_at_nanos() >= now_nanos {
                tally.processed_not_ready += 1;
                if !full_scan {
                    return next;
                }
                cur = next;
                continue;
            }
            let ttl_nanos = state.message_ttl_nanos;
            if ttl_nanos > 0 && msg.init_nanos() + ttl_nanos <= now_nanos {
                tally.processed_ttl += 1;
                // The ack may have landed right before expiry; only a
                // real transition counts as a drop.
                if self.acks.ack(msg.metadata()).is_some() {
                    tally.message_dropped_ttl_expire += 1;
                }
                self.remove_from_queue_with_lock(state, handle, metrics);
                cur = next;
                continue;
            }
            if msg.is_acked() {
                tally.processed_ack += 1;
                self.remove_from_queue_with_lock(state, handle, metrics);
                cur = next;
                continue;
            }
            if msg.is_dropped_or_consumed() {
                tally.processed_drop += 1;
                // An ack can land between the acked and dropped probes;
                // leave such an element for the next scan to remove as
                // acked.
                if msg.is_acked() {
                    cur = next;
                    continue;
                }
                self.acks.remove(msg.metadata());
                self.remove_from_queue_with_lock(state, handle, metrics);
                tally.message_dropped_buffer_full += 1;
                cur = next;
                continue;
            }
            msg.inc_write_times();
            let write_times = msg.write_times();
            msg.set_retry_at_nanos(now_nanos + self.retry.next_backoff_nanos(write_times));
            if write_times > 1 {
                tally.message_retry += 1;
            }
            tally.processed_write += 1;
            ctx.to_write.push(msg);
            cur = next;
        }
        cur
    }

    fn write_batch(
        &self,
        snapshot: &ConsumerSnapshot,
        metrics: &Arc<WriterMetrics>,
        messages: &[Arc<Message>],
        encoder: &mut FrameEncoder,
    ) -> Result<(), WriteBatchError> {
        if snapshot.writers.is_empty() {
            // Not expected under a healthy placement.
            metrics.write_error_no_writers(messages.len() as u64);
            return Err(WriteBatchError::NoWriters);
        }
        for (i, msg) in messages.iter().enumerate() {
            let start_nanos = self.clock.now_nanos();
            self.write_message(snapshot, metrics, msg, encoder)?;
            if i % RECORD_MESSAGE_DELAY_EVERY == 0 {
                let now_nanos = self.clock.now_nanos();
                metrics.message_write_delay(now_nanos - msg.expected_process_at_nanos());
                metrics.write_success_latency(now_nanos - start_nanos);
            }
        }
        Ok(())
    }

    fn write_message(
        &self,
        snapshot: &ConsumerSnapshot,
        metrics: &Arc<WriterMetrics>,
        msg: &Arc<Message>,
        encoder: &mut FrameEncoder,
    ) -> Result<(), WriteBatchError> {
        msg.inc_reads();
        msg.set_sent_at_nanos(self.clock.now_nanos());
        let Some(payload) = msg.marshal() else {
            // The producer reclaimed the payload; the scan removes the
            // message as dropped.
            msg.dec_reads();
            return Ok(());
        };
        let encoded = encoder.encode(msg.metadata(), &payload);
        msg.dec_reads();
        let encoded = encoded?;

        // A shard always lands on the same connection index, preserving
        // per-shard order on the wire.
        let conn_index = (self.shard % self.config.num_connections as u64) as usize;
        let cw = self.choose_consumer_writer(snapshot, conn_index, encoded.len(), metrics);

        let start_nanos = self.clock.now_nanos();
        if cw.write(conn_index, encoded).is_err() {
            metrics.write_error_latency(self.clock.now_nanos() - start_nanos);
            metrics.write_error_all_consumers(1);
            return Err(WriteBatchError::FailAllConsumers);
        }
        metrics.write_success(1);
        Ok(())
    }

    /// Picks the replica for one send. Prefers the replica whose write
    /// buffer already fits the frame; otherwise forces a flush on every
    /// replica in parallel and takes the first to drain. A write would
    /// force a flush anyway, but it would block the whole consumer
    /// writer while draining; flushing all replicas concurrently makes
    /// progress on every connection at once.
    fn choose_consumer_writer(
        &self,
        snapshot: &ConsumerSnapshot,
        conn_index: usize,
        write_len: usize,
        metrics: &Arc<WriterMetrics>,
    ) -> Arc<dyn ConsumerWriter> {
        if snapshot.writers.len() == 1 {
            metrics.forced_flush_single_consumer();
            return Arc::clone(&snapshot.writers[0]);
        }

        let (max_idx, max_buf) = Self::consumer_writer_with_max_buffer(snapshot, conn_index);
        if max_buf >= write_len {
            return Arc::clone(&snapshot.writers[max_idx]);
        }

        metrics.forced_flush();
        let start_nanos = self.clock.now_nanos();

        // The channel is buffered to the replica count so a flush that
        // finishes after the deadline can still post without blocking.
        let (done_tx, done_rx) = channel::bounded(snapshot.writers.len());
        Self::begin_forced_flush(&done_tx, snapshot, conn_index, metrics);

        let mut chosen = max_idx;
        if let Some(winner) = self.wait_for_forced_flush(&done_rx, snapshot.writers.len(), metrics)
        {
            chosen = winner;
            if snapshot.writers[winner].available_buffer(conn_index) < write_len {
                metrics.forced_flush_not_enough_buffer();
                tracing::warn!(
                    consumer = snapshot.writers[winner].address(),
                    "forced flush, still not enough buffer"
                );
            }
        }

        metrics.forced_flush_latency(self.clock.now_nanos() - start_nanos);
        Arc::clone(&snapshot.writers[chosen])
    }

    fn consumer_writer_with_max_buffer(
        snapshot: &ConsumerSnapshot,
        conn_index: usize,
    ) -> (usize, usize) {
        let mut max_idx = snapshot.iteration_indexes[0];
        let mut max_buf = snapshot.writers[max_idx].available_buffer(conn_index);
        for &idx in &snapshot.iteration_indexes[1..] {
            let buf = snapshot.writers[idx].available_buffer(conn_index);
            if buf > max_buf {
                max_idx = idx;
                max_buf = buf;
            }
        }
        (max_idx, max_buf)
    }

    fn begin_forced_flush(
        done_tx: &Sender<Option<usize>>,
        snapshot: &ConsumerSnapshot,
        conn_index: usize,
        metrics: &Arc<WriterMetrics>,
    ) {
        for (idx, cw) in snapshot.writers.iter().enumerate() {
            let cw = Arc::clone(cw);
            let tx = done_tx.clone();
            let metrics = Arc::clone(metrics);
            thread::spawn(move || {
                if cw.forced_flush(conn_index).is_err() {
                    metrics.forced_flush_failed_one();
                    let _ = tx.send(None);
                } else {
                    let _ = tx.send(Some(idx));
                }
            });
        }
    }

    /// Waits for the first replica to finish its forced flush, bounded
    /// by the configured timeout even when every replica stalls.
    fn wait_for_forced_flush(
        &self,
        done_rx: &Receiver<Option<usize>>,
        replicas: usize,
        metrics: &Arc<WriterMetrics>,
    ) -> Option<usize> {
        let deadline = Instant::now() + self.config.forced_flush_timeout();
        for _ in 0..replicas {
            match done_rx.recv_deadline(deadline) {
                Ok(Some(idx)) => return Some(idx),
                // One replica failed its flush; wait on the rest.
                Ok(None) => continue,
                Err(_) => {
                    metrics.forced_flush_timeout();
                    return None;
                }
            }
        }
        // Every replica reported a flush error.
        metrics.forced_flush_failed_all();
        None
    }

    fn remove_from_queue_with_lock(
        &self,
        state: &mut WriterState,
        handle: Handle,
        metrics: &WriterMetrics,
    ) {
        let msg = state.queue.remove(handle);
        metrics.message_dequeue(1);
        self.finish(msg);
    }

    fn finish(&self, msg: Arc<Message>) {
        msg.close();
        self.pool.put(msg);
    }
}

/// Per-scan counter tally, flushed to the sink once per scan so the hot
/// classification loop does not emit per element.
#[derive(Default)]
struct ScanTally {
    message_closed: u64,
    message_dropped_buffer_full: u64,
    message_dropped_ttl_expire: u64,
    message_retry: u64,
    processed_ack: u64,
    processed_closed: u64,
    processed_drop: u64,
    processed_not_ready: u64,
    processed_ttl: u64,
    processed_write: u64,
}

impl ScanTally {
    fn record(&self, metrics: &WriterMetrics) {
        if self.message_closed > 0 {
            metrics.message_closed(self.message_closed);
        }
        if self.message_dropped_buffer_full > 0 {
            metrics.message_dropped("buffer-full", self.message_dropped_buffer_full);
        }
        if self.message_dropped_ttl_expire > 0 {
            metrics.message_dropped("ttl-expire", self.message_dropped_ttl_expire);
        }
        if self.message_retry > 0 {
            metrics.message_retry(self.message_retry);
        }
        if self.processed_ack > 0 {
            metrics.message_processed("ack", self.processed_ack);
        }
        if self.processed_closed > 0 {
            metrics.message_processed("closed", self.processed_closed);
        }
        if self.processed_drop > 0 {
            metrics.message_processed("drop", self.processed_drop);
        }
        if self.processed_not_ready > 0 {
            metrics.message_processed("not-ready", self.processed_not_ready);
        }
        if self.processed_ttl > 0 {
            metrics.message_processed("ttl", self.processed_ttl);
        }
        if self.processed_write > 0 {
            metrics.message_processed("write", self.processed_write);
        }
    }
}
