//! Message envelope and envelope pool.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::payload::SharedPayload;

/// Wire identity of a message: the writer's replicated shard id plus a
/// per-writer monotonically increasing counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Metadata {
    pub shard: u64,
    pub id: u64,
}

/// Pooled message envelope.
///
/// An envelope lives in the writer's queue and in the pending-ack table
/// at the same time, so every mutable field is atomic. The ack flag uses
/// Release/Acquire ordering: the ack path flips it from an external
/// thread while the scan classifies the message, and the scan's
/// dropped-or-consumed branch re-reads it to break that race.
pub struct Message {
    shard: AtomicU64,
    id: AtomicU64,
    payload: Mutex<Option<Arc<SharedPayload>>>,
    init_nanos: AtomicI64,
    expected_process_at_nanos: AtomicI64,
    retry_at_nanos: AtomicI64,
    write_times: AtomicU32,
    sent_at_nanos: AtomicI64,
    acked: AtomicBool,
    closed: AtomicBool,
    reads_in_flight: AtomicI32,
}

impl Message {
    fn new() -> Self {
        Self {
            shard: AtomicU64::new(0),
            id: AtomicU64::new(0),
            payload: Mutex::new(None),
            init_nanos: AtomicI64::new(0),
            expected_process_at_nanos: AtomicI64::new(0),
            retry_at_nanos: AtomicI64::new(0),
            write_times: AtomicU32::new(0),
            sent_at_nanos: AtomicI64::new(0),
            acked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reads_in_flight: AtomicI32::new(0),
        }
    }

    /// Re-arm a (possibly recycled) envelope for a new write.
    pub(crate) fn set(&self, meta: Metadata, payload: Arc<SharedPayload>, now_nanos: i64) {
        self.shard.store(meta.shard, Ordering::Relaxed);
        self.id.store(meta.id, Ordering::Relaxed);
        *self.payload.lock().expect("message payload lock poisoned") = Some(payload);
        self.init_nanos.store(now_nanos, Ordering::Relaxed);
        self.expected_process_at_nanos
            .store(now_nanos, Ordering::Relaxed);
        self.retry_at_nanos.store(0, Ordering::Relaxed);
        self.write_times.store(0, Ordering::Relaxed);
        self.sent_at_nanos.store(0, Ordering::Relaxed);
        self.reads_in_flight.store(0, Ordering::Relaxed);
        self.acked.store(false, Ordering::Release);
        self.closed.store(false, Ordering::Release);
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            shard: self.shard.load(Ordering::Relaxed),
            id: self.id.load(Ordering::Relaxed),
        }
    }

    pub fn init_nanos(&self) -> i64 {
        self.init_nanos.load(Ordering::Relaxed)
    }

    pub fn expected_process_at_nanos(&self) -> i64 {
        self.expected_process_at_nanos.load(Ordering::Relaxed)
    }

    pub fn retry_at_nanos(&self) -> i64 {
        self.retry_at_nanos.load(Ordering::Relaxed)
    }

    pub(crate) fn set_retry_at_nanos(&self, nanos: i64) {
        self.retry_at_nanos.store(nanos, Ordering::Relaxed);
    }

    pub fn write_times(&self) -> u32 {
        self.write_times.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_write_times(&self) {
        self.write_times.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent_at_nanos(&self) -> i64 {
        self.sent_at_nanos.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sent_at_nanos(&self, nanos: i64) {
        self.sent_at_nanos.store(nanos, Ordering::Relaxed);
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub(crate) fn ack(&self) {
        self.acked.store(true, Ordering::Release);
    }

    /// Guards marshaling against a concurrent close: the payload
    /// reference is only released once no reads are in flight.
    pub(crate) fn inc_reads(&self) {
        self.reads_in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_reads(&self) {
        let prev = self.reads_in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "message reads in flight underflow");
        if prev == 1 && self.closed.load(Ordering::Acquire) {
            self.release_payload();
        }
    }

    pub(crate) fn marshal(&self) -> Option<Bytes> {
        let payload = self
            .payload
            .lock()
            .expect("message payload lock poisoned")
            .as_ref()
            .map(Arc::clone)?;
        payload.marshal()
    }

    pub(crate) fn is_dropped_or_consumed(&self) -> bool {
        match self
            .payload
            .lock()
            .expect("message payload lock poisoned")
            .as_ref()
        {
            Some(payload) => payload.is_dropped_or_consumed(),
            None => true,
        }
    }

    /// Detach the envelope from its payload. The writer reference is
    /// released immediately unless a marshal is in flight, in which case
    /// the last `dec_reads` releases it.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if self.reads_in_flight.load(Ordering::Acquire) == 0 {
            self.release_payload();
        }
    }

    fn release_payload(&self) {
        let taken = self
            .payload
            .lock()
            .expect("message payload lock poisoned")
            .take();
        if let Some(payload) = taken {
            payload.dec_ref();
        }
    }
}

/// Freelist of message envelopes, shared by the writers of one producer.
pub struct MessagePool {
    free: Mutex<Vec<Arc<Message>>>,
}

impl MessagePool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn get(&self) -> Arc<Message> {
        let mut free = self.free.lock().expect("message pool lock poisoned");
        while let Some(msg) = free.pop() {
            // A late ack may still hold a clone of a recycled envelope;
            // such envelopes are discarded instead of reused.
            if Arc::strong_count(&msg) == 1 {
                return msg;
            }
        }
        Arc::new(Message::new())
    }

    pub(crate) fn put(&self, msg: Arc<Message>) {
        self.free
            .lock()
            .expect("message pool lock poisoned")
            .push(msg);
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &'static [u8]) -> Arc<SharedPayload> {
        Arc::new(SharedPayload::new(Bytes::from_static(data)))
    }

    #[test]
    fn set_rearms_a_recycled_envelope() {
        let msg = Message::new();
        let p = payload(b"a");
        p.inc_ref();
        msg.set(Metadata { shard: 1, id: 7 }, Arc::clone(&p), 100);
        msg.inc_write_times();
        msg.set_retry_at_nanos(500);
        msg.ack();
        msg.close();

        let p2 = payload(b"b");
        p2.inc_ref();
        msg.set(Metadata { shard: 1, id: 8 }, Arc::clone(&p2), 200);
        assert_eq!(msg.metadata().id, 8);
        assert_eq!(msg.write_times(), 0);
        assert_eq!(msg.retry_at_nanos(), 0);
        assert!(!msg.is_acked());
        assert_eq!(msg.marshal().unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn close_releases_the_payload_ref() {
        let msg = Message::new();
        let p = payload(b"a");
        p.inc_ref();
        msg.set(Metadata { shard: 0, id: 1 }, Arc::clone(&p), 0);
        assert_eq!(p.ref_count(), 1);
        msg.close();
        assert_eq!(p.ref_count(), 0);
        assert!(p.is_dropped_or_consumed());
        assert!(msg.is_dropped_or_consumed());
    }

    #[test]
    fn close_defers_release_to_last_reader() {
        let msg = Message::new();
        let p = payload(b"a");
        p.inc_ref();
        msg.set(Metadata { shard: 0, id: 1 }, Arc::clone(&p), 0);

        msg.inc_reads();
        msg.close();
        assert_eq!(p.ref_count(), 1);
        msg.dec_reads();
        assert_eq!(p.ref_count(), 0);
    }

    #[test]
    fn pool_recycles_unique_envelopes_only() {
        let pool = MessagePool::new();
        let msg = pool.get();
        let held = Arc::clone(&msg);
        pool.put(msg);
        // The clone is still alive, so the pool must allocate fresh.
        let fresh = pool.get();
        assert!(!Arc::ptr_eq(&held, &fresh));
        drop(held);

        let msg = pool.get();
        let ptr = Arc::as_ptr(&msg);
        pool.put(msg);
        let recycled = pool.get();
        assert_eq!(ptr, Arc::as_ptr(&recycled));
    }
}
