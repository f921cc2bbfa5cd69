//! Producer-owned payload capability.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;

/// Reference-counted payload shared between the producer front-end and
/// the per-shard writers.
///
/// Each writer that admits a message takes one reference and releases it
/// when the envelope is closed. The producer may drop the blob at any
/// time to reclaim buffer space; marshaling re-checks validity so a
/// reclaimed blob is skipped rather than sent.
pub struct SharedPayload {
    data: Bytes,
    refs: AtomicUsize,
    dropped: AtomicBool,
    consumed: AtomicBool,
}

impl SharedPayload {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            refs: AtomicUsize::new(0),
            dropped: AtomicBool::new(false),
            consumed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn inc_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one writer reference. The last release marks the payload
    /// consumed, signalling the producer that every writer is done with it.
    pub fn dec_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "payload ref underflow");
        if prev == 1 {
            self.consumed.store(true, Ordering::Release);
        }
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Producer-side invalidation, e.g. when its buffer is full and the
    /// oldest blobs are reclaimed.
    pub fn drop_payload(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    pub fn is_dropped_or_consumed(&self) -> bool {
        self.dropped.load(Ordering::Acquire) || self.consumed.load(Ordering::Acquire)
    }

    /// Returns the marshaled bytes, or `None` when the blob is no longer
    /// valid to send.
    pub fn marshal(&self) -> Option<Bytes> {
        if self.is_dropped_or_consumed() {
            return None;
        }
        Some(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_returns_bytes_while_valid() {
        let payload = SharedPayload::new(Bytes::from_static(b"value"));
        payload.inc_ref();
        assert_eq!(payload.marshal().unwrap(), Bytes::from_static(b"value"));
        assert!(!payload.is_dropped_or_consumed());
    }

    #[test]
    fn last_dec_ref_marks_consumed() {
        let payload = SharedPayload::new(Bytes::from_static(b"value"));
        payload.inc_ref();
        payload.inc_ref();
        payload.dec_ref();
        assert!(!payload.is_dropped_or_consumed());
        payload.dec_ref();
        assert!(payload.is_dropped_or_consumed());
        assert!(payload.marshal().is_none());
    }

    #[test]
    fn dropped_payload_does_not_marshal() {
        let payload = SharedPayload::new(Bytes::from_static(b"value"));
        payload.inc_ref();
        payload.drop_payload();
        assert!(payload.marshal().is_none());
        assert!(payload.is_dropped_or_consumed());
    }
}
