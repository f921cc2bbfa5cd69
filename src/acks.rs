//! Pending-ack table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::message::{Message, Metadata};

/// Map from message id to its pending envelope.
///
/// The table is per-writer, so the shard component of the metadata is
/// constant and the id alone is the key. Acking is idempotent:
/// lookup-and-delete happens under the lock, the envelope's own ack flag
/// is flipped outside it.
pub(crate) struct AckTable {
    pending: Mutex<HashMap<u64, Arc<Message>>>,
}

impl AckTable {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::with_capacity(initial_capacity)),
        }
    }

    pub(crate) fn add(&self, meta: Metadata, msg: Arc<Message>) {
        self.pending
            .lock()
            .expect("ack table lock poisoned")
            .insert(meta.id, msg);
    }

    pub(crate) fn remove(&self, meta: Metadata) {
        self.pending
            .lock()
            .expect("ack table lock poisoned")
            .remove(&meta.id);
    }

    /// Returns `Some(expected_process_at_nanos)` only on the
    /// unacked-to-acked transition; acking an unknown or already acked
    /// message returns `None`.
    pub(crate) fn ack(&self, meta: Metadata) -> Option<i64> {
        let msg = self
            .pending
            .lock()
            .expect("ack table lock poisoned")
            .remove(&meta.id)?;
        let expected_process_at = msg.expected_process_at_nanos();
        msg.ack();
        Some(expected_process_at)
    }

    pub(crate) fn size(&self) -> usize {
        self.pending.lock().expect("ack table lock poisoned").len()
    }
}
