//! In-memory message queue with stable handles and a new-write cursor.

use std::sync::Arc;

use crate::message::Message;

/// Stable reference to a queue element.
///
/// Handles stay valid until the element is removed. Only the scan worker
/// removes elements, so a handle saved across a batch boundary cannot be
/// invalidated by a concurrent producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Handle(usize);

struct Node {
    msg: Arc<Message>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked FIFO backed by a slab, so inserts at a known position
/// and removals are O(1) without walking the list.
///
/// The `last_new_write` cursor lives in the writer: producers insert
/// after it so concurrent writes keep their arrival order, and the scan
/// clears it at the start of every pass.
pub(crate) struct MessageQueue {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    len: usize,
}

impl MessageQueue {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn front(&self) -> Option<Handle> {
        self.head.map(Handle)
    }

    pub(crate) fn next(&self, handle: Handle) -> Option<Handle> {
        self.node(handle.0).next.map(Handle)
    }

    pub(crate) fn get(&self, handle: Handle) -> &Arc<Message> {
        &self.node(handle.0).msg
    }

    pub(crate) fn push_front(&mut self, msg: Arc<Message>) -> Handle {
        let idx = self.alloc(Node {
            msg,
            prev: None,
            next: self.head,
        });
        if let Some(head) = self.head {
            self.node_mut(head).prev = Some(idx);
        }
        self.head = Some(idx);
        self.len += 1;
        Handle(idx)
    }

    pub(crate) fn insert_after(&mut self, after: Handle, msg: Arc<Message>) -> Handle {
        let next = self.node(after.0).next;
        let idx = self.alloc(Node {
            msg,
            prev: Some(after.0),
            next,
        });
        self.node_mut(after.0).next = Some(idx);
        if let Some(next) = next {
            self.node_mut(next).prev = Some(idx);
        }
        self.len += 1;
        Handle(idx)
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Arc<Message> {
        let node = self.nodes[handle.0]
            .take()
            .expect("queue handle already removed");
        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        if let Some(next) = node.next {
            self.node_mut(next).prev = node.prev;
        }
        self.free.push(handle.0);
        self.len -= 1;
        node.msg
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("queue handle is stale")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("queue handle is stale")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Metadata;
    use crate::payload::SharedPayload;
    use bytes::Bytes;

    fn msg(id: u64) -> Arc<Message> {
        let pool = crate::message::MessagePool::new();
        let m = pool.get();
        let payload = Arc::new(SharedPayload::new(Bytes::from_static(b"x")));
        payload.inc_ref();
        m.set(Metadata { shard: 0, id }, payload, 0);
        m
    }

    fn ids(queue: &MessageQueue) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = queue.front();
        while let Some(handle) = cur {
            out.push(queue.get(handle).metadata().id);
            cur = queue.next(handle);
        }
        out
    }

    #[test]
    fn cursor_insert_preserves_arrival_order() {
        let mut queue = MessageQueue::new();
        // First write of a scan cycle lands at the front, the rest after
        // the cursor, exactly like the writer does it.
        let mut cursor = None;
        for id in 1..=3 {
            cursor = Some(match cursor {
                Some(at) => queue.insert_after(at, msg(id)),
                None => queue.push_front(msg(id)),
            });
        }
        assert_eq!(ids(&queue), vec![1, 2, 3]);

        // A new scan clears the cursor; the next burst clusters at the
        // head, ahead of the older elements.
        cursor = None;
        for id in 4..=5 {
            cursor = Some(match cursor {
                Some(at) => queue.insert_after(at, msg(id)),
                None => queue.push_front(msg(id)),
            });
        }
        assert_eq!(ids(&queue), vec![4, 5, 1, 2, 3]);
    }

    #[test]
    fn remove_relinks_neighbors() {
        let mut queue = MessageQueue::new();
        let a = queue.push_front(msg(3));
        let b = queue.insert_after(a, msg(2));
        let c = queue.insert_after(b, msg(1));
        assert_eq!(queue.len(), 3);

        let removed = queue.remove(b);
        assert_eq!(removed.metadata().id, 2);
        assert_eq!(ids(&queue), vec![3, 1]);
        assert_eq!(queue.next(a), Some(c));

        queue.remove(a);
        assert_eq!(queue.front(), Some(c));
        queue.remove(c);
        assert!(queue.is_empty());
        assert_eq!(queue.front(), None);
    }

    #[test]
    fn slots_are_reused_after_removal() {
        let mut queue = MessageQueue::new();
        let a = queue.push_front(msg(1));
        queue.remove(a);
        let b = queue.push_front(msg(2));
        // Same slab slot, fresh element.
        assert_eq!(a, b);
        assert_eq!(ids(&queue), vec![2]);
    }
}
