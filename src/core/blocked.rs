//! The blocked-wait table: one edge per currently stalled acquisition.
//!
//! The table is an insertion-ordered sequence rather than a keyed map: a
//! thread can hold several wait points at once (write-lock style
//! acquisitions), and the cycle detector enumerates them all, breaking
//! successor ties by insertion order.

use crate::core::registry::LockDescriptor;
use crate::core::types::{LockAddr, MutexKind, ThreadId};
use parking_lot::Mutex;

/// A recorded wait relationship: `blocked_thread` stalled on `mutex`, which
/// `owner_thread` held at recording time. The owner is a snapshot and may be
/// stale; 0 means the lock looked free when the edge was recorded.
#[derive(Debug, Clone)]
pub(crate) struct BlockedEdge {
    pub mutex: LockAddr,
    pub kind: MutexKind,
    pub blocked_thread: ThreadId,
    pub owner_thread: ThreadId,
    /// Set once a deadlock involving this edge has been reported, so the
    /// same thread does not report again.
    pub dumped: bool,
}

pub(crate) struct BlockedTable {
    pub(crate) edges: Mutex<Vec<BlockedEdge>>,
}

impl BlockedTable {
    pub(crate) fn new() -> Self {
        BlockedTable {
            edges: Mutex::new(Vec::new()),
        }
    }

    /// Append an edge for `tid` stalled on `descriptor`, snapshotting the
    /// current owner.
    pub(crate) fn record(&self, tid: ThreadId, descriptor: &LockDescriptor) {
        let edge = BlockedEdge {
            mutex: descriptor.addr(),
            kind: descriptor.kind(),
            blocked_thread: tid,
            owner_thread: descriptor.owner().unwrap_or(0),
            dumped: false,
        };
        self.edges.lock().push(edge);
    }

    /// Remove the first edge recorded for `tid`. Threads with several wait
    /// points call this once per successful acquisition.
    pub(crate) fn clear(&self, tid: ThreadId) {
        let mut edges = self.edges.lock();
        if let Some(index) = edges.iter().position(|e| e.blocked_thread == tid) {
            edges.remove(index);
        }
    }

    /// Drop every edge recorded against `mutex`; called when its descriptor
    /// is torn down.
    pub(crate) fn purge_mutex(&self, mutex: LockAddr) {
        self.edges.lock().retain(|e| e.mutex != mutex);
    }

    /// Read-only iteration under the table guard. The cycle detector uses
    /// this to snapshot the table before walking it.
    pub(crate) fn scan<F: FnMut(&BlockedEdge)>(&self, mut visitor: F) {
        for edge in self.edges.lock().iter() {
            visitor(edge);
        }
    }

    /// Set the reported mark on every edge recorded for `tid`, so that
    /// thread's deadlock is not reported again.
    pub(crate) fn mark_dumped(&self, tid: ThreadId) {
        for edge in self.edges.lock().iter_mut() {
            if edge.blocked_thread == tid {
                edge.dumped = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::LockRegistry;

    fn descriptor(addr: LockAddr, owner: ThreadId) -> std::sync::Arc<LockDescriptor> {
        let registry = LockRegistry::new();
        registry.on_init(addr, MutexKind::Mutex, false);
        let d = registry.lookup(addr).unwrap();
        if owner != 0 {
            d.note_acquired(owner, 1);
        }
        d
    }

    #[test]
    fn record_snapshots_owner() {
        let table = BlockedTable::new();
        table.record(2, &descriptor(0x100, 1));
        table.record(3, &descriptor(0x200, 0));

        let mut seen = Vec::new();
        table.scan(|e| seen.push((e.blocked_thread, e.owner_thread, e.mutex)));
        assert_eq!(seen, vec![(2, 1, 0x100), (3, 0, 0x200)]);
    }

    #[test]
    fn clear_removes_first_match_only() {
        let table = BlockedTable::new();
        let d1 = descriptor(0x100, 1);
        let d2 = descriptor(0x200, 1);
        table.record(2, &d1);
        table.record(2, &d2);

        table.clear(2);
        let mut remaining = Vec::new();
        table.scan(|e| remaining.push(e.mutex));
        assert_eq!(remaining, vec![0x200]);

        table.clear(2);
        assert!(table.edges.lock().is_empty());
    }

    #[test]
    fn purge_drops_every_edge_for_a_mutex() {
        let table = BlockedTable::new();
        let shared = descriptor(0x100, 1);
        table.record(2, &shared);
        table.record(3, &shared);
        table.record(4, &descriptor(0x200, 1));

        table.purge_mutex(0x100);
        let mut remaining = Vec::new();
        table.scan(|e| remaining.push(e.blocked_thread));
        assert_eq!(remaining, vec![4]);
    }
}
