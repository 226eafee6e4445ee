//! Cycle search over the blocked-wait edges.
//!
//! If a thread is deadlocked, its own wait points necessarily sit on the
//! cycle, so the search only walks paths starting from the input thread's
//! edges instead of scanning the whole graph. The walk is O(N²) in the edge
//! count; realistic tables hold a few dozen edges at most.

use crate::core::blocked::{BlockedEdge, BlockedTable};
use crate::core::types::ThreadId;
use fxhash::FxHashSet;

/// One discovered deadlock: the ordered edges of a closed wait cycle,
/// starting at an edge of the input thread and ending at an edge owned by it.
pub(crate) type DeadlockLink = Vec<BlockedEdge>;

/// Walk the blocked-wait edges reachable from `origin`'s wait points and
/// return every closed cycle back to `origin`.
///
/// The table is snapshotted through [`BlockedTable::scan`] and the walk runs
/// on the snapshot. That is equivalent to walking under the guard: `origin`
/// is the calling thread, so its own edges cannot change underneath it, and
/// every other thread only records, clears and marks its own edges.
///
/// Unless `force` is set, an already-dumped edge for `origin` suppresses the
/// whole search: that thread's deadlock has been reported.
///
/// If the search closes fewer cycles than `origin` has wait points, the
/// results are discarded entirely: the thread has several wait points and at
/// least one of them has not been recorded yet, so a report now would be
/// partial. The next timeout tick retries with complete information.
pub(crate) fn find_deadlock_links(
    table: &BlockedTable,
    origin: ThreadId,
    force: bool,
) -> Vec<DeadlockLink> {
    let mut edges = Vec::new();
    table.scan(|edge| edges.push(edge.clone()));
    if edges.len() < 2 {
        return Vec::new();
    }

    let mut start_points = Vec::new();
    for (index, edge) in edges.iter().enumerate() {
        if edge.blocked_thread == origin {
            if !force && edge.dumped {
                return Vec::new();
            }
            start_points.push(index);
        }
    }

    let mut links: Vec<DeadlockLink> = Vec::new();
    for &start in &start_points {
        let mut path = vec![start];
        let mut visited = FxHashSet::default();
        visited.insert(start);
        let mut current = start;

        while let Some(next) = next_hop(&edges, current) {
            // A revisit means the walk fell into a cycle that does not pass
            // through `origin`; that cycle belongs to another thread's tick.
            if !visited.insert(next) {
                break;
            }
            path.push(next);
            if edges[next].owner_thread == origin {
                links.push(path.iter().map(|&i| edges[i].clone()).collect());
                // One wait point closes at most one cycle.
                break;
            }
            current = next;
        }
    }

    if !links.is_empty() {
        if links.len() >= start_points.len() {
            table.mark_dumped(origin);
        } else {
            links.clear();
        }
    }

    links
}

/// First edge in insertion order, other than `from`, whose blocked thread is
/// the thread `from` is waiting on.
fn next_hop(edges: &[BlockedEdge], from: usize) -> Option<usize> {
    let wanted = edges[from].owner_thread;
    if wanted == 0 {
        return None;
    }
    edges
        .iter()
        .enumerate()
        .find(|&(index, edge)| index != from && edge.blocked_thread == wanted)
        .map(|(index, _)| index)
}
