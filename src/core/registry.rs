//! The lock registry: one descriptor per live tracked mutex.
//!
//! Descriptors are `Arc`-shared so the lock and unlock paths can read them
//! without holding the registry guard; the map mutation itself is the only
//! thing the guard covers. A descriptor outliving its map entry (destroy
//! racing a lookup) is therefore never a dangling read, even though such a
//! race is a caller bug per the platform's mutex lifetime contract.

use crate::core::types::{LockAddr, MutexKind, ThreadId};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identity and dynamic ownership state of one tracked mutex.
///
/// `owner`, `depth` and `enter_time` are written by whichever thread holds
/// (or just held) the underlying primitive, so the primitive itself
/// serializes the writes. Readers on other threads see relaxed snapshots and
/// must tolerate staleness.
pub struct LockDescriptor {
    addr: LockAddr,
    kind: MutexKind,
    recursive: bool,
    /// Owning thread id; 0 when free.
    owner: AtomicU64,
    /// Recursion depth; 0 when free, above 1 only for recursive mutexes.
    depth: AtomicU32,
    /// Monotonic ms of the 0→1 depth transition; 0 when free.
    enter_time: AtomicU64,
}

impl LockDescriptor {
    fn new(addr: LockAddr, kind: MutexKind, recursive: bool) -> Self {
        LockDescriptor {
            addr,
            kind,
            recursive,
            owner: AtomicU64::new(0),
            depth: AtomicU32::new(0),
            enter_time: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> LockAddr {
        self.addr
    }

    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Current owner, if any. May be stale the moment it is read.
    pub fn owner(&self) -> Option<ThreadId> {
        match self.owner.load(Ordering::Relaxed) {
            0 => None,
            tid => Some(tid),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Monotonic ms at which the current owner entered, 0 when free.
    pub fn enter_time(&self) -> u64 {
        self.enter_time.load(Ordering::Relaxed)
    }

    /// Record a successful acquisition by `tid`.
    pub(crate) fn note_acquired(&self, tid: ThreadId, now_ms: u64) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.owner.store(tid, Ordering::Relaxed);
        if depth == 1 {
            self.enter_time.store(now_ms, Ordering::Relaxed);
        }
    }

    /// Record a release by `tid`. Returns false without mutating anything if
    /// `tid` is not the current owner.
    pub(crate) fn note_released(&self, tid: ThreadId) -> bool {
        if self.owner.load(Ordering::Relaxed) != tid {
            return false;
        }
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed) - 1;
        if depth == 0 {
            self.owner.store(0, Ordering::Relaxed);
            self.enter_time.store(0, Ordering::Relaxed);
        }
        true
    }
}

/// Map of every live tracked mutex, keyed by primitive address.
pub(crate) struct LockRegistry {
    locks: Mutex<FxHashMap<LockAddr, Arc<LockDescriptor>>>,
}

impl LockRegistry {
    pub(crate) fn new() -> Self {
        LockRegistry {
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Create the descriptor for `addr`, replacing any existing one (the
    /// platform recycles addresses after destroy).
    pub(crate) fn on_init(&self, addr: LockAddr, kind: MutexKind, recursive: bool) {
        let descriptor = Arc::new(LockDescriptor::new(addr, kind, recursive));
        self.locks.lock().insert(addr, descriptor);
    }

    /// Drop the descriptor for `addr`. Unknown addresses are a no-op.
    pub(crate) fn on_destroy(&self, addr: LockAddr) {
        self.locks.lock().remove(&addr);
    }

    /// Descriptor for `addr`, or `None` for mutexes created before the hooks
    /// were installed (those must pass through untouched).
    pub(crate) fn lookup(&self, addr: LockAddr) -> Option<Arc<LockDescriptor>> {
        self.locks.lock().get(&addr).cloned()
    }
}
