use serde::{Deserialize, Serialize};

/// Kernel-level thread identifier. 0 is reserved for "no thread".
pub type ThreadId = u64;

/// Address of an underlying platform primitive, used as map and report key.
pub type LockAddr = usize;

/// The family of tracked primitives.
///
/// Only `Mutex` has tracking semantics; `RwLock` is a declared extension
/// point carried through descriptors and edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutexKind {
    Mutex,
    RwLock,
}

/// How a deadlock was recognized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeadlockSource {
    /// A thread re-acquiring a non-recursive mutex it already owns.
    SelfLock,
    /// A directed cycle in the blocked-wait edges.
    WaitCycle,
}

/// One wait relationship inside a reported deadlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitEdge {
    pub blocked_thread: ThreadId,
    pub owner_thread: ThreadId,
    pub mutex: LockAddr,
}

/// Structured result of a deadlock detection, delivered to the registered
/// callback and the record file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockInfo {
    pub source: DeadlockSource,
    /// The thread whose stalled acquisition triggered the report.
    pub origin_thread: ThreadId,
    /// The wait edges forming the cycle. For a self-deadlock this is a single
    /// edge whose blocked and owner thread coincide.
    pub cycle: Vec<WaitEdge>,
    /// RFC 3339 timestamp of the detection.
    pub timestamp: String,
}
