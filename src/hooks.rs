//! The interception seam consumed by the detector.
//!
//! The detector never installs hooks itself. A platform-specific hook layer
//! (a GOT/PLT rewriter, an LD_PRELOAD shim, or a test harness) intercepts the
//! process's mutex entry points, forwards each call to the [`MutexHooks`]
//! pre-hooks implemented by the detector, and honors the returned
//! [`HookAction`]. The same layer hands the detector the un-intercepted
//! originals through [`OriginOps`], so the detector can drive the real
//! primitive without re-entering its own hooks.

use crate::core::types::LockAddr;
use std::sync::Arc;

/// What a pre-hook decided about an intercepted call.
///
/// `Handled(ret)` means the detector performed the operation itself and the
/// hook layer must return `ret` to the application without calling the
/// original primitive. `PassThrough` means the hook layer forwards the call
/// to the original primitive untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Handled(i32),
    PassThrough,
}

impl HookAction {
    pub fn is_handled(&self) -> bool {
        matches!(self, HookAction::Handled(_))
    }
}

/// Mutex attribute type observed at init, as reported by the hook layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexAttrKind {
    Normal,
    Recursive,
    ErrorCheck,
}

/// Arguments of an intercepted mutex init call.
///
/// `attr` is `None` when the application passed no attributes (or the hook
/// layer could not decode them); the mutex is then treated as non-recursive.
#[derive(Debug, Clone, Copy)]
pub struct MutexInitContext {
    pub mutex: LockAddr,
    pub attr: Option<MutexAttrKind>,
}

#[derive(Debug, Clone, Copy)]
pub struct MutexDestroyContext {
    pub mutex: LockAddr,
}

#[derive(Debug, Clone, Copy)]
pub struct MutexLockContext {
    pub mutex: LockAddr,
}

#[derive(Debug, Clone, Copy)]
pub struct MutexUnlockContext {
    pub mutex: LockAddr,
}

/// Context shared by all rw-lock entry points. The rw-lock surface is
/// declared so a hook layer can route every entry point through the detector,
/// but it currently has no tracking semantics.
#[derive(Debug, Clone, Copy)]
pub struct RwLockContext {
    pub rwlock: LockAddr,
}

/// Pre-hooks for the intercepted mutex family, implemented by the detector.
///
/// All entry points are re-entrant across threads and must never call a
/// hooked primitive themselves.
pub trait MutexHooks: Send + Sync {
    fn on_mutex_init(&self, cx: &MutexInitContext) -> HookAction;
    fn on_mutex_destroy(&self, cx: &MutexDestroyContext) -> HookAction;
    fn on_mutex_lock(&self, cx: &MutexLockContext) -> HookAction;
    fn on_mutex_unlock(&self, cx: &MutexUnlockContext) -> HookAction;

    fn on_rwlock_init(&self, _cx: &RwLockContext) -> HookAction {
        HookAction::PassThrough
    }
    fn on_rwlock_destroy(&self, _cx: &RwLockContext) -> HookAction {
        HookAction::PassThrough
    }
    fn on_rwlock_rdlock(&self, _cx: &RwLockContext) -> HookAction {
        HookAction::PassThrough
    }
    fn on_rwlock_wrlock(&self, _cx: &RwLockContext) -> HookAction {
        HookAction::PassThrough
    }
    fn on_rwlock_unlock(&self, _cx: &RwLockContext) -> HookAction {
        HookAction::PassThrough
    }
}

/// The un-intercepted originals of the platform's mutex primitives.
///
/// Return values follow the platform convention: 0 on success, an errno-style
/// code otherwise. The timed variants correspond to the two generations of
/// the platform API; [`TimedWaitStrategy`](crate::TimedWaitStrategy) selects
/// which one the driver calls.
pub trait OriginOps: Send + Sync {
    /// Untimed blocking lock.
    fn mutex_lock(&self, mutex: LockAddr) -> i32;
    /// Timed lock with an absolute CLOCK_REALTIME deadline.
    fn mutex_timedlock(&self, mutex: LockAddr, deadline: TimeSpec) -> i32;
    /// Timed lock with a relative millisecond timeout (legacy platforms).
    fn mutex_lock_timeout_ms(&self, mutex: LockAddr, timeout_ms: u32) -> i32;
}

/// The external hook installer the bootstrap talks to.
pub trait HookInstaller {
    /// Declare the binary whose imports should be instrumented.
    fn set_target(&mut self, target: &str);
    /// Install the pre-hooks. After this returns, intercepted calls may start
    /// arriving on any thread.
    fn install(&mut self, hooks: Arc<dyn MutexHooks>) -> anyhow::Result<()>;
    /// The un-intercepted originals, once resolved. `None` means resolution
    /// failed and the detector must disable itself.
    fn origin_ops(&self) -> Option<Arc<dyn OriginOps>>;
}

/// A CLOCK_REALTIME instant, used for absolute timed-lock deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

impl TimeSpec {
    /// Return this instant advanced by `ms`, with the nanosecond field
    /// normalized back into `[0, 1s)`.
    pub fn add_millis(self, ms: u64) -> TimeSpec {
        let mut sec = self.sec + (ms as i64 / 1000);
        let mut nsec = self.nsec + (ms as i64 % 1000) * NANOS_PER_MILLI;
        if nsec >= NANOS_PER_SEC {
            sec += nsec / NANOS_PER_SEC;
            nsec %= NANOS_PER_SEC;
        }
        TimeSpec { sec, nsec }
    }
}
