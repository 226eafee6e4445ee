//! Shared harness for the scenario tests.
//!
//! The detector is driven exactly the way a hook layer would drive it: the
//! harness plays the glue role (forward intercepted calls to the pre-hooks,
//! honor the returned action against a fake platform mutex), `TestOrigin`
//! plays the un-intercepted primitives, and `TestPlatform` supplies thread
//! identity, clocks and synthetic stack traces. Gates are shrunk to tens of
//! milliseconds so deadlocks are recognized quickly.

#![allow(dead_code)]

use lockwatch::hooks::{
    HookAction, HookInstaller, MutexAttrKind, MutexDestroyContext, MutexHooks, MutexInitContext,
    MutexLockContext, MutexUnlockContext, OriginOps, TimeSpec,
};
use lockwatch::platform::Platform;
use lockwatch::{DeadlockInfo, Detector, GateConfig, LockAddr, LockWatch, LogSink, ThreadId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const DETECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUIET_TIMEOUT: Duration = Duration::from_millis(600);

pub fn fast_gates() -> GateConfig {
    GateConfig {
        gate_ms: 80,
        main_gate_ms: 40,
        main_resample_ms: 30,
    }
}

/// Stable nonzero id for the calling test thread.
pub fn test_tid() -> ThreadId {
    let mut hasher = std::hash::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() | 1
}

// ---------------------------------------------------------------------------
// Fake platform mutex: blocking, timed and recursive-aware, like pthread's.

#[derive(Default)]
struct FakeMutexState {
    owner: ThreadId,
    depth: u32,
}

struct FakeMutex {
    recursive: bool,
    state: Mutex<FakeMutexState>,
    available: Condvar,
}

impl FakeMutex {
    fn new(recursive: bool) -> Self {
        FakeMutex {
            recursive,
            state: Mutex::new(FakeMutexState::default()),
            available: Condvar::new(),
        }
    }

    fn try_grant(&self, state: &mut FakeMutexState, tid: ThreadId) -> bool {
        if state.owner == 0 {
            state.owner = tid;
            state.depth = 1;
            return true;
        }
        if self.recursive && state.owner == tid {
            state.depth += 1;
            return true;
        }
        false
    }

    fn lock_blocking(&self, tid: ThreadId) -> i32 {
        let mut state = self.state.lock();
        while !self.try_grant(&mut state, tid) {
            self.available.wait(&mut state);
        }
        0
    }

    fn lock_timed(&self, tid: ThreadId, timeout: Duration) -> i32 {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if self.try_grant(&mut state, tid) {
                return 0;
            }
            if Instant::now() >= deadline {
                return libc::ETIMEDOUT;
            }
            self.available.wait_until(&mut state, deadline);
        }
    }

    fn unlock(&self, tid: ThreadId) -> i32 {
        let mut state = self.state.lock();
        if state.owner != tid {
            return libc::EPERM;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = 0;
            self.available.notify_one();
        }
        0
    }
}

// ---------------------------------------------------------------------------
// Un-intercepted originals over the fake mutexes.

pub struct TestOrigin {
    locks: Mutex<HashMap<LockAddr, Arc<FakeMutex>>>,
}

impl TestOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(TestOrigin {
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn create_mutex(&self, addr: LockAddr, recursive: bool) {
        self.locks
            .lock()
            .insert(addr, Arc::new(FakeMutex::new(recursive)));
    }

    pub fn destroy_mutex(&self, addr: LockAddr) {
        self.locks.lock().remove(&addr);
    }

    fn get(&self, addr: LockAddr) -> Option<Arc<FakeMutex>> {
        self.locks.lock().get(&addr).cloned()
    }

    pub fn raw_lock(&self, addr: LockAddr) -> i32 {
        match self.get(addr) {
            Some(lock) => lock.lock_blocking(test_tid()),
            None => libc::EINVAL,
        }
    }

    pub fn raw_unlock(&self, addr: LockAddr) -> i32 {
        match self.get(addr) {
            Some(lock) => lock.unlock(test_tid()),
            None => libc::EINVAL,
        }
    }
}

impl OriginOps for TestOrigin {
    fn mutex_lock(&self, mutex: LockAddr) -> i32 {
        self.raw_lock(mutex)
    }

    fn mutex_timedlock(&self, mutex: LockAddr, deadline: TimeSpec) -> i32 {
        let Some(lock) = self.get(mutex) else {
            return libc::EINVAL;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let target = Duration::new(deadline.sec.max(0) as u64, deadline.nsec.max(0) as u32);
        lock.lock_timed(test_tid(), target.saturating_sub(now))
    }

    fn mutex_lock_timeout_ms(&self, mutex: LockAddr, timeout_ms: u32) -> i32 {
        match self.get(mutex) {
            Some(lock) => lock.lock_timed(test_tid(), Duration::from_millis(timeout_ms as u64)),
            None => libc::EINVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Hook installer.

pub struct TestInstaller {
    origin: Arc<TestOrigin>,
    pub missing_origins: bool,
    pub target: Option<String>,
    pub hooks: Option<Arc<dyn MutexHooks>>,
}

impl TestInstaller {
    pub fn new(origin: Arc<TestOrigin>) -> Self {
        TestInstaller {
            origin,
            missing_origins: false,
            target: None,
            hooks: None,
        }
    }
}

impl HookInstaller for TestInstaller {
    fn set_target(&mut self, target: &str) {
        self.target = Some(target.to_string());
    }

    fn install(&mut self, hooks: Arc<dyn MutexHooks>) -> anyhow::Result<()> {
        self.hooks = Some(hooks);
        Ok(())
    }

    fn origin_ops(&self) -> Option<Arc<dyn OriginOps>> {
        if self.missing_origins {
            None
        } else {
            Some(self.origin.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Platform.

pub struct TestPlatform {
    main_tid: AtomicU64,
}

impl TestPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(TestPlatform {
            main_tid: AtomicU64::new(0),
        })
    }

    /// Declare `tid` the application main thread (tighter gate).
    pub fn set_main_thread(&self, tid: ThreadId) {
        self.main_tid.store(tid, Ordering::SeqCst);
    }
}

impl Platform for TestPlatform {
    fn current_thread_id(&self) -> ThreadId {
        test_tid()
    }

    fn is_main_thread(&self, tid: ThreadId) -> bool {
        tid != 0 && tid == self.main_tid.load(Ordering::SeqCst)
    }

    fn thread_name(&self, tid: ThreadId) -> String {
        format!("t-{tid}")
    }

    fn monotonic_ms(&self) -> u64 {
        static START: OnceLock<Instant> = OnceLock::new();
        let start = *START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u64 + 1
    }

    fn realtime_now(&self) -> TimeSpec {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        TimeSpec {
            sec: now.as_secs() as i64,
            nsec: now.subsec_nanos() as i64,
        }
    }

    fn capture_stack(&self, max_frames: usize) -> String {
        (0..max_frames)
            .map(|i| format!("  #{i:02} pc 0x{i:04x} fake::frame_{i}\n"))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Sink.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub level: Level,
    pub tag: String,
    pub message: String,
}

#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
}

impl MemorySink {
    pub fn count(&self, level: Level, tag: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level && r.tag == tag)
            .count()
    }

    pub fn messages(&self, tag: &str) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| r.message.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn warn(&self, tag: &str, message: &str) {
        self.records.lock().push(SinkRecord {
            level: Level::Warn,
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }

    fn error(&self, tag: &str, message: &str) {
        self.records.lock().push(SinkRecord {
            level: Level::Error,
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Harness.

/// Clonable handle the test threads use to drive the detector the way the
/// hook glue would: pre-hook first, then the real primitive as told.
#[derive(Clone)]
pub struct Client {
    pub detector: Arc<Detector>,
    pub origin: Arc<TestOrigin>,
}

impl Client {
    pub fn init_mutex(&self, addr: LockAddr, recursive: bool) {
        let attr = if recursive {
            Some(MutexAttrKind::Recursive)
        } else {
            Some(MutexAttrKind::Normal)
        };
        let action = self
            .detector
            .on_mutex_init(&MutexInitContext { mutex: addr, attr });
        assert_eq!(action, HookAction::PassThrough);
        self.origin.create_mutex(addr, recursive);
    }

    pub fn destroy_mutex(&self, addr: LockAddr) {
        let action = self
            .detector
            .on_mutex_destroy(&MutexDestroyContext { mutex: addr });
        assert_eq!(action, HookAction::PassThrough);
        self.origin.destroy_mutex(addr);
    }

    pub fn lock(&self, addr: LockAddr) -> i32 {
        match self.detector.on_mutex_lock(&MutexLockContext { mutex: addr }) {
            HookAction::Handled(ret) => ret,
            HookAction::PassThrough => self.origin.raw_lock(addr),
        }
    }

    pub fn unlock(&self, addr: LockAddr) -> i32 {
        let action = self
            .detector
            .on_mutex_unlock(&MutexUnlockContext { mutex: addr });
        assert_eq!(action, HookAction::PassThrough);
        self.origin.raw_unlock(addr)
    }
}

pub struct Harness {
    pub client: Client,
    pub platform: Arc<TestPlatform>,
    pub sink: Arc<MemorySink>,
    pub deadlocks: Receiver<DeadlockInfo>,
}

impl Harness {
    pub fn expect_deadlock(&self, timeout: Duration) -> DeadlockInfo {
        match self.deadlocks.recv_timeout(timeout) {
            Ok(info) => info,
            Err(_) => panic!("No deadlock detected within {timeout:?}"),
        }
    }

    pub fn assert_no_deadlock(&self, timeout: Duration) {
        assert!(
            self.deadlocks.recv_timeout(timeout).is_err(),
            "Unexpected deadlock detected"
        );
    }
}

pub fn build_harness(missing_origins: bool) -> Harness {
    let origin = TestOrigin::new();
    let platform = TestPlatform::new();
    let sink = Arc::new(MemorySink::default());
    let (tx, rx) = channel::<DeadlockInfo>();

    let mut installer = TestInstaller::new(origin.clone());
    installer.missing_origins = missing_origins;

    let detector = LockWatch::new()
        .sdk_version(30)
        .target("libapp.so")
        .gates(fast_gates())
        .platform(platform.clone())
        .sink(sink.clone())
        .callback(move |info| {
            let _ = tx.send(info);
        })
        .install(&mut installer)
        .expect("Failed to install the deadlock watcher");

    Harness {
        client: Client { detector, origin },
        platform,
        sink,
        deadlocks: rx,
    }
}

pub fn start_watch() -> Harness {
    let harness = build_harness(false);
    assert!(harness.client.detector.is_enabled());
    harness
}
