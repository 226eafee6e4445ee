//! The detector value and its bootstrap.
//!
//! A [`Detector`] bundles the two process-wide tables (lock registry,
//! blocked-wait table), the reporter, the platform seam and the original
//! primitives behind one value. The hook layer calls into it through the
//! [`MutexHooks`] trait; everything else reaches it through the `Arc`
//! returned by [`LockWatch::install`].

use crate::core::blocked::BlockedTable;
use crate::core::config::{GateConfig, TimedWaitStrategy};
use crate::core::logger::ReportLogger;
use crate::core::registry::{LockDescriptor, LockRegistry};
use crate::core::report::{FacadeSink, LogSink, Reporter};
use crate::core::types::{DeadlockInfo, DeadlockSource, LockAddr, MutexKind, ThreadId, WaitEdge};
use crate::hooks::{
    HookAction, HookInstaller, MutexAttrKind, MutexDestroyContext, MutexHooks, MutexInitContext,
    MutexLockContext, MutexUnlockContext, OriginOps,
};
use crate::platform::{Platform, SystemPlatform};
use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Sender, unbounded};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

type DeadlockCallback = Arc<dyn Fn(DeadlockInfo) + Send + Sync>;

/// Background dispatcher for deadlock report delivery.
///
/// Callbacks and record-file appends run on a dedicated thread fed through a
/// channel, so neither executes on a thread that is itself deadlocked.
struct Dispatcher {
    sender: Sender<DeadlockInfo>,
    _thread_handle: std::thread::JoinHandle<()>,
}

impl Dispatcher {
    fn spawn(callback: Option<DeadlockCallback>, logger: Option<ReportLogger>) -> Result<Self> {
        let (tx, rx) = unbounded::<DeadlockInfo>();

        let thread_handle = std::thread::Builder::new()
            .name("lockwatch-report".to_string())
            .spawn(move || {
                while let Ok(info) = rx.recv() {
                    if let Some(logger) = &logger {
                        logger.append(&info);
                    }
                    if let Some(callback) = &callback {
                        callback(info);
                    }
                }
            })?;

        Ok(Dispatcher {
            sender: tx,
            _thread_handle: thread_handle,
        })
    }

    fn send(&self, info: DeadlockInfo) {
        // Non-blocking; reports are dropped if the channel is closed.
        let _ = self.sender.send(info);
    }
}

/// Runtime deadlock detector for hooked native mutexes.
///
/// Tracks every live mutex the hook layer reports, bounds the time threads
/// spend blocked on them, and walks the blocked-wait edges for cycles when a
/// wait exceeds its gate. Strictly observational: the underlying lock call
/// always proceeds.
pub struct Detector {
    pub(crate) config: GateConfig,
    pub(crate) strategy: TimedWaitStrategy,
    pub(crate) registry: LockRegistry,
    pub(crate) blocked: BlockedTable,
    pub(crate) reporter: Reporter,
    pub(crate) platform: Arc<dyn Platform>,
    origin: OnceLock<Arc<dyn OriginOps>>,
    dispatcher: Option<Dispatcher>,
    enabled: AtomicBool,
}

impl Detector {
    /// Descriptor of a tracked mutex, or `None` for mutexes created before
    /// the hooks were installed.
    pub fn lookup(&self, addr: LockAddr) -> Option<Arc<LockDescriptor>> {
        self.registry.lookup(addr)
    }

    /// Whether hooks resolved and detection is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn dispatch_deadlock(
        &self,
        source: DeadlockSource,
        origin_thread: ThreadId,
        cycle: Vec<WaitEdge>,
    ) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.send(DeadlockInfo {
                source,
                origin_thread,
                cycle,
                timestamp: Utc::now().to_rfc3339(),
            });
        }
    }
}

impl MutexHooks for Detector {
    fn on_mutex_init(&self, cx: &MutexInitContext) -> HookAction {
        if self.is_enabled() {
            let recursive = cx.attr == Some(MutexAttrKind::Recursive);
            self.registry.on_init(cx.mutex, MutexKind::Mutex, recursive);
        }
        // The real init still runs in the hook glue.
        HookAction::PassThrough
    }

    fn on_mutex_destroy(&self, cx: &MutexDestroyContext) -> HookAction {
        if self.is_enabled() {
            self.registry.on_destroy(cx.mutex);
            // Destroying a mutex threads still wait on is a caller bug, but
            // stale edges must not feed the cycle detector.
            self.blocked.purge_mutex(cx.mutex);
        }
        HookAction::PassThrough
    }

    fn on_mutex_lock(&self, cx: &MutexLockContext) -> HookAction {
        if !self.is_enabled() {
            return HookAction::PassThrough;
        }
        let Some(origin) = self.origin.get() else {
            return HookAction::PassThrough;
        };
        match self.registry.lookup(cx.mutex) {
            Some(descriptor) => HookAction::Handled(self.acquire(origin, &descriptor)),
            None => HookAction::PassThrough,
        }
    }

    fn on_mutex_unlock(&self, cx: &MutexUnlockContext) -> HookAction {
        if self.is_enabled()
            && let Some(descriptor) = self.registry.lookup(cx.mutex)
        {
            self.release(&descriptor);
        }
        // The real unlock is performed by the hook glue afterwards.
        HookAction::PassThrough
    }
}

/// Builder for a [`Detector`]: configure, then [`install`](LockWatch::install).
///
/// # Example
///
/// ```rust,no_run
/// use lockwatch::LockWatch;
/// use lockwatch::hooks::{HookInstaller, MutexHooks, OriginOps};
/// use std::sync::Arc;
///
/// # struct GotInstaller;
/// # impl HookInstaller for GotInstaller {
/// #     fn set_target(&mut self, _target: &str) {}
/// #     fn install(&mut self, _hooks: Arc<dyn MutexHooks>) -> anyhow::Result<()> { Ok(()) }
/// #     fn origin_ops(&self) -> Option<Arc<dyn OriginOps>> { None }
/// # }
/// // The hook layer is platform glue; the detector only consumes it.
/// let mut installer = GotInstaller;
///
/// let detector = LockWatch::new()
///     .sdk_version(30)
///     .target("libapp.so")
///     .callback(|info| eprintln!("deadlock: {:?}", info.cycle))
///     .install(&mut installer)
///     .expect("install deadlock watcher");
/// ```
pub struct LockWatch {
    sdk_version: u32,
    target: Option<String>,
    record_path: Option<PathBuf>,
    config: GateConfig,
    platform: Option<Arc<dyn Platform>>,
    sink: Option<Arc<dyn LogSink>>,
    callback: Option<DeadlockCallback>,
}

impl Default for LockWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl LockWatch {
    pub fn new() -> Self {
        LockWatch {
            sdk_version: 0,
            target: None,
            record_path: None,
            config: GateConfig::default(),
            platform: None,
            sink: None,
            callback: None,
        }
    }

    /// Platform SDK generation; selects the timed-wait entry point.
    pub fn sdk_version(mut self, sdk_version: u32) -> Self {
        self.sdk_version = sdk_version;
        self
    }

    /// Name of the binary whose mutex imports should be instrumented.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Append structured deadlock reports to this file, one JSON object per
    /// line.
    pub fn record_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// Override the escalation budgets.
    pub fn gates(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Substitute the platform primitives (thread ids, clocks, stack
    /// capture).
    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Substitute the report sink. Defaults to the `log` facade.
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Invoked with every detected deadlock, on a dedicated thread.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Build the detector, declare the target, and install the hooks.
    ///
    /// If the installer cannot provide the original primitives the detector
    /// is returned disabled: one warning is emitted and every hook passes
    /// through forever. Only host configuration mistakes (an unwritable
    /// record file, a dispatcher thread that cannot spawn) surface as
    /// errors.
    pub fn install(self, installer: &mut dyn HookInstaller) -> Result<Arc<Detector>> {
        let platform: Arc<dyn Platform> = self
            .platform
            .unwrap_or_else(|| Arc::new(SystemPlatform::new()));
        let sink: Arc<dyn LogSink> = self.sink.unwrap_or_else(|| Arc::new(FacadeSink));

        // Touch the timed primitive once before any hook can observe it, so
        // its lazy linkage is resolved by the time a hooked wait needs it.
        probe_timed_wait();

        let logger = match &self.record_path {
            Some(path) => Some(ReportLogger::with_file(path)?),
            None => None,
        };
        let dispatcher = if self.callback.is_some() || logger.is_some() {
            Some(Dispatcher::spawn(self.callback, logger)?)
        } else {
            None
        };

        let detector = Arc::new(Detector {
            config: self.config,
            strategy: TimedWaitStrategy::for_sdk(self.sdk_version),
            registry: LockRegistry::new(),
            blocked: BlockedTable::new(),
            reporter: Reporter::new(sink),
            platform,
            origin: OnceLock::new(),
            dispatcher,
            enabled: AtomicBool::new(false),
        });

        if let Some(target) = &self.target {
            installer.set_target(target);
        }
        if let Err(err) = installer.install(detector.clone()) {
            detector.reporter.hooks_unavailable(&format!("{err:#}"));
            return Ok(detector);
        }
        match installer.origin_ops() {
            Some(origin) => {
                let _ = detector.origin.set(origin);
                detector.enabled.store(true, Ordering::SeqCst);
            }
            None => {
                detector
                    .reporter
                    .hooks_unavailable("original primitives unresolved");
            }
        }

        Ok(detector)
    }
}

/// Force the host to resolve the timed-wait primitive's lazy linkage by
/// exercising it once on a transient mutex. Skipping this leaves a latent
/// crash on the first hooked timed wait on platforms with lazy binding.
fn probe_timed_wait() {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        libc::pthread_mutexattr_init(&mut attr);
        let mut probe: libc::pthread_mutex_t = std::mem::zeroed();
        libc::pthread_mutex_init(&mut probe, &attr);

        // The deadline must be CLOCK_REALTIME based; "now" is enough, the
        // call only has to reach the symbol.
        let mut deadline: libc::timespec = std::mem::zeroed();
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut deadline);
        if libc::pthread_mutex_timedlock(&mut probe, &deadline) == 0 {
            libc::pthread_mutex_unlock(&mut probe);
        }

        libc::pthread_mutex_destroy(&mut probe);
        libc::pthread_mutexattr_destroy(&mut attr);
    }
}
