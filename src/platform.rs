//! Platform primitives consumed by the detector.
//!
//! Everything the detector needs from the host that is not a mutex call goes
//! through [`Platform`]: thread identity and names, the two clocks, and
//! bounded stack capture. [`SystemPlatform`] is the production
//! implementation; test suites substitute their own.

use crate::core::types::ThreadId;
use crate::hooks::TimeSpec;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Platform: Send + Sync {
    /// Kernel-level id of the calling thread. Never 0.
    fn current_thread_id(&self) -> ThreadId;

    /// Whether `tid` is the application's main/UI thread. Stalls there get a
    /// tighter initial gate.
    fn is_main_thread(&self, tid: ThreadId) -> bool;

    /// Human-readable name of `tid`, for reports. Best effort.
    fn thread_name(&self, tid: ThreadId) -> String;

    /// Monotonic milliseconds. Only differences are meaningful; the epoch is
    /// arbitrary but nonzero (0 is the "never entered" sentinel).
    fn monotonic_ms(&self) -> u64;

    /// Current CLOCK_REALTIME instant. The platform's absolute timed-lock
    /// deadlines are defined against the realtime clock, not the monotonic
    /// one.
    fn realtime_now(&self) -> TimeSpec;

    /// Symbolated stack trace of the calling thread, at most `max_frames`
    /// frames, one frame per line.
    fn capture_stack(&self, max_frames: usize) -> String;
}

/// [`Platform`] backed by the host OS.
#[derive(Debug, Default)]
pub struct SystemPlatform;

impl SystemPlatform {
    pub fn new() -> Self {
        SystemPlatform
    }
}

impl Platform for SystemPlatform {
    fn current_thread_id(&self) -> ThreadId {
        current_tid()
    }

    fn is_main_thread(&self, tid: ThreadId) -> bool {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // On Linux the main thread's tid equals the process id.
            tid == unsafe { libc::getpid() } as ThreadId
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = tid;
            false
        }
    }

    fn thread_name(&self, tid: ThreadId) -> String {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let path = format!("/proc/self/task/{tid}/comm");
            if let Ok(comm) = std::fs::read_to_string(path) {
                let comm = comm.trim();
                if !comm.is_empty() {
                    return comm.to_string();
                }
            }
        }
        if tid == self.current_thread_id()
            && let Some(name) = std::thread::current().name()
        {
            return name.to_string();
        }
        format!("thread-{tid}")
    }

    fn monotonic_ms(&self) -> u64 {
        #[cfg(unix)]
        {
            let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            unsafe {
                libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
            }
            ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
        }
        #[cfg(not(unix))]
        {
            use std::sync::OnceLock;
            use std::time::Instant;
            static START: OnceLock<Instant> = OnceLock::new();
            let start = *START.get_or_init(Instant::now);
            start.elapsed().as_millis() as u64 + 1
        }
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
        let mut out = String::new();
        let mut index = 0usize;
        backtrace::trace(|frame| {
            let ip = frame.ip();
            let mut line = format!("  #{index:02} pc {ip:p}");
            backtrace::resolve_frame(frame, |symbol| {
                if let Some(name) = symbol.name() {
                    let _ = write!(line, " {name}");
                }
                if let (Some(file), Some(lineno)) = (symbol.filename(), symbol.lineno()) {
                    let _ = write!(line, " ({}:{lineno})", file.display());
                }
            });
            out.push_str(&line);
            out.push('\n');
            index += 1;
            index < max_frames
        });
        out
    }
}

fn current_tid() -> ThreadId {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        unsafe { libc::syscall(libc::SYS_gettid) as ThreadId }
    }
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        let mut tid: u64 = 0;
        unsafe {
            libc::pthread_threadid_np(libc::pthread_self(), &mut tid);
        }
        tid
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::hash::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish() | 1
    }
}
