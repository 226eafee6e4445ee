//! C ABI bindings for hosts whose hook layer is C/C++.
//!
//! The native hook installer (a GOT/PLT rewriter living in the app's SDK)
//! registers the detector once through [`lockwatch_register`], passing the
//! un-intercepted originals as a table of function pointers, then routes
//! every intercepted mutex call through the `lockwatch_on_*` entry points.
//! Each entry point follows the pre-hook contract: it returns 1 when the
//! detector handled the call (the out-parameter carries the return value the
//! application must see) and 0 when the hook layer should fall through to
//! the original primitive.

use crate::core::{Detector, LockAddr, LockWatch};
use crate::hooks::{
    HookAction, HookInstaller, MutexAttrKind, MutexDestroyContext, MutexHooks, MutexInitContext,
    MutexLockContext, MutexUnlockContext, OriginOps, RwLockContext, TimeSpec,
};
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int, c_longlong, c_uint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static DETECTOR: OnceLock<Arc<Detector>> = OnceLock::new();
static DEADLOCK_DETECTED: AtomicBool = AtomicBool::new(false);

/// Un-intercepted originals of the platform's mutex primitives, supplied by
/// the hook layer. `mutex_lock` is mandatory; of the two timed variants only
/// the one matching the declared SDK generation is called.
#[repr(C)]
pub struct LockwatchOriginTable {
    pub mutex_lock: Option<unsafe extern "C" fn(mutex: *mut c_void) -> c_int>,
    pub mutex_timedlock: Option<
        unsafe extern "C" fn(mutex: *mut c_void, deadline_sec: c_longlong, deadline_nsec: c_longlong) -> c_int,
    >,
    pub mutex_lock_timeout_ms:
        Option<unsafe extern "C" fn(mutex: *mut c_void, timeout_ms: c_uint) -> c_int>,
}

struct COriginTable {
    table: LockwatchOriginTable,
}

impl OriginOps for COriginTable {
    fn mutex_lock(&self, mutex: LockAddr) -> i32 {
        match self.table.mutex_lock {
            Some(lock) => unsafe { lock(mutex as *mut c_void) },
            None => libc::ENOSYS,
        }
    }

    fn mutex_timedlock(&self, mutex: LockAddr, deadline: TimeSpec) -> i32 {
        match self.table.mutex_timedlock {
            Some(timedlock) => unsafe {
                timedlock(mutex as *mut c_void, deadline.sec, deadline.nsec)
            },
            None => libc::ENOSYS,
        }
    }

    fn mutex_lock_timeout_ms(&self, mutex: LockAddr, timeout_ms: u32) -> i32 {
        match self.table.mutex_lock_timeout_ms {
            Some(lock_timeout) => unsafe { lock_timeout(mutex as *mut c_void, timeout_ms) },
            None => libc::ENOSYS,
        }
    }
}

/// Installer facade for the C hook layer: the hooks themselves are already
/// routed by the C side, so install is a formality and only the origin table
/// matters.
struct FfiInstaller {
    origin: Option<Arc<COriginTable>>,
}

impl HookInstaller for FfiInstaller {
    fn set_target(&mut self, _target: &str) {
        // The C hook layer already knows its target binary.
    }

    fn install(&mut self, _hooks: Arc<dyn MutexHooks>) -> anyhow::Result<()> {
        Ok(())
    }

    fn origin_ops(&self) -> Option<Arc<dyn OriginOps>> {
        self.origin
            .clone()
            .map(|table| table as Arc<dyn OriginOps>)
    }
}

/// Register the deadlock detector.
///
/// # Arguments
/// * `sdk_version` - Platform SDK generation; selects the timed-wait entry
///   point.
/// * `target_so` - Name of the binary being instrumented, or NULL.
/// * `record_path` - File to append structured deadlock reports to (one JSON
///   object per line), or NULL to disable recording.
/// * `origin` - Table of un-intercepted originals. NULL, or a table without
///   `mutex_lock`, leaves the detector installed but disabled.
/// * `callback` - Invoked with each deadlock serialized as a NUL-terminated
///   JSON string, on a dedicated thread. NULL for no callback.
///
/// # Returns
/// * `0` on success (check [`lockwatch_is_enabled`] for hook resolution)
/// * `1` if the detector is already registered
/// * `-1` if a path or name is not valid UTF-8
/// * `-2` if the record file or the report thread could not be set up
///
/// # Safety
/// `target_so` and `record_path` must be NULL or valid NUL-terminated
/// strings. `origin` must be NULL or point to a table whose function
/// pointers stay valid for the life of the process.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_register(
    sdk_version: c_int,
    target_so: *const c_char,
    record_path: *const c_char,
    origin: *const LockwatchOriginTable,
    callback: Option<extern "C" fn(*const c_char)>,
) -> c_int {
    if DETECTOR.get().is_some() {
        return 1;
    }

    let mut builder = LockWatch::new().sdk_version(sdk_version.max(0) as u32);

    if !target_so.is_null() {
        match unsafe { CStr::from_ptr(target_so) }.to_str() {
            Ok(target) => builder = builder.target(target),
            Err(_) => return -1,
        }
    }
    if !record_path.is_null() {
        match unsafe { CStr::from_ptr(record_path) }.to_str() {
            Ok(path) => builder = builder.record_file(path),
            Err(_) => return -1,
        }
    }

    builder = builder.callback(move |info| {
        DEADLOCK_DETECTED.store(true, Ordering::SeqCst);
        if let Some(callback) = callback
            && let Ok(json) = serde_json::to_string(&info)
            && let Ok(c_json) = CString::new(json)
        {
            callback(c_json.as_ptr());
        }
    });

    let origin_table = if origin.is_null() {
        None
    } else {
        let table = unsafe { std::ptr::read(origin) };
        table
            .mutex_lock
            .is_some()
            .then(|| Arc::new(COriginTable { table }))
    };

    let mut installer = FfiInstaller {
        origin: origin_table,
    };
    match builder.install(&mut installer) {
        Ok(detector) => {
            let _ = DETECTOR.set(detector);
            0
        }
        Err(_) => -2,
    }
}

/// Whether hooks resolved and detection is active.
///
/// # Safety
/// Safe to call from any thread at any time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_is_enabled() -> c_int {
    match DETECTOR.get() {
        Some(detector) if detector.is_enabled() => 1,
        _ => 0,
    }
}

/// Check whether a deadlock has been detected since registration or the
/// last [`lockwatch_reset_deadlock_flag`].
///
/// # Safety
/// Safe to call from any thread at any time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_is_deadlock_detected() -> c_int {
    DEADLOCK_DETECTED.load(Ordering::SeqCst) as c_int
}

/// Re-arm [`lockwatch_is_deadlock_detected`] after a report was handled.
///
/// # Safety
/// Safe to call from any thread at any time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_reset_deadlock_flag() {
    DEADLOCK_DETECTED.store(false, Ordering::SeqCst);
}

/// Pre-hook for mutex init. `attr_kind`: 0 normal, 1 recursive, 2
/// errorcheck, any negative value for unknown attributes.
///
/// # Returns
/// Always 0: the real init must run.
///
/// # Safety
/// `mutex` must be the application's mutex pointer as seen by the
/// intercepted call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_on_mutex_init(mutex: *mut c_void, attr_kind: c_int) -> c_int {
    if let Some(detector) = DETECTOR.get() {
        let attr = match attr_kind {
            0 => Some(MutexAttrKind::Normal),
            1 => Some(MutexAttrKind::Recursive),
            2 => Some(MutexAttrKind::ErrorCheck),
            _ => None,
        };
        detector.on_mutex_init(&MutexInitContext {
            mutex: mutex as LockAddr,
            attr,
        });
    }
    0
}

/// Pre-hook for mutex destroy.
///
/// # Returns
/// Always 0: the real destroy must run.
///
/// # Safety
/// `mutex` must be the application's mutex pointer as seen by the
/// intercepted call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_on_mutex_destroy(mutex: *mut c_void) -> c_int {
    if let Some(detector) = DETECTOR.get() {
        detector.on_mutex_destroy(&MutexDestroyContext {
            mutex: mutex as LockAddr,
        });
    }
    0
}

/// Pre-hook for mutex lock.
///
/// # Returns
/// * `1` - the detector performed the acquisition; `*ret_val` holds the code
///   the application must see and the original must NOT be called
/// * `0` - untracked mutex, pass through to the original
///
/// # Safety
/// `mutex` must be the application's mutex pointer; `ret_val` must be NULL
/// or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_on_mutex_lock(mutex: *mut c_void, ret_val: *mut c_int) -> c_int {
    let Some(detector) = DETECTOR.get() else {
        return 0;
    };
    match detector.on_mutex_lock(&MutexLockContext {
        mutex: mutex as LockAddr,
    }) {
        HookAction::Handled(code) => {
            if !ret_val.is_null() {
                unsafe { *ret_val = code };
            }
            1
        }
        HookAction::PassThrough => 0,
    }
}

/// Pre-hook for mutex unlock.
///
/// # Returns
/// Always 0: the real unlock must run after the bookkeeping.
///
/// # Safety
/// `mutex` must be the application's mutex pointer as seen by the
/// intercepted call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_on_mutex_unlock(mutex: *mut c_void) -> c_int {
    if let Some(detector) = DETECTOR.get() {
        detector.on_mutex_unlock(&MutexUnlockContext {
            mutex: mutex as LockAddr,
        });
    }
    0
}

macro_rules! rwlock_entry {
    ($(#[$doc:meta])* $name:ident, $method:ident) => {
        $(#[$doc])*
        /// The rw-lock surface is declared but has no tracking semantics.
        ///
        /// # Returns
        /// Always 0: pass through to the original.
        ///
        /// # Safety
        /// `rwlock` must be the application's rwlock pointer as seen by the
        /// intercepted call.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(rwlock: *mut c_void) -> c_int {
            if let Some(detector) = DETECTOR.get() {
                detector.$method(&RwLockContext {
                    rwlock: rwlock as LockAddr,
                });
            }
            0
        }
    };
}

rwlock_entry!(
    /// Pre-hook for rwlock init.
    lockwatch_on_rwlock_init,
    on_rwlock_init
);
rwlock_entry!(
    /// Pre-hook for rwlock destroy.
    lockwatch_on_rwlock_destroy,
    on_rwlock_destroy
);
rwlock_entry!(
    /// Pre-hook for rwlock read lock.
    lockwatch_on_rwlock_rdlock,
    on_rwlock_rdlock
);
rwlock_entry!(
    /// Pre-hook for rwlock write lock.
    lockwatch_on_rwlock_wrlock,
    on_rwlock_wrlock
);
rwlock_entry!(
    /// Pre-hook for rwlock unlock.
    lockwatch_on_rwlock_unlock,
    on_rwlock_unlock
);
