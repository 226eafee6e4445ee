//! # Lockwatch
//!
//! A runtime deadlock watcher for hooked native mutexes.
//!
//! Lockwatch sits behind a mutex interposition layer (a GOT/PLT rewriter, an
//! LD_PRELOAD shim, or similar) and diagnoses suspected deadlocks in
//! production, from inside the affected process, with stack traces of the
//! participating threads. It is strictly observational: every intercepted
//! acquisition is still performed against the real platform primitive, and
//! no application-visible return value is ever changed.
//!
//! ## Overview
//!
//! The detector tracks three things:
//!
//! - a **lock registry** of every live mutex the hook layer reports, with
//!   its recursion policy and dynamic ownership state,
//! - a **blocked-wait table** of `(blocked thread → owning thread via
//!   mutex)` edges for every currently stalled acquisition,
//! - the **wait cycles** reachable from a stalled thread's wait points,
//!   discovered whenever a bounded wait exceeds its gate.
//!
//! ## Features
//!
//! - **Bounded waits with escalation**: acquisitions run in gate-sized
//!   slices (tighter on the main thread); each expiry emits a Block warning
//!   and feeds the cycle detector
//! - **Self-deadlock reports**: a thread re-acquiring a non-recursive mutex
//!   it already owns is reported once per attempt, with its stack
//! - **Cycle reports**: closed wait cycles are reported once per
//!   participating thread, with one line per edge and the origin thread's
//!   stack
//! - **Structured delivery**: every deadlock is also materialized as a
//!   serializable [`DeadlockInfo`] and handed to a callback and an optional
//!   JSON-lines record file, on a dedicated thread
//! - **Pluggable seams**: the hook installer, original primitives, platform
//!   queries and the log sink are all traits; a C ABI bridge lives in
//!   [`ffi`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lockwatch::LockWatch;
//! use lockwatch::hooks::{HookInstaller, MutexHooks, OriginOps};
//! use std::sync::Arc;
//!
//! # struct GotInstaller;
//! # impl HookInstaller for GotInstaller {
//! #     fn set_target(&mut self, _target: &str) {}
//! #     fn install(&mut self, _hooks: Arc<dyn MutexHooks>) -> anyhow::Result<()> { Ok(()) }
//! #     fn origin_ops(&self) -> Option<Arc<dyn OriginOps>> { None }
//! # }
//! // The hook layer is platform glue; the detector only consumes it.
//! let mut installer = GotInstaller;
//!
//! let detector = LockWatch::new()
//!     .sdk_version(30)
//!     .target("libapp.so")
//!     .record_file("/data/local/tmp/deadlocks.jsonl")
//!     .callback(|info| {
//!         eprintln!("deadlock from thread {}: {:?}", info.origin_thread, info.cycle);
//!     })
//!     .install(&mut installer)
//!     .expect("install deadlock watcher");
//!
//! if detector.is_enabled() {
//!     // Hooks resolved; intercepted mutex calls are now being watched.
//! }
//! ```

mod core;
pub use core::{
    DeadlockInfo, DeadlockSource, Detector, FacadeSink, GateConfig, LockAddr, LockDescriptor,
    LockWatch, LogSink, MutexKind, ThreadId, TimedWaitStrategy, WaitEdge,
};

pub mod hooks;
pub mod platform;

pub mod ffi;
