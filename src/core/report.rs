//! Diagnostic report formatting.
//!
//! Three report categories leave the core: Block warnings (a wait exceeded
//! its gate), self-deadlock reports and wait-cycle reports. All of them are
//! preformatted UTF-8 text pushed through a pluggable [`LogSink`]; the
//! structured counterpart ([`DeadlockInfo`](crate::DeadlockInfo)) travels
//! separately through the dispatcher. Buffers here are scoped to the call
//! and stack traces are already frame-capped by the platform layer.

use crate::core::blocked::BlockedEdge;
use crate::core::types::{LockAddr, ThreadId};
use std::fmt::Write as _;
use std::sync::Arc;

pub(crate) const TAG_BLOCK: &str = "MUTEX:Block";
pub(crate) const TAG_DEADLOCK: &str = "MUTEX:Deadlock";
pub(crate) const TAG_UNLOCK: &str = "MUTEX:Unlock";
pub(crate) const TAG_HOOKS: &str = "MUTEX:Hooks";

/// Where the preformatted reports go. Both bodies are single- or multi-line
/// UTF-8 text; the tag selects the report family.
pub trait LogSink: Send + Sync {
    fn warn(&self, tag: &str, message: &str);
    fn error(&self, tag: &str, message: &str);
}

/// Default sink forwarding to the `log` facade, with the tag as the target,
/// so hosts reuse whatever logger backend they already run.
#[derive(Debug, Default)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn warn(&self, tag: &str, message: &str) {
        log::warn!(target: tag, "{message}");
    }

    fn error(&self, tag: &str, message: &str) {
        log::error!(target: tag, "{message}");
    }
}

pub(crate) struct Reporter {
    sink: Arc<dyn LogSink>,
}

impl Reporter {
    pub(crate) fn new(sink: Arc<dyn LogSink>) -> Self {
        Reporter { sink }
    }

    /// A wait exceeded its gate without (yet) being recognized as a deadlock.
    pub(crate) fn blocked(
        &self,
        tid: ThreadId,
        name: &str,
        owner: Option<ThreadId>,
        mutex: LockAddr,
        waited_ms: u64,
        held_ms: u64,
        err: i32,
    ) {
        let message = format!(
            "[tid {tid}/{name}] blocked by [tid {owner}] on lock({mutex:#x}) {waited_ms}ms, \
             holds: {held_ms}ms, err: {err}",
            owner = owner.unwrap_or(0),
        );
        self.sink.warn(TAG_BLOCK, &message);
    }

    /// A thread tried to re-acquire a non-recursive mutex it already owns.
    pub(crate) fn self_deadlock(&self, tid: ThreadId, name: &str, is_main: bool, stack: &str) {
        let mut message = String::new();
        message.push_str(
            "[DEAD LOCK] Thread self locked by non recursive mutex ------------------------------>\n\n",
        );
        if is_main {
            message.push_str("ANR warning: Main Thread dead locked!!!!\n");
        }
        let _ = writeln!(message, "Deadlock callstack, thread: {tid} ({name}) :");
        message.push_str(stack);
        message.push_str("[End] Dead Lock");
        self.sink.error(TAG_DEADLOCK, &message);
    }

    /// A closed wait cycle, one line per edge, then the origin thread's
    /// stack.
    pub(crate) fn wait_cycle(
        &self,
        link: &[BlockedEdge],
        tid: ThreadId,
        name: &str,
        is_main: bool,
        stack: &str,
    ) {
        let mut message = String::new();
        message.push_str("[Warning] Dead Lock found --------------------->\n");
        if is_main {
            message.push_str("ANR warning: Main Thread dead locked!!!!\n");
        }
        for edge in link {
            let _ = writeln!(
                message,
                "[thread {blocked}] blocked by [thread {owner}] on lock({mutex:#x}) >>>>",
                blocked = edge.blocked_thread,
                owner = edge.owner_thread,
                mutex = edge.mutex,
            );
        }
        let _ = writeln!(message, "Deadlock callstack, thread: {tid} ({name}) :");
        message.push_str(stack);
        message.push_str("[End] Dead Lock");
        self.sink.error(TAG_DEADLOCK, &message);
    }

    /// Unlock attempted by a thread that does not own the mutex.
    pub(crate) fn non_owner_unlock(&self, mutex: LockAddr, owner: Option<ThreadId>, tid: ThreadId) {
        let message = format!(
            "[tid {tid}] unlock on lock({mutex:#x}) owned by [tid {owner}]",
            owner = owner.unwrap_or(0),
        );
        self.sink.warn(TAG_UNLOCK, &message);
    }

    /// The hook layer could not provide the original primitives; the
    /// detector stays disabled.
    pub(crate) fn hooks_unavailable(&self, reason: &str) {
        self.sink
            .warn(TAG_HOOKS, &format!("mutex hooks unavailable, detection disabled: {reason}"));
    }
}
