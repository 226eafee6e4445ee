//! The timed-lock driver: bounded waits on the real primitive, escalating to
//! warnings and cycle detection when a gate expires.
//!
//! The driver is strictly observational. It never fails an acquisition the
//! platform would have granted and never returns an error the caller did not
//! expect; after reporting a deadlock it keeps retrying the underlying lock,
//! so if the situation resolves the application proceeds normally.

use crate::core::config::TimedWaitStrategy;
use crate::core::cycle;
use crate::core::detector::Detector;
use crate::core::registry::LockDescriptor;
use crate::core::types::{DeadlockSource, WaitEdge};
use crate::hooks::OriginOps;
use std::sync::Arc;

/// Frames captured per deadlock stack trace.
pub(crate) const STACK_FRAMES: usize = 15;

/// Gate sentinel: a deadlock was already reported on this attempt, stop
/// escalating and fall back to the untimed original lock.
const GATE_DISARMED: i64 = -1;

impl Detector {
    /// Acquire `descriptor`'s underlying mutex for the calling thread,
    /// reporting prolonged blocking, self-deadlock and wait cycles along the
    /// way. Returns the final code of the underlying lock call (0).
    pub(crate) fn acquire(
        &self,
        origin: &Arc<dyn OriginOps>,
        descriptor: &Arc<LockDescriptor>,
    ) -> i32 {
        let tid = self.platform.current_thread_id();
        let started = self.platform.monotonic_ms();
        let is_main = self.platform.is_main_thread(tid);
        let mut gate: i64 = if is_main {
            self.config.main_gate_ms as i64
        } else {
            self.config.gate_ms as i64
        };

        let mut self_lock_reported = false;
        let mut cycle_reported = false;
        let mut edge_recorded = false;

        loop {
            let err = self.timed_lock(origin, descriptor, gate);
            if err == 0 {
                break;
            }

            let owner = descriptor.owner();
            let enter_time = descriptor.enter_time();
            let now = self.platform.monotonic_ms();
            let waited = now.saturating_sub(started);

            if waited as i64 > gate && !cycle_reported && !self_lock_reported {
                let held = if enter_time == 0 {
                    0
                } else {
                    now.saturating_sub(enter_time)
                };
                self.reporter.blocked(
                    tid,
                    &self.platform.thread_name(tid),
                    owner,
                    descriptor.addr(),
                    waited,
                    held,
                    err,
                );
                if is_main {
                    // Alternate between a long and a short gate so repeat
                    // warnings keep sampling without spamming.
                    gate = if gate < self.config.gate_ms as i64 {
                        self.config.gate_ms as i64
                    } else {
                        self.config.main_resample_ms as i64
                    };
                }
            }

            if owner == Some(tid) && !descriptor.is_recursive() && !self_lock_reported {
                // The platform primitive will never grant this lock; report
                // once and keep looping conservatively.
                self_lock_reported = true;
                let stack = self.platform.capture_stack(STACK_FRAMES);
                self.reporter
                    .self_deadlock(tid, &self.platform.thread_name(tid), is_main, &stack);
                self.dispatch_deadlock(
                    DeadlockSource::SelfLock,
                    tid,
                    vec![WaitEdge {
                        blocked_thread: tid,
                        owner_thread: tid,
                        mutex: descriptor.addr(),
                    }],
                );
            }

            if !edge_recorded {
                edge_recorded = true;
                self.blocked.record(tid, descriptor);
            }

            let links = cycle::find_deadlock_links(&self.blocked, tid, false);
            if !links.is_empty() {
                cycle_reported = true;
                gate = GATE_DISARMED;
                let stack = self.platform.capture_stack(STACK_FRAMES);
                let name = self.platform.thread_name(tid);
                for link in links {
                    self.reporter.wait_cycle(&link, tid, &name, is_main, &stack);
                    let cycle_edges = link
                        .iter()
                        .map(|edge| WaitEdge {
                            blocked_thread: edge.blocked_thread,
                            owner_thread: edge.owner_thread,
                            mutex: edge.mutex,
                        })
                        .collect();
                    self.dispatch_deadlock(DeadlockSource::WaitCycle, tid, cycle_edges);
                }
            }
        }

        descriptor.note_acquired(tid, self.platform.monotonic_ms());
        if edge_recorded {
            self.blocked.clear(tid);
        }
        0
    }

    /// Bookkeeping half of an intercepted unlock; the hook glue performs the
    /// real release after this returns.
    pub(crate) fn release(&self, descriptor: &Arc<LockDescriptor>) {
        let tid = self.platform.current_thread_id();
        if !descriptor.note_released(tid) {
            self.reporter
                .non_owner_unlock(descriptor.addr(), descriptor.owner(), tid);
        }
    }

    /// One bounded wait on the real primitive. A disarmed gate degrades to
    /// the untimed original lock.
    fn timed_lock(
        &self,
        origin: &Arc<dyn OriginOps>,
        descriptor: &LockDescriptor,
        gate_ms: i64,
    ) -> i32 {
        if gate_ms < 0 {
            return origin.mutex_lock(descriptor.addr());
        }
        match self.strategy {
            TimedWaitStrategy::AbsoluteDeadline => {
                let deadline = self.platform.realtime_now().add_millis(gate_ms as u64);
                origin.mutex_timedlock(descriptor.addr(), deadline)
            }
            TimedWaitStrategy::RelativeMillis => {
                origin.mutex_lock_timeout_ms(descriptor.addr(), gate_ms as u32)
            }
        }
    }
}
