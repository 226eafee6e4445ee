/// Escalation budgets for the timed-lock driver, in milliseconds.
///
/// A blocked acquisition is retried in `gate`-sized slices; each expiry is a
/// chance to warn and to run the cycle detector. The main thread starts with
/// a tighter gate because user-visible stalls are more costly there, and
/// alternates between `main_resample_ms` and `gate_ms` after its first Block
/// warning so repeat warnings keep sampling without spamming.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Initial gate for ordinary threads.
    pub gate_ms: u64,
    /// Initial gate for the main thread.
    pub main_gate_ms: u64,
    /// Short gate the main thread falls back to between repeat warnings.
    pub main_resample_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            gate_ms: 1000,
            main_gate_ms: 500,
            main_resample_ms: 300,
        }
    }
}

/// Which timed-wait entry point of the platform the driver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedWaitStrategy {
    /// `mutex_timedlock` with an absolute CLOCK_REALTIME deadline.
    AbsoluteDeadline,
    /// `mutex_lock_timeout_ms` with a relative timeout (legacy platforms).
    RelativeMillis,
}

/// First platform SDK generation that ships the absolute-deadline wait.
const ABSOLUTE_DEADLINE_MIN_SDK: u32 = 21;

impl TimedWaitStrategy {
    pub fn for_sdk(sdk_version: u32) -> Self {
        if sdk_version >= ABSOLUTE_DEADLINE_MIN_SDK {
            TimedWaitStrategy::AbsoluteDeadline
        } else {
            TimedWaitStrategy::RelativeMillis
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_tracks_sdk_generation() {
        assert_eq!(
            TimedWaitStrategy::for_sdk(19),
            TimedWaitStrategy::RelativeMillis
        );
        assert_eq!(
            TimedWaitStrategy::for_sdk(21),
            TimedWaitStrategy::AbsoluteDeadline
        );
        assert_eq!(
            TimedWaitStrategy::for_sdk(34),
            TimedWaitStrategy::AbsoluteDeadline
        );
    }
}
