use mm_types::TimingMessage;
use mm_types::limits::{MAX_MESSAGE_TYPES, MAX_MODULES};
use tracing::trace;

/// Accumulates the per-type send counters and per-module pid table that
/// back the periodic `TIMING_MESSAGE` (`SPEC_FULL.md` §4.D step 6).
/// Counters reset to zero on every [`TimingTracker::snapshot_and_reset`];
/// the pid table does not, since a module's pid doesn't change between
/// `MODULE_READY` announcements.
pub struct TimingTracker {
    timing: Box<[u16; MAX_MESSAGE_TYPES]>,
    module_pid: Box<[i32; MAX_MODULES as usize]>,
}

impl TimingTracker {
    pub fn new() -> Self {
        TimingTracker {
            timing: Box::new([0u16; MAX_MESSAGE_TYPES]),
            module_pid: Box::new([0i32; MAX_MODULES as usize]),
        }
    }

    /// Counts one occurrence of `type_id`. Types outside
    /// `[0, MAX_MESSAGE_TYPES)` (not expected in a well-formed deployment)
    /// are silently dropped from the snapshot rather than panicking on
    /// untrusted peer input.
    pub fn record(&mut self, type_id: i32) {
        if let Ok(idx) = usize::try_from(type_id) {
            if idx < MAX_MESSAGE_TYPES {
                self.timing[idx] = self.timing[idx].saturating_add(1);
            } else {
                trace!(type_id, "mm-broker: type id out of timing table range");
            }
        }
    }

    pub fn set_pid(&mut self, module_id: i16, pid: i32) {
        if let Ok(idx) = usize::try_from(module_id) {
            if idx < MAX_MODULES as usize {
                self.module_pid[idx] = pid;
            }
        }
    }

    pub fn snapshot_and_reset(&mut self, send_time: f64) -> TimingMessage {
        let snapshot = TimingMessage {
            timing: self.timing.clone(),
            module_pid: self.module_pid.clone(),
            send_time,
        };
        self.timing.fill(0);
        snapshot
    }
}

impl Default for TimingTracker {
    fn default() -> Self {
        Self::new()
    }
}
