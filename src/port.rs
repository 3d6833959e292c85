//! Platform seam between the scheduling core and whatever actually runs
//! threads: a port supplies core identity and inter-core signaling, and
//! consumes execution-target changes at its own context-switch points.

use crate::config::MAX_CORES;
use portable_atomic::{AtomicBool, Ordering};

/// Services the scheduling core needs from the platform.
///
/// The core never switches contexts itself. It updates the per-core
/// execution targets, then calls back through this trait so the port can
/// interrupt remote cores or wake idle ones; each core later observes the
/// new target at a safe point and performs its own switch.
pub trait Port {
    /// Index of the core this call is executing on.
    fn core_id(&self) -> usize;

    /// Signal `core` that its execution target changed while it was
    /// running something else. Typically an inter-processor interrupt.
    fn preempt_core(&self, core: usize);

    /// Wake `core` out of its idle wait; it has a thread to pick up.
    fn wakeup_core(&self, core: usize);

    /// The calling core's execution target no longer matches what it is
    /// running; transfer control back to the port's scheduling loop.
    fn return_to_system(&self);
}

/// Per-core preemption doorbell. Remote cores post; the owning core
/// consumes at its next safe point.
pub(crate) struct PreemptMailbox {
    pending: AtomicBool,
}

impl PreemptMailbox {
    pub(crate) const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn post(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub(crate) fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

pub(crate) const fn mailbox_array() -> [PreemptMailbox; MAX_CORES] {
    [const { PreemptMailbox::new() }; MAX_CORES]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_post_take() {
        let mailbox = PreemptMailbox::new();
        assert!(!mailbox.take());
        mailbox.post();
        mailbox.post();
        assert!(mailbox.take());
        assert!(!mailbox.take());
    }
}
