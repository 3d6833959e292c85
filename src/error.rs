#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Handle does not name a live thread (null slot or stale identity tag).
    InvalidThread,
    /// Handle does not name a live timer.
    InvalidTimer,
    /// Priority outside `0..MAX_PRIORITIES`.
    InvalidPriority,
    /// Preemption-threshold numerically above the thread's priority.
    InvalidThreshold,
    /// Zero initial tick count on a timer activation or change.
    InvalidTicks,
    /// Core exclusion mask would leave the thread with no allowed core,
    /// or names cores beyond the configured core count.
    InvalidCoreMask,
    /// Service requires thread context but was invoked from interrupt or
    /// kernel-initialization context, or from the reserved timer thread
    /// where suspension would deadlock timer processing.
    CallerContext,
    /// Thread arena is full.
    MaxThreadsReached,
    /// Timer arena is full.
    MaxTimersReached,
    /// Operation requires the timer to be deactivated first.
    TimerActive,
    /// Resume target was not suspended or sleeping.
    NotSuspended,
    /// Delete target has not completed or terminated.
    NotDone,
    /// Resume arrived while a suspend was in flight and simply lifted it;
    /// the thread never left the ready structure.
    SuspendLifted,
}

impl KernelError {
    pub fn as_str(self) -> &'static str {
        match self {
            KernelError::InvalidThread => "Invalid thread handle",
            KernelError::InvalidTimer => "Invalid timer handle",
            KernelError::InvalidPriority => "Priority out of range",
            KernelError::InvalidThreshold => "Preemption-threshold exceeds priority",
            KernelError::InvalidTicks => "Invalid tick count",
            KernelError::InvalidCoreMask => "Invalid core exclusion mask",
            KernelError::CallerContext => "Service not available from this context",
            KernelError::MaxThreadsReached => "Maximum number of threads reached",
            KernelError::MaxTimersReached => "Maximum number of timers reached",
            KernelError::TimerActive => "Timer is still active",
            KernelError::NotSuspended => "Thread is not suspended",
            KernelError::NotDone => "Thread has not completed or terminated",
            KernelError::SuspendLifted => "Resume lifted an in-flight suspend",
        }
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Deliberate halt on detected internal inconsistency. Continuing with a
/// corrupted ready structure is worse than stopping the core.
pub(crate) fn integrity_halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
