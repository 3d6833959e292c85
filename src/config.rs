//! Compile-time limits and tick sentinels shared by the scheduler and the
//! timer wheel.

/// Maximum number of cores the execution list can map threads onto.
///
/// The active core count is configured at runtime through [`KernelConfig`]
/// and may be anything from 1 up to this limit.
pub const MAX_CORES: usize = 4;

/// Number of distinct thread priorities. Priority 0 is the most urgent.
///
/// Chosen above 32 so the two-level priority bitmap is exercised.
pub const MAX_PRIORITIES: usize = 64;

/// Capacity of the thread arena.
pub const MAX_THREADS: usize = 64;

/// Capacity of the timer arena. Every thread owns one embedded timeout
/// timer; the remainder is available for application timers.
pub const MAX_TIMERS: usize = MAX_THREADS + 32;

/// Number of buckets in the timer wheel.
pub const TIMER_WHEEL_SIZE: usize = 32;

/// Largest span a single wheel traversal can represent. Timeouts beyond
/// this are re-armed by the expiration routine until fully elapsed.
pub const TIMER_WHEEL_SPAN: u32 = (TIMER_WHEEL_SIZE - 1) as u32;

/// Tick-count sentinel: do not wait.
pub const NO_WAIT: u32 = 0;

/// Tick-count sentinel: wait without a timeout. Activating a timer with
/// this value is a no-op.
pub const WAIT_FOREVER: u32 = u32::MAX;

/// `system_state` value for a core before `Kernel::start` completes.
pub(crate) const INITIALIZE_IN_PROGRESS: u32 = 0xF0F0_F0F0;

/// Runtime kernel configuration handed to `Kernel::new`.
pub struct KernelConfig {
    /// Number of active cores, clamped to `1..=MAX_CORES`.
    pub cores: usize,
    /// Hook invoked (with protection released) when a thread terminates,
    /// so higher-level primitives can release any ownership it held.
    pub termination_hook: Option<fn(crate::thread::ThreadId)>,
}

impl KernelConfig {
    pub const fn new(cores: usize) -> Self {
        Self {
            cores,
            termination_hook: None,
        }
    }

    pub const fn with_termination_hook(mut self, hook: fn(crate::thread::ThreadId)) -> Self {
        self.termination_hook = Some(hook);
        self
    }
}
