//! Thread control block and the per-thread scheduling attributes.

use crate::bitmap::CoreMask;
use crate::config::MAX_PRIORITIES;
use crate::timer::TimerId;
use bitflags::bitflags;

/// Stable index into the thread arena. Valid only while the slot's
/// identity tag matches; public entry points check before dereferencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) usize);

impl ThreadId {
    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

/// Identity tag stamped into live thread slots.
pub(crate) const THREAD_CONTROL_ID: u32 = 0x5448_5244;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Linked into the ready list of its priority.
    Ready,
    /// Suspended by request; not in any ready list.
    Suspended,
    /// Suspended with a bounded or unbounded sleep in progress.
    Sleeping,
    /// Entry function returned.
    Completed,
    /// Forcibly terminated.
    Terminated,
}

impl ThreadState {
    /// Terminal states never re-enter the ready structure.
    pub fn is_terminal(self) -> bool {
        matches!(self, ThreadState::Completed | ThreadState::Terminated)
    }
}

/// Why the thread last left a suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeStatus {
    /// Explicit resume.
    Resumed,
    /// The embedded timeout timer fired.
    Timeout,
    /// A bounded wait was aborted before expiration.
    Aborted,
}

bitflags! {
    /// Transient scheduling flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u8 {
        /// A suspend is in flight: the state already names the target
        /// suspension but the thread has not yet left the ready structure.
        const SUSPENDING = 1 << 0;
        /// A suspend arrived while the thread was mid-resume; applied once
        /// the in-flight transition settles.
        const DELAYED_SUSPEND = 1 << 1;
        /// The TCB is free to be claimed by a core for execution. Cleared
        /// while a core is between being assigned the thread and actually
        /// running it, which closes the dispatched-but-not-running race.
        const CORE_CONTROL = 1 << 2;
    }
}

/// Entry/exit notification events delivered to a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadNotify {
    Entry,
    Exit,
}

/// Thread control block. One arena slot per thread; ready-list linkage is
/// index-based and only meaningful while the state is `Ready`.
pub struct Tcb {
    pub(crate) control_id: u32,
    pub(crate) name: &'static str,
    pub(crate) state: ThreadState,
    pub(crate) flags: ThreadFlags,
    pub(crate) priority: usize,
    pub(crate) preempt_threshold: usize,
    /// Remaining time-slice ticks; reloaded from `fresh_time_slice`.
    pub(crate) time_slice: u32,
    pub(crate) fresh_time_slice: u32,
    /// Circular doubly linked ready-list links (self-linked when solo).
    pub(crate) ready_next: ThreadId,
    pub(crate) ready_prev: ThreadId,
    /// Core this thread was last mapped onto.
    pub(crate) core_mapped: usize,
    pub(crate) cores_excluded: CoreMask,
    pub(crate) cores_allowed: CoreMask,
    /// Embedded timeout timer; owned for the thread's whole life.
    pub(crate) timer: TimerId,
    /// Tick count staged for the next suspension's timeout arming.
    pub(crate) pending_timeout: u32,
    pub(crate) wake: WakeStatus,
    pub(crate) run_count: u32,
    pub(crate) entry_exit_notify: Option<fn(ThreadId, ThreadNotify)>,
    pub(crate) suspension_cleanup: Option<fn(ThreadId)>,
}

impl Tcb {
    pub(crate) fn new(id: ThreadId, config: &ThreadConfig, timer: TimerId, cores: usize) -> Self {
        let all = CoreMask::all(cores);
        Self {
            control_id: THREAD_CONTROL_ID,
            name: config.name,
            state: ThreadState::Suspended,
            flags: ThreadFlags::CORE_CONTROL,
            priority: config.priority,
            preempt_threshold: config.preempt_threshold,
            time_slice: config.time_slice,
            fresh_time_slice: config.time_slice,
            ready_next: id,
            ready_prev: id,
            core_mapped: 0,
            cores_excluded: config.cores_excluded,
            cores_allowed: all.difference(config.cores_excluded),
            timer,
            pending_timeout: 0,
            wake: WakeStatus::Resumed,
            run_count: 0,
            entry_exit_notify: config.entry_exit_notify,
            suspension_cleanup: None,
        }
    }

    /// Preemption-threshold in force: the thread, once scheduled, blocks
    /// every priority between its threshold and its own.
    pub(crate) fn has_threshold(&self) -> bool {
        self.preempt_threshold < self.priority
    }
}

/// Creation-time thread attributes.
pub struct ThreadConfig {
    pub name: &'static str,
    pub priority: usize,
    pub preempt_threshold: usize,
    pub time_slice: u32,
    pub cores_excluded: CoreMask,
    /// Start ready instead of suspended.
    pub auto_start: bool,
    pub entry_exit_notify: Option<fn(ThreadId, ThreadNotify)>,
}

impl ThreadConfig {
    pub const fn new(name: &'static str, priority: usize) -> Self {
        Self {
            name,
            priority,
            preempt_threshold: priority,
            time_slice: 0,
            cores_excluded: CoreMask::EMPTY,
            auto_start: true,
            entry_exit_notify: None,
        }
    }

    pub const fn preempt_threshold(mut self, threshold: usize) -> Self {
        self.preempt_threshold = threshold;
        self
    }

    pub const fn time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    pub const fn cores_excluded(mut self, mask: CoreMask) -> Self {
        self.cores_excluded = mask;
        self
    }

    pub const fn auto_start(mut self, start: bool) -> Self {
        self.auto_start = start;
        self
    }

    pub const fn entry_exit_notify(mut self, notify: fn(ThreadId, ThreadNotify)) -> Self {
        self.entry_exit_notify = Some(notify);
        self
    }
}

/// Snapshot returned by `thread_info_get`.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    pub name: &'static str,
    pub state: ThreadState,
    pub priority: usize,
    pub preempt_threshold: usize,
    pub time_slice: u32,
    pub cores_excluded: CoreMask,
    pub core_mapped: usize,
    pub run_count: u32,
    pub wake: WakeStatus,
}

pub(crate) fn priority_valid(priority: usize) -> bool {
    priority < MAX_PRIORITIES
}
