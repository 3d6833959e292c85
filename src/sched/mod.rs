//! The scheduling core: thread arena, ready structure, per-core execution
//! targets, and the engine transitions that keep them consistent.
//!
//! Everything in here runs under the single protection lock held by
//! [`crate::kernel::Kernel`]. Inter-core effects are never applied
//! directly; they accumulate as pending signals that the kernel dispatches
//! through the port after releasing the lock.

mod ready;
mod rebalance;
mod resume;
mod suspend;
mod timeslice;

pub(crate) use resume::ResumeOutcome;

use crate::bitmap::{CoreMask, PriorityBitmap};
use crate::config::{INITIALIZE_IN_PROGRESS, MAX_CORES, MAX_PRIORITIES, MAX_THREADS};
use crate::error::integrity_halt;
use crate::thread::{Tcb, ThreadId, THREAD_CONTROL_ID};
use crate::timer::TimerList;

/// Inter-core effects accumulated while the protection lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Signals {
    /// Cores whose running thread is no longer their execution target.
    pub(crate) preempt: CoreMask,
    /// Cores that were handed a thread and may be idling.
    pub(crate) wakeup: CoreMask,
}

impl Signals {
    pub(crate) const NONE: Signals = Signals {
        preempt: CoreMask::EMPTY,
        wakeup: CoreMask::EMPTY,
    };
}

pub(crate) struct SchedulerCore {
    /// Active core count, `1..=MAX_CORES`.
    pub(crate) cores: usize,
    pub(crate) threads: [Option<Tcb>; MAX_THREADS],
    /// Head of the circular ready list per priority.
    pub(crate) ready_heads: [Option<ThreadId>; MAX_PRIORITIES],
    pub(crate) ready_map: PriorityBitmap,
    /// What each core should be running. Ports act on this.
    pub(crate) execute: [Option<ThreadId>; MAX_CORES],
    /// Scratch mapping rebuilt by rebalancing, then published to `execute`.
    pub(crate) schedule: [Option<ThreadId>; MAX_CORES],
    /// What each core is actually running right now.
    pub(crate) current: [Option<ThreadId>; MAX_CORES],
    /// 0 at thread level; incremented per nested interrupt; the
    /// initialization sentinel before `start`.
    pub(crate) system_state: [u32; MAX_CORES],
    /// The scheduled thread whose preemption-threshold is in force, if any.
    pub(crate) threshold_scheduled: Option<ThreadId>,
    /// Threshold threads displaced while their threshold was in force,
    /// indexed by priority, most urgent promoted first.
    pub(crate) preempted_list: [Option<ThreadId>; MAX_PRIORITIES],
    pub(crate) preempted_map: PriorityBitmap,
    /// Remaining time-slice ticks per core; 0 disables slicing.
    pub(crate) time_slices: [u32; MAX_CORES],
    /// A time-slice rotation wanted a full rebalance; honored at the next
    /// preemption point instead of inside the tick handler.
    pub(crate) rebalance_deferred: bool,
    pub(crate) timers: TimerList,
    /// Reserved timer-processing thread; never allowed to suspend through
    /// the blocking services it drives.
    pub(crate) timer_thread: Option<ThreadId>,
    pub(crate) signals: Signals,
}

impl SchedulerCore {
    pub(crate) const fn new(cores: usize) -> Self {
        Self {
            cores,
            threads: [const { None }; MAX_THREADS],
            ready_heads: [None; MAX_PRIORITIES],
            ready_map: PriorityBitmap::new(),
            execute: [None; MAX_CORES],
            schedule: [None; MAX_CORES],
            current: [None; MAX_CORES],
            system_state: [INITIALIZE_IN_PROGRESS; MAX_CORES],
            threshold_scheduled: None,
            preempted_list: [None; MAX_PRIORITIES],
            preempted_map: PriorityBitmap::new(),
            time_slices: [0; MAX_CORES],
            rebalance_deferred: false,
            timers: TimerList::new(),
            timer_thread: None,
            signals: Signals::NONE,
        }
    }

    /// Engine-internal TCB access. Callers hold a validated id; a dead
    /// slot here means the ready structure is corrupted.
    pub(crate) fn tcb(&self, id: ThreadId) -> &Tcb {
        match self.threads.get(id.index()).and_then(|t| t.as_ref()) {
            Some(tcb) => tcb,
            None => integrity_halt(),
        }
    }

    pub(crate) fn tcb_mut(&mut self, id: ThreadId) -> &mut Tcb {
        match self.threads.get_mut(id.index()).and_then(|t| t.as_mut()) {
            Some(tcb) => tcb,
            None => integrity_halt(),
        }
    }

    /// True when the handle names a live slot with a matching identity tag.
    pub(crate) fn is_live(&self, id: ThreadId) -> bool {
        self.threads
            .get(id.index())
            .and_then(|t| t.as_ref())
            .map(|t| t.control_id == THREAD_CONTROL_ID)
            .unwrap_or(false)
    }

    /// Record the inter-core consequences of giving `target` a new
    /// execution target. The calling core handles its own switch through
    /// the kernel's return path, so it is never signaled.
    pub(crate) fn signal_assignment(&mut self, caller: usize, target: usize) {
        if target == caller {
            return;
        }
        if self.system_state[target] == INITIALIZE_IN_PROGRESS {
            return;
        }
        if self.current[target].is_some() && self.execute[target] != self.current[target] {
            self.signals.preempt.insert(target);
        }
        if self.execute[target].is_some() {
            self.signals.wakeup.insert(target);
        }
    }

    /// Publish the scratch schedule list as the live execution targets,
    /// signaling every core whose target changed.
    pub(crate) fn execute_list_setup(&mut self, caller: usize) {
        for core in 0..self.cores {
            if self.execute[core] != self.schedule[core] {
                self.execute[core] = self.schedule[core];
                self.signal_assignment(caller, core);
            }
        }
    }

    /// Seed the scratch schedule list from the live execution targets.
    pub(crate) fn schedule_list_setup(&mut self) {
        self.schedule = self.execute;
    }

    pub(crate) fn take_signals(&mut self) -> Signals {
        core::mem::replace(&mut self.signals, Signals::NONE)
    }

    /// Cores with no execution target.
    pub(crate) fn available_cores(&self) -> CoreMask {
        let mut mask = CoreMask::EMPTY;
        for core in 0..self.cores {
            if self.execute[core].is_none() {
                mask.insert(core);
            }
        }
        mask
    }

    /// Union of the allowed-core masks of every scheduled thread; the
    /// space a displacement remap can move threads through.
    pub(crate) fn possible_cores(&self) -> CoreMask {
        let mut mask = CoreMask::EMPTY;
        for core in 0..self.cores {
            if let Some(id) = self.execute[core] {
                mask = mask.union(self.tcb(id).cores_allowed);
            }
        }
        mask
    }

    /// Least urgent (numerically greatest) priority currently scheduled.
    /// 0 when nothing is scheduled, in which case a free core exists and
    /// preemption is never consulted.
    pub(crate) fn lowest_scheduled_priority(&self) -> usize {
        let mut lowest = 0;
        for core in 0..self.cores {
            if let Some(id) = self.execute[core] {
                let priority = self.tcb(id).priority;
                if priority > lowest {
                    lowest = priority;
                }
            }
        }
        lowest
    }
}
