//! The kernel facade: validated public services over the scheduling core.
//!
//! Every operation takes the single protection lock, runs the engine
//! transition, then releases the lock before dispatching inter-core
//! signals or user callbacks. Entry points validate their arguments
//! side-effect-free and return a [`KernelError`] without touching the
//! ready structure on failure.

use crate::bitmap::CoreMask;
use crate::config::{KernelConfig, INITIALIZE_IN_PROGRESS, MAX_CORES, NO_WAIT};
use crate::error::{KernelError, KernelResult};
use crate::port::{mailbox_array, Port, PreemptMailbox};
use crate::sched::{ResumeOutcome, SchedulerCore, Signals};
use crate::thread::{
    priority_valid, Tcb, ThreadConfig, ThreadFlags, ThreadId, ThreadInfo, ThreadNotify,
    ThreadState, WakeStatus,
};
use crate::timer::{ExpirationAction, TimerConfig, TimerId, TimerInfo};
use portable_atomic::{AtomicU32, Ordering};
use spin::{Mutex, MutexGuard};

/// The multitasking kernel core.
///
/// Generic over the [`Port`] that supplies core identity and performs the
/// actual context switching. The kernel only ever updates the per-core
/// execution targets; cores observe them at their own safe points.
pub struct Kernel<P: Port> {
    core: Mutex<SchedulerCore>,
    port: P,
    mailboxes: [PreemptMailbox; MAX_CORES],
    termination_hook: Option<fn(ThreadId)>,
    tick_count: AtomicU32,
}

impl<P: Port> Kernel<P> {
    pub const fn new(config: KernelConfig, port: P) -> Self {
        let cores = if config.cores == 0 {
            1
        } else if config.cores > MAX_CORES {
            MAX_CORES
        } else {
            config.cores
        };
        Self {
            core: Mutex::new(SchedulerCore::new(cores)),
            port,
            mailboxes: mailbox_array(),
            termination_hook: config.termination_hook,
            tick_count: AtomicU32::new(0),
        }
    }

    /// Leave kernel-initialization state and hand every core its first
    /// execution target. Threads created with `auto_start` before this
    /// point become runnable here.
    pub fn start(&self) {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        let cores = guard.cores;
        for core in 0..cores {
            guard.system_state[core] = 0;
        }
        guard.rebalance_execute_list(core_index);
        log::debug!("kernel started on {} cores", cores);
        self.finish(guard, core_index);
    }

    // ----- thread lifecycle ------------------------------------------------

    pub fn thread_create(&self, config: &ThreadConfig) -> KernelResult<ThreadId> {
        if !priority_valid(config.priority) {
            return Err(KernelError::InvalidPriority);
        }
        if config.preempt_threshold > config.priority {
            return Err(KernelError::InvalidThreshold);
        }
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_not_isr(&guard, core_index)?;
        let all = CoreMask::all(guard.cores);
        if config.cores_excluded.difference(all) != CoreMask::EMPTY
            || all.difference(config.cores_excluded).is_empty()
        {
            return Err(KernelError::InvalidCoreMask);
        }
        let slot = guard
            .threads
            .iter()
            .position(|t| t.is_none())
            .ok_or(KernelError::MaxThreadsReached)?;
        let id = ThreadId(slot);
        let timer = guard
            .timers
            .create(config.name, ExpirationAction::ThreadTimeout(id), 0, 0)?;
        guard.threads[slot] = Some(Tcb::new(id, config, timer, guard.cores));
        log::debug!("created {:?} ({}) at priority {}", id, config.name, config.priority);
        if config.auto_start {
            guard.tcb_mut(id).wake = WakeStatus::Resumed;
            guard.system_resume(id, core_index);
        }
        self.finish(guard, core_index);
        Ok(id)
    }

    /// Delete a completed or terminated thread, releasing its arena slot
    /// and embedded timer. The handle is dead afterwards.
    pub fn thread_delete(&self, id: ThreadId) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_not_isr(&guard, core_index)?;
        self.check_live(&guard, id)?;
        if !guard.tcb(id).state.is_terminal() {
            return Err(KernelError::NotDone);
        }
        let timer = guard.tcb(id).timer;
        guard.timers.delete(timer);
        guard.threads[id.index()] = None;
        if guard.timer_thread == Some(id) {
            guard.timer_thread = None;
        }
        Ok(())
    }

    pub fn thread_resume(&self, id: ThreadId) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        if guard.tcb(id).state == ThreadState::Sleeping
            && !guard.tcb(id).flags.contains(ThreadFlags::SUSPENDING)
        {
            // Sleeps end by timeout or wait-abort, not by resume.
            return Err(KernelError::NotSuspended);
        }
        guard.tcb_mut(id).wake = WakeStatus::Resumed;
        let outcome = guard.system_resume(id, core_index);
        self.finish(guard, core_index);
        match outcome {
            ResumeOutcome::Resumed => Ok(()),
            ResumeOutcome::Lifted => Err(KernelError::SuspendLifted),
            ResumeOutcome::NotSuspended => Err(KernelError::NotSuspended),
        }
    }

    pub fn thread_suspend(&self, id: ThreadId) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        if guard.timer_thread == Some(id) {
            // Suspending the timer-processing thread would stall every
            // timeout in the system.
            return Err(KernelError::CallerContext);
        }
        match guard.tcb(id).state {
            ThreadState::Ready => {}
            ThreadState::Suspended => return Ok(()),
            ThreadState::Sleeping => {
                // Applied once the sleep settles.
                guard.tcb_mut(id).flags.insert(ThreadFlags::DELAYED_SUSPEND);
                return Ok(());
            }
            ThreadState::Completed | ThreadState::Terminated => {
                return Err(KernelError::NotSuspended)
            }
        }
        if guard.tcb(id).flags.contains(ThreadFlags::SUSPENDING) {
            guard.tcb_mut(id).flags.insert(ThreadFlags::DELAYED_SUSPEND);
            return Ok(());
        }
        {
            let tcb = guard.tcb_mut(id);
            tcb.flags.insert(ThreadFlags::SUSPENDING);
            tcb.state = ThreadState::Suspended;
            tcb.pending_timeout = NO_WAIT;
        }
        guard.system_suspend(id, core_index);
        self.finish(guard, core_index);
        Ok(())
    }

    /// Force the thread into the terminal `Terminated` state. Exit
    /// notification, suspension cleanup, and the configured termination
    /// hook run exactly once, with the protection lock released.
    pub fn thread_terminate(&self, id: ThreadId) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        if guard.tcb(id).state.is_terminal() {
            return Ok(());
        }
        match guard.tcb(id).state {
            ThreadState::Ready => {
                let tcb = guard.tcb_mut(id);
                tcb.flags.insert(ThreadFlags::SUSPENDING);
                tcb.flags.remove(ThreadFlags::DELAYED_SUSPEND);
                tcb.state = ThreadState::Terminated;
                tcb.pending_timeout = NO_WAIT;
                guard.system_suspend(id, core_index);
            }
            _ => {
                // Already off the ready structure; cancel any pending
                // timeout and mark terminal.
                let timer = guard.tcb(id).timer;
                guard.timers.deactivate(timer);
                let tcb = guard.tcb_mut(id);
                tcb.flags.remove(ThreadFlags::SUSPENDING | ThreadFlags::DELAYED_SUSPEND);
                tcb.state = ThreadState::Terminated;
            }
        }
        let cleanup = guard.tcb_mut(id).suspension_cleanup.take();
        let notify = guard.tcb_mut(id).entry_exit_notify.take();
        log::debug!("terminated {:?}", id);
        self.finish(guard, core_index);
        if let Some(cleanup) = cleanup {
            cleanup(id);
        }
        if let Some(notify) = notify {
            notify(id, ThreadNotify::Exit);
        }
        if let Some(hook) = self.termination_hook {
            hook(id);
        }
        Ok(())
    }

    /// Put the calling thread to sleep for `ticks` timer ticks.
    /// Zero ticks returns immediately; the wake status after a full sleep
    /// is `Timeout`, or `Aborted` if `thread_wait_abort` cut it short.
    pub fn thread_sleep(&self, ticks: u32) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        if guard.system_state[core_index] != 0 {
            return Err(KernelError::CallerContext);
        }
        let id = guard.current[core_index].ok_or(KernelError::CallerContext)?;
        if guard.timer_thread == Some(id) {
            // The timer-processing thread sleeping would stall every
            // timeout in the system.
            return Err(KernelError::CallerContext);
        }
        if ticks == NO_WAIT {
            return Ok(());
        }
        {
            let tcb = guard.tcb_mut(id);
            tcb.state = ThreadState::Sleeping;
            tcb.flags.insert(ThreadFlags::SUSPENDING);
            tcb.pending_timeout = ticks;
            tcb.wake = WakeStatus::Resumed;
        }
        guard.system_suspend(id, core_index);
        self.finish(guard, core_index);
        Ok(())
    }

    /// Abort a bounded or unbounded sleep; the sleeper wakes with status
    /// `Aborted`.
    pub fn thread_wait_abort(&self, id: ThreadId) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        if guard.tcb(id).state != ThreadState::Sleeping {
            return Err(KernelError::NotSuspended);
        }
        guard.tcb_mut(id).wake = WakeStatus::Aborted;
        let outcome = guard.system_resume(id, core_index);
        self.finish(guard, core_index);
        match outcome {
            ResumeOutcome::NotSuspended => Err(KernelError::NotSuspended),
            _ => Ok(()),
        }
    }

    /// Voluntarily hand the core to the next thread of the same priority.
    pub fn thread_relinquish(&self) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        if guard.system_state[core_index] != 0 {
            return Err(KernelError::CallerContext);
        }
        let id = guard.current[core_index].ok_or(KernelError::CallerContext)?;
        guard.rotate_to_tail(id);
        guard.rebalance_execute_list(core_index);
        self.finish(guard, core_index);
        Ok(())
    }

    /// Called by the port when a thread's entry function returns; the
    /// thread enters the terminal `Completed` state.
    pub fn thread_complete(&self) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        let id = guard.current[core_index].ok_or(KernelError::CallerContext)?;
        {
            let tcb = guard.tcb_mut(id);
            tcb.flags.insert(ThreadFlags::SUSPENDING);
            tcb.flags.remove(ThreadFlags::DELAYED_SUSPEND);
            tcb.state = ThreadState::Completed;
            tcb.pending_timeout = NO_WAIT;
        }
        guard.system_suspend(id, core_index);
        let notify = guard.tcb_mut(id).entry_exit_notify.take();
        self.finish(guard, core_index);
        if let Some(notify) = notify {
            notify(id, ThreadNotify::Exit);
        }
        Ok(())
    }

    // ----- thread attributes ----------------------------------------------

    /// Change a thread's priority; the preemption-threshold is reset to
    /// the new priority. Returns the previous priority.
    pub fn thread_priority_change(&self, id: ThreadId, priority: usize) -> KernelResult<usize> {
        if !priority_valid(priority) {
            return Err(KernelError::InvalidPriority);
        }
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        let old = guard.tcb(id).priority;
        self.threshold_teardown(&mut guard, id);
        if guard.tcb(id).state == ThreadState::Ready {
            guard.ready_unlink(id);
            {
                let tcb = guard.tcb_mut(id);
                tcb.priority = priority;
                tcb.preempt_threshold = priority;
            }
            guard.ready_link(id);
            guard.rebalance_execute_list(core_index);
        } else {
            let tcb = guard.tcb_mut(id);
            tcb.priority = priority;
            tcb.preempt_threshold = priority;
        }
        self.finish(guard, core_index);
        Ok(old)
    }

    /// Change a thread's preemption-threshold. Returns the previous one.
    pub fn thread_preemption_change(&self, id: ThreadId, threshold: usize) -> KernelResult<usize> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        if threshold > guard.tcb(id).priority {
            return Err(KernelError::InvalidThreshold);
        }
        let old = guard.tcb(id).preempt_threshold;
        self.threshold_teardown(&mut guard, id);
        guard.tcb_mut(id).preempt_threshold = threshold;
        if guard.tcb(id).state == ThreadState::Ready {
            guard.rebalance_execute_list(core_index);
        }
        self.finish(guard, core_index);
        Ok(old)
    }

    /// Change a thread's time-slice reload value. Returns the previous
    /// one; 0 disables slicing.
    pub fn thread_time_slice_change(&self, id: ThreadId, ticks: u32) -> KernelResult<u32> {
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        let tcb = guard.tcb_mut(id);
        let old = tcb.fresh_time_slice;
        tcb.fresh_time_slice = ticks;
        tcb.time_slice = ticks;
        Ok(old)
    }

    /// Replace the thread's core exclusion mask. The mask must leave at
    /// least one allowed core and may only name active cores.
    pub fn thread_core_exclude(&self, id: ThreadId, excluded: CoreMask) -> KernelResult<()> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        let all = CoreMask::all(guard.cores);
        if excluded.difference(all) != CoreMask::EMPTY || all.difference(excluded).is_empty() {
            return Err(KernelError::InvalidCoreMask);
        }
        {
            let tcb = guard.tcb_mut(id);
            tcb.cores_excluded = excluded;
            tcb.cores_allowed = all.difference(excluded);
        }
        if guard.tcb(id).state == ThreadState::Ready {
            guard.rebalance_execute_list(core_index);
        }
        self.finish(guard, core_index);
        Ok(())
    }

    pub fn thread_core_exclude_get(&self, id: ThreadId) -> KernelResult<CoreMask> {
        let guard = self.core.lock();
        self.check_live(&guard, id)?;
        Ok(guard.tcb(id).cores_excluded)
    }

    pub fn thread_info_get(&self, id: ThreadId) -> KernelResult<ThreadInfo> {
        let guard = self.core.lock();
        self.check_live(&guard, id)?;
        let tcb = guard.tcb(id);
        Ok(ThreadInfo {
            name: tcb.name,
            state: tcb.state,
            priority: tcb.priority,
            preempt_threshold: tcb.preempt_threshold,
            time_slice: tcb.fresh_time_slice,
            cores_excluded: tcb.cores_excluded,
            core_mapped: tcb.core_mapped,
            run_count: tcb.run_count,
            wake: tcb.wake,
        })
    }

    // ----- application timers ---------------------------------------------

    pub fn timer_create(&self, config: &TimerConfig) -> KernelResult<TimerId> {
        if config.initial == 0 {
            return Err(KernelError::InvalidTicks);
        }
        let mut guard = self.core.lock();
        let action = ExpirationAction::Callback {
            func: config.func,
            arg: config.arg,
        };
        let id = guard
            .timers
            .create(config.name, action, config.initial, config.reschedule)?;
        if config.auto_activate {
            guard.timers.activate(id, config.initial);
        }
        Ok(id)
    }

    pub fn timer_activate(&self, id: TimerId) -> KernelResult<()> {
        let mut guard = self.core.lock();
        self.check_timer(&guard, id)?;
        if guard.timers.is_active(id) {
            return Err(KernelError::TimerActive);
        }
        let initial = match guard.timers.record(id) {
            Some(record) => record.initial,
            None => return Err(KernelError::InvalidTimer),
        };
        guard.timers.activate(id, initial);
        Ok(())
    }

    /// Deactivate the timer. Idempotent; a deactivate racing the timer's
    /// own callback takes effect once the dispatch settles.
    pub fn timer_deactivate(&self, id: TimerId) -> KernelResult<()> {
        let mut guard = self.core.lock();
        self.check_timer(&guard, id)?;
        guard.timers.deactivate(id);
        Ok(())
    }

    /// Reconfigure an inactive timer's expiration ticks.
    pub fn timer_change(&self, id: TimerId, initial: u32, reschedule: u32) -> KernelResult<()> {
        if initial == 0 {
            return Err(KernelError::InvalidTicks);
        }
        let mut guard = self.core.lock();
        self.check_timer(&guard, id)?;
        if guard.timers.is_active(id) {
            return Err(KernelError::TimerActive);
        }
        if let Some(record) = guard.timers.record_mut(id) {
            record.initial = initial;
            record.remaining = initial;
            record.reinit = reschedule;
        }
        Ok(())
    }

    pub fn timer_delete(&self, id: TimerId) -> KernelResult<()> {
        let mut guard = self.core.lock();
        self.check_timer(&guard, id)?;
        guard.timers.delete(id);
        Ok(())
    }

    pub fn timer_info_get(&self, id: TimerId) -> KernelResult<TimerInfo> {
        let guard = self.core.lock();
        self.check_timer(&guard, id)?;
        guard.timers.info(id).ok_or(KernelError::InvalidTimer)
    }

    // ----- tick and port surface ------------------------------------------

    /// One timer tick: advance the wheel and drive every core's
    /// time-slice countdown. Returns true when expired timers are waiting
    /// for [`Kernel::timer_expiration_process`].
    pub fn tick(&self) -> bool {
        let core_index = self.port.core_id();
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.core.lock();
        guard.timers.advance();
        guard.time_slice_tick(core_index);
        let due = guard.timers.expired();
        let signals = guard.take_signals();
        drop(guard);
        self.dispatch(signals);
        due
    }

    /// Ticks elapsed since the kernel was created.
    pub fn time_get(&self) -> u32 {
        self.tick_count.load(Ordering::Relaxed)
    }

    /// Process every expired timer: expiration adjustments happen under
    /// the lock, while callbacks and thread timeouts are dispatched with
    /// the lock released. Also resolves a deferred rebalance. Runs in the
    /// context of the reserved timer thread (or wherever the port drives
    /// it).
    pub fn timer_expiration_process(&self) {
        let core_index = self.port.core_id();
        loop {
            let mut guard = self.core.lock();
            if guard.rebalance_deferred {
                guard.rebalance_deferred = false;
                guard.rebalance_execute_list(core_index);
            }
            let step = guard.timers.expire_step();
            let signals = guard.take_signals();
            drop(guard);
            self.dispatch(signals);
            let step = match step {
                Some(step) => step,
                None => break,
            };
            match step.action {
                ExpirationAction::None => {}
                ExpirationAction::Callback { func, arg } => func(arg),
                ExpirationAction::ThreadTimeout(thread) => self.thread_timeout(thread),
            }
            let mut guard = self.core.lock();
            guard.timers.finish_fired(step.id);
            let signals = guard.take_signals();
            drop(guard);
            self.dispatch(signals);
        }
    }

    /// Mark entry into interrupt context on the calling core.
    pub fn interrupt_enter(&self) {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        if guard.system_state[core_index] != INITIALIZE_IN_PROGRESS {
            guard.system_state[core_index] += 1;
        }
    }

    /// Leave interrupt context. Returns true when the interrupt changed
    /// the calling core's execution target and the port must switch
    /// instead of returning to the interrupted thread.
    pub fn interrupt_exit(&self) -> bool {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        if guard.system_state[core_index] != INITIALIZE_IN_PROGRESS
            && guard.system_state[core_index] != 0
        {
            guard.system_state[core_index] -= 1;
        }
        self.mailboxes[core_index].take();
        guard.system_state[core_index] == 0
            && guard.current[core_index] != guard.execute[core_index]
    }

    /// Safe point: consume the core's preemption doorbell, resolve any
    /// deferred rebalance, and report whether the caller must hand
    /// control back through [`Port::return_to_system`].
    pub fn preemption_point(&self) -> bool {
        let core_index = self.port.core_id();
        self.mailboxes[core_index].take();
        let mut guard = self.core.lock();
        if guard.rebalance_deferred {
            guard.rebalance_deferred = false;
            guard.rebalance_execute_list(core_index);
        }
        let switch_needed = guard.system_state[core_index] == 0
            && guard.current[core_index] != guard.execute[core_index];
        let signals = guard.take_signals();
        drop(guard);
        self.dispatch(signals);
        switch_needed
    }

    /// The port's scheduling loop claims the core's execution target,
    /// making it the current thread. Returns the thread to run, or
    /// `None` when the core should idle: either no target is assigned,
    /// or the target's previous core has not released it yet and the
    /// caller must retry from its next safe point.
    pub fn acknowledge_schedule(&self) -> Option<ThreadId> {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        let target = guard.execute[core_index];
        let previous = guard.current[core_index];
        if let Some(id) = target {
            if previous != target && !guard.tcb(id).flags.contains(ThreadFlags::CORE_CONTROL) {
                // Still running on another core. Release our own thread
                // and idle until that core acknowledges.
                if let Some(prev) = previous {
                    if guard.is_live(prev) {
                        guard.tcb_mut(prev).flags.insert(ThreadFlags::CORE_CONTROL);
                    }
                }
                guard.current[core_index] = None;
                guard.time_slices[core_index] = 0;
                return None;
            }
        }
        guard.current[core_index] = target;
        let mut entry_notify = None;
        match target {
            Some(id) => {
                if previous != target {
                    let tcb = guard.tcb_mut(id);
                    tcb.core_mapped = core_index;
                    tcb.run_count += 1;
                    tcb.flags.remove(ThreadFlags::CORE_CONTROL);
                    if tcb.run_count == 1 {
                        entry_notify = tcb.entry_exit_notify;
                    }
                }
                guard.time_slices[core_index] = guard.tcb(id).time_slice;
            }
            None => guard.time_slices[core_index] = 0,
        }
        if let Some(prev) = previous {
            if previous != target && guard.is_live(prev) {
                guard.tcb_mut(prev).flags.insert(ThreadFlags::CORE_CONTROL);
            }
        }
        drop(guard);
        if let (Some(notify), Some(id)) = (entry_notify, target) {
            notify(id, ThreadNotify::Entry);
        }
        target
    }

    /// Reserve `id` as the timer-processing thread; it is refused the
    /// blocking services it drives.
    pub fn system_timer_thread_set(&self, id: ThreadId) -> KernelResult<()> {
        let mut guard = self.core.lock();
        self.check_live(&guard, id)?;
        guard.timer_thread = Some(id);
        Ok(())
    }

    pub fn execute_target(&self, core: usize) -> Option<ThreadId> {
        let guard = self.core.lock();
        guard.execute.get(core).copied().flatten()
    }

    pub fn current_thread(&self, core: usize) -> Option<ThreadId> {
        let guard = self.core.lock();
        guard.current.get(core).copied().flatten()
    }

    // ----- internals ------------------------------------------------------

    /// Wake a sleeper whose embedded timeout fired.
    fn thread_timeout(&self, id: ThreadId) {
        let core_index = self.port.core_id();
        let mut guard = self.core.lock();
        if !guard.is_live(id) || guard.tcb(id).state != ThreadState::Sleeping {
            return;
        }
        guard.tcb_mut(id).wake = WakeStatus::Timeout;
        guard.system_resume(id, core_index);
        self.finish(guard, core_index);
    }

    /// Undo threshold bookkeeping before an attribute change invalidates
    /// it, promoting the next displaced threshold holder.
    fn threshold_teardown(&self, guard: &mut MutexGuard<'_, SchedulerCore>, id: ThreadId) {
        let priority = guard.tcb(id).priority;
        if guard.tcb(id).has_threshold() && guard.preempted_list[priority] == Some(id) {
            guard.preempted_list[priority] = None;
            guard.preempted_map.clear(priority);
        }
        if guard.threshold_scheduled == Some(id) {
            guard.threshold_scheduled = None;
            guard.preempted_list[priority] = None;
            if let Some(next) = guard.preempted_map.lowest_set() {
                guard.threshold_scheduled = guard.preempted_list[next];
            }
        }
    }

    /// Release the lock, dispatch accumulated inter-core signals, and
    /// hand control back to the port when the calling core's target
    /// changed at thread level.
    fn finish(&self, mut guard: MutexGuard<'_, SchedulerCore>, core_index: usize) {
        let signals = guard.take_signals();
        let switch_needed = guard.system_state[core_index] == 0
            && guard.current[core_index] != guard.execute[core_index];
        drop(guard);
        self.dispatch(signals);
        if switch_needed {
            self.port.return_to_system();
        }
    }

    fn dispatch(&self, signals: Signals) {
        let mut preempt = signals.preempt;
        while let Some(core) = preempt.lowest_set() {
            preempt.remove(core);
            self.mailboxes[core].post();
            self.port.preempt_core(core);
        }
        let mut wakeup = signals.wakeup;
        while let Some(core) = wakeup.lowest_set() {
            wakeup.remove(core);
            self.port.wakeup_core(core);
        }
    }

    fn check_live(&self, guard: &MutexGuard<'_, SchedulerCore>, id: ThreadId) -> KernelResult<()> {
        if guard.is_live(id) {
            Ok(())
        } else {
            Err(KernelError::InvalidThread)
        }
    }

    fn check_timer(&self, guard: &MutexGuard<'_, SchedulerCore>, id: TimerId) -> KernelResult<()> {
        if guard.timers.is_valid(id) {
            Ok(())
        } else {
            Err(KernelError::InvalidTimer)
        }
    }

    fn check_not_isr(
        &self,
        guard: &MutexGuard<'_, SchedulerCore>,
        core_index: usize,
    ) -> KernelResult<()> {
        let state = guard.system_state[core_index];
        if state != 0 && state != INITIALIZE_IN_PROGRESS {
            Err(KernelError::CallerContext)
        } else {
            Ok(())
        }
    }
}
