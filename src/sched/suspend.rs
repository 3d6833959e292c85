//! Taking a thread out of the ready structure and refilling the core it
//! leaves behind.

use super::SchedulerCore;
use crate::bitmap::CoreMask;
use crate::config::{MAX_PRIORITIES, NO_WAIT, WAIT_FOREVER};
use crate::thread::{ThreadFlags, ThreadId};

impl SchedulerCore {
    /// Core suspend transition. The caller has already staged the target
    /// state on the TCB and set the `SUSPENDING` flag; a resume that beat
    /// us here cleared the flag, in which case nothing happens.
    pub(crate) fn system_suspend(&mut self, id: ThreadId, core_index: usize) {
        if Some(id) == self.current[core_index] {
            // The thread is taking itself off the core: park its slice and
            // arm any staged timeout inline.
            let fresh = self.tcb(id).fresh_time_slice;
            self.tcb_mut(id).time_slice = fresh;
            self.time_slices[core_index] = fresh;
            let timeout = self.tcb(id).pending_timeout;
            if timeout != NO_WAIT && timeout != WAIT_FOREVER {
                let timer = self.tcb(id).timer;
                self.timers.activate(timer, timeout);
            }
        }

        if !self.tcb(id).flags.contains(ThreadFlags::SUSPENDING) {
            // A racing resume already voided this suspend.
            return;
        }
        self.tcb_mut(id).flags.remove(ThreadFlags::SUSPENDING);
        let priority = self.tcb(id).priority;
        log::trace!("suspend: {:?} leaving priority {}", id, priority);

        // Threshold bookkeeping, including promotion of the next
        // displaced threshold holder.
        if self.tcb(id).has_threshold() && self.preempted_list[priority] == Some(id) {
            self.preempted_list[priority] = None;
            self.preempted_map.clear(priority);
        }
        if self.threshold_scheduled == Some(id) {
            self.threshold_scheduled = None;
            self.preempted_list[priority] = None;
            if let Some(next_preempted) = self.preempted_map.lowest_set() {
                self.threshold_scheduled = self.preempted_list[next_preempted];
            }
        }

        let next_thread = self.ready_unlink(id);

        if self.ready_map.is_empty() {
            // Nothing ready anywhere; just vacate the core.
            let core = self.tcb(id).core_mapped;
            if self.execute[core] == Some(id) {
                self.execute[core] = None;
                self.signal_assignment(core_index, core);
            }
            return;
        }

        let freed = self.tcb(id).core_mapped;
        if self.execute[freed] != Some(id) {
            // The thread was ready but not scheduled; no core to refill.
            return;
        }
        self.execute[freed] = None;

        if self.threshold_scheduled.is_some() || self.tcb(id).has_threshold() {
            // Threshold interactions make the incremental refill unsound.
            self.rebalance_execute_list(core_index);
            return;
        }

        self.refill_core(freed, priority, next_thread, core_index);
        self.signal_assignment(core_index, freed);
    }

    /// Find the next unscheduled ready thread that can take the freed
    /// core, walking from the suspending thread's own priority downward
    /// in urgency. More urgent work is already scheduled, so the scan
    /// never needs to look above.
    fn refill_core(
        &mut self,
        freed: usize,
        priority: usize,
        next_thread: Option<ThreadId>,
        core_index: usize,
    ) {
        let mut next_priority = priority;
        let mut candidate = next_thread;
        if candidate.is_none() {
            next_priority += 1;
        }
        let mut possible = self.possible_cores();
        let available = CoreMask::single(freed);
        let complex_path = possible.intersect(available);

        loop {
            let thread = match candidate {
                Some(thread) => thread,
                None => {
                    next_priority = self.next_priority_find(next_priority);
                    if next_priority == MAX_PRIORITIES {
                        return;
                    }
                    match self.ready_heads[next_priority] {
                        Some(head) => {
                            candidate = Some(head);
                            head
                        }
                        None => return,
                    }
                }
            };

            let already_scheduled = Some(thread) == self.execute[self.tcb(thread).core_mapped];
            if !already_scheduled {
                if self.tcb(thread).has_threshold() {
                    self.rebalance_execute_list(core_index);
                    return;
                }
                if self.tcb(thread).cores_allowed.contains(freed) {
                    self.tcb_mut(thread).core_mapped = freed;
                    self.execute[freed] = Some(thread);
                    return;
                }
                if !complex_path.is_empty() {
                    // The candidate may not use the freed core directly,
                    // but some scheduled thread might move onto it.
                    let thread_possible = self.tcb(thread).cores_allowed.intersect(possible);
                    if !thread_possible.is_empty() {
                        self.schedule_list_setup();
                        let test_possible = possible.difference(thread_possible);
                        if self
                            .remap_solution_find(thread, available, thread_possible, test_possible)
                            .is_some()
                        {
                            self.execute_list_setup(core_index);
                            return;
                        }
                        possible = possible.difference(thread_possible);
                    }
                }
            }

            candidate = self.next_at_priority(thread, next_priority);
            if candidate.is_none() {
                next_priority += 1;
                if next_priority == MAX_PRIORITIES {
                    return;
                }
            }
        }
    }
}
