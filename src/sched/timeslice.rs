//! Per-core time-slice countdown and same-priority rotation.

use super::SchedulerCore;

impl SchedulerCore {
    /// Drive every core's slice counter down one tick, rotating expired
    /// threads to the tail of their priority and handing the core to the
    /// next eligible peer.
    ///
    /// Runs from the tick source on `core_index`; remote cores whose
    /// target changes get signaled like any other assignment.
    pub(crate) fn time_slice_tick(&mut self, core_index: usize) {
        for core in 0..self.cores {
            let thread = match self.current[core] {
                Some(thread) => thread,
                None => continue,
            };
            if self.time_slices[core] == 0 {
                // Slicing disabled for this thread.
                continue;
            }
            self.time_slices[core] -= 1;
            if self.time_slices[core] != 0 {
                self.tcb_mut(thread).time_slice = self.time_slices[core];
                continue;
            }

            let fresh = self.tcb(thread).fresh_time_slice;
            self.time_slices[core] = fresh;
            self.tcb_mut(thread).time_slice = fresh;

            // A threshold holder keeps its core for as long as its
            // threshold is in force.
            if Some(thread) == self.threshold_scheduled || self.tcb(thread).has_threshold() {
                continue;
            }
            if self.tcb(thread).ready_next == thread {
                // No peers; nothing to rotate.
                continue;
            }

            let priority = self.tcb(thread).priority;
            self.rotate_to_tail(thread);
            log::trace!("time-slice: {:?} rotated at priority {}", thread, priority);

            // Hand the core to the first unscheduled peer that may run
            // here; a peer blocked only by affinity earns a full
            // rebalance at the next safe point.
            let head = match self.ready_heads[priority] {
                Some(head) => head,
                None => continue,
            };
            let mut walker = head;
            let mut blocked_peer = false;
            loop {
                if walker != thread
                    && Some(walker) != self.execute[self.tcb(walker).core_mapped]
                {
                    if self.tcb(walker).cores_allowed.contains(core) {
                        self.tcb_mut(walker).core_mapped = core;
                        self.execute[core] = Some(walker);
                        self.time_slices[core] = self.tcb(walker).time_slice;
                        self.signal_assignment(core_index, core);
                        blocked_peer = false;
                        break;
                    }
                    blocked_peer = true;
                }
                walker = self.tcb(walker).ready_next;
                if walker == head {
                    break;
                }
            }
            if blocked_peer {
                self.rebalance_deferred = true;
            }
        }
    }
}
