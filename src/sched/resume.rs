//! Making a thread ready and finding it a core without rebuilding the
//! whole execution mapping unless the situation demands it.

use super::SchedulerCore;
use crate::bitmap::CoreMask;
use crate::config::MAX_CORES;
use crate::thread::{ThreadFlags, ThreadId, ThreadState};

/// What a resume request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeOutcome {
    /// The thread entered the ready structure.
    Resumed,
    /// A suspend was in flight; the resume voided it and the thread never
    /// left the ready structure.
    Lifted,
    /// The thread was already ready or in a terminal state.
    NotSuspended,
}

impl SchedulerCore {
    /// Core resume transition. The caller has already staged the wake
    /// status on the TCB.
    pub(crate) fn system_resume(&mut self, id: ThreadId, core_index: usize) -> ResumeOutcome {
        // The embedded timeout timer is finished either way.
        let timer = self.tcb(id).timer;
        self.timers.deactivate(timer);

        if self.tcb(id).flags.contains(ThreadFlags::SUSPENDING) {
            // Suspend in flight. Terminal transitions are never voided.
            if self.tcb(id).state.is_terminal() {
                return ResumeOutcome::NotSuspended;
            }
            let tcb = self.tcb_mut(id);
            if tcb.flags.contains(ThreadFlags::DELAYED_SUSPEND) {
                tcb.flags.remove(ThreadFlags::DELAYED_SUSPEND);
                tcb.state = ThreadState::Suspended;
            } else {
                tcb.flags.remove(ThreadFlags::SUSPENDING);
                tcb.state = ThreadState::Ready;
            }
            return ResumeOutcome::Lifted;
        }

        match self.tcb(id).state {
            ThreadState::Ready => return ResumeOutcome::NotSuspended,
            state if state.is_terminal() => return ResumeOutcome::NotSuspended,
            _ => {}
        }
        if self.tcb(id).flags.contains(ThreadFlags::DELAYED_SUSPEND) {
            let tcb = self.tcb_mut(id);
            tcb.flags.remove(ThreadFlags::DELAYED_SUSPEND);
            tcb.state = ThreadState::Suspended;
            return ResumeOutcome::Lifted;
        }

        self.tcb_mut(id).state = ThreadState::Ready;
        self.ready_link(id);
        log::trace!("resume: {:?} ready at priority {}", id, self.tcb(id).priority);
        self.schedule_resumed(id, core_index);
        ResumeOutcome::Resumed
    }

    /// Find the freshly readied thread a core, or decide it must wait.
    fn schedule_resumed(&mut self, id: ThreadId, core_index: usize) {
        let priority = self.tcb(id).priority;

        // A scheduled threshold holder blocks its whole band; the thread
        // stays ready and runs when the holder leaves.
        if let Some(holder) = self.threshold_scheduled {
            if priority >= self.tcb(holder).preempt_threshold {
                return;
            }
        }

        if self.tcb(id).has_threshold() {
            // Threshold interactions are not worth special-casing; a full
            // rebalance handles them when any core could take the thread.
            for core in 0..self.cores {
                let admits = match self.execute[core] {
                    None => true,
                    Some(occupant) => priority < self.tcb(occupant).preempt_threshold,
                };
                if admits {
                    self.rebalance_execute_list(core_index);
                    return;
                }
            }
            return;
        }

        let allowed = self.tcb(id).cores_allowed;
        if allowed.is_empty() {
            return;
        }

        // Fast path: the last core this thread executed on is free.
        let mapped = self.tcb(id).core_mapped;
        if allowed.contains(mapped) && self.execute[mapped].is_none() {
            self.execute[mapped] = Some(id);
            self.signal_assignment(core_index, mapped);
            return;
        }

        if let Some(occupant) = self.execute[mapped] {
            let occupant_allowed = self.tcb(occupant).cores_allowed;
            if allowed.is_single() && allowed == occupant_allowed {
                // Both pinned to the same core; strict priority decides.
                if priority < self.tcb(occupant).priority {
                    self.execute[mapped] = Some(id);
                    self.signal_assignment(core_index, mapped);
                }
                return;
            }
        }

        let available = self.available_cores();
        let mut thread_possible = allowed;
        if !available.is_empty() {
            if let Some(core) = thread_possible.intersect(available).lowest_set() {
                self.tcb_mut(id).core_mapped = core;
                self.execute[core] = Some(id);
                self.signal_assignment(core_index, core);
                return;
            }
            // Free cores exist but affinity blocks them all; try moving
            // scheduled threads around to open an allowed core.
            let possible = self.possible_cores();
            if !available.intersect(possible).is_empty() {
                thread_possible = thread_possible.intersect(possible);
                self.schedule_list_setup();
                let test_possible = possible.difference(thread_possible);
                if self
                    .remap_solution_find(id, available, thread_possible, test_possible)
                    .is_some()
                {
                    self.execute_list_setup(core_index);
                    return;
                }
            }
        }

        // No free core works. Preempt the least urgent scheduled thread
        // if this one outranks it.
        let lowest_priority = self.lowest_scheduled_priority();
        if priority >= lowest_priority {
            return;
        }
        let preempt_thread = match self.preferred_preemption_victim(lowest_priority) {
            Some(victim) => victim,
            None => return,
        };
        let victim_core = self.tcb(preempt_thread).core_mapped;
        if thread_possible.contains(victim_core) {
            self.tcb_mut(id).core_mapped = victim_core;
            self.execute[victim_core] = Some(id);
            self.signal_assignment(core_index, victim_core);
            return;
        }

        // The natural victim runs on a core this thread may not use. Walk
        // every preemptable thread, least urgent first, trying direct
        // placement or a remap with that victim's core hypothetically
        // freed.
        let mut victims: [Option<ThreadId>; MAX_CORES] = [None; MAX_CORES];
        let possible = self.preemptable_threads(priority, &mut victims);
        for slot in victims {
            let victim = match slot {
                Some(victim) => victim,
                None => break,
            };
            let victim_core = self.tcb(victim).core_mapped;
            if thread_possible.contains(victim_core) {
                self.tcb_mut(id).core_mapped = victim_core;
                self.execute[victim_core] = Some(id);
                self.signal_assignment(core_index, victim_core);
                return;
            }
            thread_possible = thread_possible.intersect(possible);
            self.execute[victim_core] = None;
            self.schedule_list_setup();
            let test_possible = possible.difference(thread_possible);
            if self
                .remap_solution_find(
                    id,
                    CoreMask::single(victim_core),
                    thread_possible,
                    test_possible,
                )
                .is_some()
            {
                self.execute_list_setup(core_index);
                return;
            }
            // No solution; put the victim back.
            self.execute[victim_core] = Some(victim);
        }
    }

    /// Victim at the least urgent scheduled priority, preferring the one
    /// latest in the ready list so round-robin order is respected.
    fn preferred_preemption_victim(&self, lowest_priority: usize) -> Option<ThreadId> {
        let head = self.ready_heads[lowest_priority]?;
        let mut victim = head;
        let mut walker = self.tcb(head).ready_next;
        let mut found = 0usize;
        while walker != head && found < self.cores {
            if Some(walker) == self.execute[self.tcb(walker).core_mapped] {
                victim = walker;
                found += 1;
            }
            walker = self.tcb(walker).ready_next;
        }
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::bitmap::CoreMask;
    use crate::thread::{ThreadConfig, ThreadState};

    #[test]
    fn resume_fills_free_core() {
        let mut core = started_core(2);
        let a = make_thread(&mut core, &ThreadConfig::new("a", 10));
        assert_eq!(core.system_resume(a, 0), ResumeOutcome::Resumed);
        assert_eq!(core.execute[0], Some(a));
        assert_eq!(core.tcb(a).state, ThreadState::Ready);
    }

    #[test]
    fn resume_of_ready_thread_is_rejected() {
        let mut core = started_core(1);
        let a = ready_thread(&mut core, &ThreadConfig::new("a", 10));
        assert_eq!(core.system_resume(a, 0), ResumeOutcome::NotSuspended);
    }

    #[test]
    fn resume_lifts_inflight_suspend() {
        let mut core = started_core(1);
        let a = ready_thread(&mut core, &ThreadConfig::new("a", 10));
        // A suspend is staged but the thread has not left the ready
        // structure yet.
        let tcb = core.tcb_mut(a);
        tcb.flags.insert(ThreadFlags::SUSPENDING);
        tcb.state = ThreadState::Suspended;
        assert_eq!(core.system_resume(a, 0), ResumeOutcome::Lifted);
        assert_eq!(core.tcb(a).state, ThreadState::Ready);
        assert!(!core.tcb(a).flags.contains(ThreadFlags::SUSPENDING));
    }

    #[test]
    fn higher_priority_preempts_lowest() {
        let mut core = started_core(2);
        let low = ready_thread(&mut core, &ThreadConfig::new("low", 40));
        let mid = ready_thread(&mut core, &ThreadConfig::new("mid", 20));
        assert_eq!(core.execute[0], Some(low));
        assert_eq!(core.execute[1], Some(mid));
        let high = ready_thread(&mut core, &ThreadConfig::new("high", 5));
        // The least urgent thread loses its core.
        assert_eq!(core.execute[0], Some(high));
        assert_eq!(core.execute[1], Some(mid));
        assert_eq!(core.tcb(low).state, ThreadState::Ready);
    }

    #[test]
    fn equal_priority_does_not_preempt() {
        let mut core = started_core(1);
        let first = ready_thread(&mut core, &ThreadConfig::new("first", 10));
        let second = ready_thread(&mut core, &ThreadConfig::new("second", 10));
        assert_eq!(core.execute[0], Some(first));
        assert_eq!(core.tcb(second).state, ThreadState::Ready);
    }

    #[test]
    fn threshold_holder_blocks_band() {
        let mut core = started_core(2);
        let holder = ready_thread(
            &mut core,
            &ThreadConfig::new("holder", 10).preempt_threshold(5),
        );
        assert_eq!(core.threshold_scheduled, Some(holder));
        // Priority 7 sits inside the blocked band [5, 10]: stays ready.
        let blocked = ready_thread(&mut core, &ThreadConfig::new("blocked", 7));
        assert!(!core.execute.contains(&Some(blocked)));
        // Priority 3 is above the threshold and preempts normally.
        let urgent = ready_thread(&mut core, &ThreadConfig::new("urgent", 3));
        assert!(core.execute.contains(&Some(urgent)));
    }

    #[test]
    fn affinity_triggers_remap_of_scheduled_thread() {
        let mut core = started_core(2);
        let flexible = ready_thread(&mut core, &ThreadConfig::new("flex", 10));
        assert_eq!(core.execute[0], Some(flexible));
        let pinned = ready_thread(
            &mut core,
            &ThreadConfig::new("pin", 10).cores_excluded(CoreMask::single(1)),
        );
        assert_eq!(core.execute[0], Some(pinned));
        assert_eq!(core.execute[1], Some(flexible));
    }

    #[test]
    fn pinned_duel_lower_priority_wins_core() {
        let mut core = started_core(2);
        let excluded = CoreMask::single(1);
        let incumbent = ready_thread(
            &mut core,
            &ThreadConfig::new("incumbent", 20).cores_excluded(excluded),
        );
        // Occupy core 1 so no free core short-circuits the duel.
        let filler = ready_thread(&mut core, &ThreadConfig::new("filler", 1));
        assert_eq!(core.execute[0], Some(incumbent));
        assert_eq!(core.execute[1], Some(filler));
        let challenger = ready_thread(
            &mut core,
            &ThreadConfig::new("challenger", 10).cores_excluded(excluded),
        );
        assert_eq!(core.execute[0], Some(challenger));
    }
}
