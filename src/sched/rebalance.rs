//! Full rebuild of the per-core execution mapping, plus the displacement
//! search used when affinity keeps a thread off every free core.

use super::SchedulerCore;
use crate::bitmap::CoreMask;
use crate::config::{MAX_CORES, MAX_PRIORITIES};
use crate::thread::ThreadId;

impl SchedulerCore {
    /// Rebuild the scratch schedule list from the ready structure, most
    /// urgent priority first, then publish it as the execution targets.
    ///
    /// Honors core affinity, keeps threads on their last-mapped core when
    /// possible, attempts a displacement remap when affinity blocks a
    /// direct placement, and stops admitting work once a thread with
    /// preemption-threshold in force is placed.
    pub(crate) fn rebalance_execute_list(&mut self, core_index: usize) {
        let preempted_thread = self.threshold_scheduled;
        self.schedule = [None; MAX_CORES];

        let mut next_priority = 0usize;
        let mut last_priority = 0usize;
        let mut possible_cores = CoreMask::all(self.cores);
        let mut available_cores = possible_cores;
        let mut schedule_thread: Option<ThreadId> = None;
        let mut loaded = 0usize;

        'rebuild: while loaded < self.cores {
            let thread = match schedule_thread {
                Some(thread) => thread,
                None => {
                    next_priority = self.next_priority_find(next_priority);
                    if next_priority == MAX_PRIORITIES {
                        break 'rebuild;
                    }
                    if let Some(preempted) = preempted_thread {
                        let threshold = self.tcb(preempted).preempt_threshold;
                        if next_priority >= threshold {
                            if next_priority <= self.tcb(preempted).priority {
                                // The scan reached the band the threshold
                                // holder blocks; it goes back on a core.
                                next_priority = self.tcb(preempted).priority;
                                schedule_thread = Some(preempted);
                                continue 'rebuild;
                            }
                            // Nothing below the threshold holder may run.
                            break 'rebuild;
                        }
                    }
                    match self.ready_heads[next_priority] {
                        Some(head) => {
                            schedule_thread = Some(head);
                            head
                        }
                        None => break 'rebuild,
                    }
                }
            };

            let thread_possible = self
                .tcb(thread)
                .cores_allowed
                .intersect(available_cores.union(possible_cores));
            if thread_possible.is_empty() {
                schedule_thread = self.advance_candidate(thread, &mut next_priority);
                if next_priority == MAX_PRIORITIES {
                    break 'rebuild;
                }
                continue 'rebuild;
            }

            // A threshold thread cannot be admitted below work already
            // loaded inside its threshold band.
            if self.tcb(thread).has_threshold()
                && loaded != 0
                && last_priority >= self.tcb(thread).preempt_threshold
            {
                schedule_thread = self.advance_candidate(thread, &mut next_priority);
                if next_priority == MAX_PRIORITIES {
                    break 'rebuild;
                }
                continue 'rebuild;
            }

            let direct = thread_possible.intersect(available_cores);
            if let Some(lowest) = direct.lowest_set() {
                let mut core = self.tcb(thread).core_mapped;
                if !direct.contains(core) {
                    core = lowest;
                    self.tcb_mut(thread).core_mapped = core;
                }
                self.schedule[core] = Some(thread);
                available_cores.remove(core);
            } else {
                let test_possible = possible_cores.difference(thread_possible);
                match self.remap_solution_find(
                    thread,
                    available_cores,
                    thread_possible,
                    test_possible,
                ) {
                    Some(core) => {
                        available_cores.remove(core);
                    }
                    None => {
                        if Some(thread) == preempted_thread {
                            // Honoring the threshold means scheduling
                            // nothing below it.
                            break 'rebuild;
                        }
                        // These cores are proven unreachable; stop
                        // considering them for later candidates.
                        possible_cores = possible_cores.difference(thread_possible);
                        schedule_thread = self.advance_candidate(thread, &mut next_priority);
                        if next_priority == MAX_PRIORITIES {
                            break 'rebuild;
                        }
                        continue 'rebuild;
                    }
                }
            }

            loaded += 1;
            if self.tcb(thread).has_threshold() {
                let priority = self.tcb(thread).priority;
                self.preempted_list[priority] = Some(thread);
                self.preempted_map.set(priority);
                self.threshold_scheduled = Some(thread);
                log::trace!(
                    "rebalance: threshold thread {:?} placed, admission stops",
                    thread
                );
                break 'rebuild;
            }
            last_priority = next_priority;
            schedule_thread = self.next_at_priority(thread, next_priority);
            if schedule_thread.is_none() {
                next_priority += 1;
                if next_priority == MAX_PRIORITIES {
                    break 'rebuild;
                }
            }
        }

        self.execute_list_setup(core_index);
    }

    /// Skip a candidate that cannot be placed: next thread at the same
    /// priority, or bump the priority when the level is exhausted.
    fn advance_candidate(&self, thread: ThreadId, next_priority: &mut usize) -> Option<ThreadId> {
        let next = self.next_at_priority(thread, *next_priority);
        if next.is_none() {
            *next_priority += 1;
        }
        next
    }

    /// Breadth-first displacement search: can scheduled threads shuffle
    /// between cores so that `schedule_thread` fits somewhere it is
    /// allowed to run?
    ///
    /// On success the scratch schedule list is rewritten with the whole
    /// displacement chain applied and the freed core (now holding the
    /// chain's last thread) is returned.
    pub(crate) fn remap_solution_find(
        &mut self,
        schedule_thread: ThreadId,
        available_cores: CoreMask,
        thread_possible_cores: CoreMask,
        mut test_possible_cores: CoreMask,
    ) -> Option<usize> {
        let mut queue = [0usize; MAX_CORES];
        let mut queue_first = 0usize;
        let mut queue_last = 0usize;
        let mut remap_list: [Option<ThreadId>; MAX_CORES] = [None; MAX_CORES];
        let mut last_thread: Option<ThreadId> = None;
        let mut last_thread_cores = CoreMask::EMPTY;

        // Seed with every core the candidate may use, preferring its
        // last-mapped core so a solution keeps it there when possible.
        let mut seed = thread_possible_cores;
        let mapped = self.tcb(schedule_thread).core_mapped;
        if seed.contains(mapped) {
            remap_list[mapped] = Some(schedule_thread);
            queue[queue_last] = mapped;
            queue_last += 1;
            seed.remove(mapped);
        }
        while let Some(core) = seed.lowest_set() {
            seed.remove(core);
            remap_list[core] = Some(schedule_thread);
            queue[queue_last] = core;
            queue_last += 1;
        }

        while queue_first != queue_last {
            let core = queue[queue_first];
            queue_first += 1;
            let occupant = match self.schedule[core] {
                Some(occupant) => occupant,
                None => continue,
            };
            let mut occupant_possible =
                self.tcb(occupant).cores_allowed.intersect(test_possible_cores);
            if occupant_possible.is_empty() {
                continue;
            }
            let freed = occupant_possible.intersect(available_cores);
            if !freed.is_empty() {
                last_thread_cores = freed;
                last_thread = Some(occupant);
                break;
            }
            // Each core enters the queue at most once; pruning the test
            // space here is what bounds the search.
            test_possible_cores = test_possible_cores.difference(occupant_possible);
            while let Some(next_core) = occupant_possible.lowest_set() {
                occupant_possible.remove(next_core);
                remap_list[next_core] = Some(occupant);
                debug_assert!(queue_last < MAX_CORES);
                queue[queue_last] = next_core;
                queue_last += 1;
            }
        }

        let last_thread = last_thread?;

        // Walk the chain backward from the displaced thread's old core,
        // moving each thread onto the core it vacated.
        let mut core = self.tcb(last_thread).core_mapped;
        let mut thread = match remap_list[core] {
            Some(thread) => thread,
            None => return None,
        };
        while thread != schedule_thread {
            self.schedule[core] = Some(thread);
            let previous_core = core;
            core = self.tcb(thread).core_mapped;
            self.tcb_mut(thread).core_mapped = previous_core;
            thread = match remap_list[core] {
                Some(next) => next,
                None => return None,
            };
        }
        self.schedule[core] = Some(thread);
        self.tcb_mut(thread).core_mapped = core;

        let final_core = last_thread_cores.lowest_set()?;
        self.schedule[final_core] = Some(last_thread);
        self.tcb_mut(last_thread).core_mapped = final_core;
        Some(final_core)
    }

    /// Scheduled threads less urgent than `priority`, ordered least
    /// urgent first; equal priorities order later ready-list entries
    /// first so round-robin victims lose their core before fresher ones.
    /// Also returns the union of allowed cores of everything scheduled.
    pub(crate) fn preemptable_threads(
        &self,
        priority: usize,
        list: &mut [Option<ThreadId>; MAX_CORES],
    ) -> CoreMask {
        *list = [None; MAX_CORES];
        let mut possible = CoreMask::EMPTY;
        let mut count = 0usize;
        for core in 0..self.cores {
            if let Some(id) = self.execute[core] {
                possible = possible.union(self.tcb(id).cores_allowed);
                if self.tcb(id).priority > priority {
                    list[count] = Some(id);
                    count += 1;
                }
            }
        }

        let mut i = 0usize;
        while count > 1 && i < count - 1 {
            let mut victim = match list[i] {
                Some(victim) => victim,
                None => break,
            };
            for k in (i + 1)..count {
                let challenger = match list[k] {
                    Some(challenger) => challenger,
                    None => break,
                };
                let victim_priority = self.tcb(victim).priority;
                let challenger_priority = self.tcb(challenger).priority;
                if challenger_priority > victim_priority {
                    list[i] = Some(challenger);
                    list[k] = Some(victim);
                    victim = challenger;
                } else if challenger_priority == victim_priority
                    && self.ready_list_after(victim, challenger, victim_priority)
                {
                    list[i] = Some(challenger);
                    list[k] = Some(victim);
                    victim = challenger;
                }
            }
            i += 1;
        }
        possible
    }

    /// True when `candidate` appears after `reference` walking the ready
    /// list at `priority` from `reference` toward the head.
    fn ready_list_after(&self, reference: ThreadId, candidate: ThreadId, priority: usize) -> bool {
        let head = match self.ready_heads[priority] {
            Some(head) => head,
            None => return false,
        };
        let mut search = self.tcb(reference).ready_next;
        while search != head {
            if search == candidate {
                return true;
            }
            search = self.tcb(search).ready_next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::bitmap::CoreMask;
    use crate::config::MAX_CORES;
    use crate::thread::ThreadConfig;

    #[test]
    fn rebalance_places_most_urgent_first() {
        let mut core = started_core(2);
        let low = ready_thread(&mut core, &ThreadConfig::new("low", 30));
        let mid = ready_thread(&mut core, &ThreadConfig::new("mid", 20));
        let high = ready_thread(&mut core, &ThreadConfig::new("high", 10));
        core.execute = [None; MAX_CORES];
        core.rebalance_execute_list(0);
        assert_eq!(core.execute[0], Some(high));
        assert_eq!(core.execute[1], Some(mid));
        assert!(!core.execute.contains(&Some(low)));
    }

    #[test]
    fn rebalance_prefers_last_mapped_core() {
        let mut core = started_core(2);
        let a = ready_thread(&mut core, &ThreadConfig::new("a", 10));
        core.tcb_mut(a).core_mapped = 1;
        core.execute = [None; MAX_CORES];
        core.rebalance_execute_list(0);
        assert_eq!(core.execute[1], Some(a));
        assert_eq!(core.execute[0], None);
    }

    #[test]
    fn rebalance_honors_exclusion() {
        let mut core = started_core(2);
        let pinned = ready_thread(
            &mut core,
            &ThreadConfig::new("pinned", 10).cores_excluded(CoreMask::single(0)),
        );
        let other = ready_thread(&mut core, &ThreadConfig::new("other", 11));
        core.execute = [None; MAX_CORES];
        core.rebalance_execute_list(0);
        assert_eq!(core.execute[1], Some(pinned));
        assert_eq!(core.execute[0], Some(other));
    }

    #[test]
    fn threshold_thread_stops_admission() {
        let mut core = started_core(2);
        let gate = ready_thread(
            &mut core,
            &ThreadConfig::new("gate", 10).preempt_threshold(5),
        );
        let blocked = ready_thread(&mut core, &ThreadConfig::new("blocked", 12));
        core.execute = [None; MAX_CORES];
        core.rebalance_execute_list(0);
        assert_eq!(core.execute[0], Some(gate));
        // The second core stays idle: nothing below the threshold runs.
        assert_eq!(core.execute[1], None);
        assert_eq!(core.threshold_scheduled, Some(gate));
        let _ = blocked;
    }

    #[test]
    fn remap_displaces_flexible_thread() {
        // Core 0 busy with a flexible thread; the new thread may only use
        // core 0, so the occupant must shift to core 1.
        let mut core = started_core(2);
        let flexible = ready_thread(&mut core, &ThreadConfig::new("flex", 10));
        assert_eq!(core.execute[0], Some(flexible));
        let pinned = ready_thread(
            &mut core,
            &ThreadConfig::new("pin", 10).cores_excluded(CoreMask::single(1)),
        );
        assert_eq!(core.execute[0], Some(pinned));
        assert_eq!(core.execute[1], Some(flexible));
        assert_eq!(core.tcb(flexible).core_mapped, 1);
    }

    #[test]
    fn preemptable_list_sorted_least_urgent_first() {
        let mut core = started_core(4);
        let a = ready_thread(&mut core, &ThreadConfig::new("a", 9));
        let b = ready_thread(&mut core, &ThreadConfig::new("b", 30));
        let c = ready_thread(&mut core, &ThreadConfig::new("c", 20));
        assert_eq!(core.execute[0], Some(a));
        assert_eq!(core.execute[1], Some(b));
        assert_eq!(core.execute[2], Some(c));
        let mut list = [None; MAX_CORES];
        core.preemptable_threads(9, &mut list);
        assert_eq!(list[0], Some(b));
        assert_eq!(list[1], Some(c));
        assert_eq!(list[2], None);
    }
}
